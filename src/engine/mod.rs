//! Engine module: CLI, storage, duplicate resolution, and path tools

pub mod arg_parser;
pub mod cli;
pub mod db_ops;
pub mod handlers;
pub mod progress;
pub mod resolver;
pub mod tools;

// Re-export commonly used items
pub use arg_parser::{Cli, Commands, CommonArgs};
pub use cli::handle_run;
pub use db_ops::{SqliteRepository, open_db, open_db_in_memory};
pub use resolver::{DuplicateResolver, Registration, Resolution};
pub use tools::{file_identity, is_video_file};
