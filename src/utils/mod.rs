pub mod config;
pub mod logger;
pub mod vidingest_toml;

pub use config::*;
pub use logger::{Colors, setup_logging};
pub use vidingest_toml::{config_file_path, load_settings};
