use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::utils::config::PackagePaths;

struct DefaultArgs;

impl DefaultArgs {
    pub const DIR: &'static str = ".";
}

/// Ingest a video library: identify files by catalog number, verify them, fan out follow-up work.
#[derive(Clone, Parser)]
#[command(name = "vidingest")]
#[command(about = "Identify, verify, and catalog video files.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the catalog database. Default: `.vidingest.db` in the scanned (or current) directory.
    #[arg(long, short, global = true)]
    pub db: Option<PathBuf>,

    /// Verbose output: debug logs and a progress counter.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// Discover videos under DIR, register them, and verify every unchecked one.
    Scan(ScanArgs),
    /// Verify every unchecked or previously failed file in the catalog.
    Verify(CommonArgs),
    /// Report titles with inconsistent files and re-verify them.
    Cleanup(CleanupArgs),
}

/// Options shared by every command that runs verification.
#[derive(Clone, Debug, Args)]
pub struct CommonArgs {
    /// Number of verification workers (each runs one probe at a time).
    #[arg(long, short = 'w')]
    pub workers: Option<usize>,

    /// Strict probing: stop at the first decode error and fail on corruption warnings.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub strict: Option<bool>,
}

#[derive(Clone, Debug, Args)]
pub struct ScanArgs {
    /// Directory to scan. Default: current directory.
    #[arg(value_name = "DIR", default_value = DefaultArgs::DIR)]
    pub dir: PathBuf,

    #[command(flatten)]
    pub common: CommonArgs,

    /// Follow symbolic links.
    #[arg(long, short = 'f')]
    pub follow_links: bool,

    /// Exclude patterns (glob syntax). Can specify multiple: -e pattern1 pattern2 pattern3
    #[arg(long, short = 'e', num_args = 1..)]
    pub exclude: Vec<String>,

    /// Register files only; verify later with `verify`.
    #[arg(long)]
    pub register_only: bool,
}

#[derive(Clone, Debug, Args)]
pub struct CleanupArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Only report broken titles.
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    /// Directory holding the config file and, by default, the database.
    pub fn base_dir(&self) -> PathBuf {
        match &self.command {
            Commands::Scan(args) => args.dir.clone(),
            Commands::Verify(_) | Commands::Cleanup(_) => PathBuf::from(DefaultArgs::DIR),
        }
    }

    /// Explicit `--db`, else `configured`, else the package db filename in `dir`.
    pub fn db_path(&self, dir: &Path, configured: Option<&Path>) -> PathBuf {
        self.db
            .clone()
            .or_else(|| configured.map(Path::to_path_buf))
            .unwrap_or_else(|| dir.join(PackagePaths::get().output_filename()))
    }
}
