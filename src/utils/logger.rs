use colored::{ColoredString, Colorize};
use env_logger::Builder;
use log::Level;
use std::io::Write;

use crate::types::CheckStatus;

/// Install the logger. Safe to call more than once; later calls are ignored.
pub fn setup_logging(verbose: bool) {
    use log::LevelFilter;

    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn) // Default: only warnings from dependencies
        .filter_module(env!("CARGO_PKG_NAME"), level) // Our crate: use requested level
        .format(|buf, record| {
            let name = env!("CARGO_PKG_NAME");
            let line = match record.level() {
                Level::Error | Level::Warn => {
                    let level_str = match record.level() {
                        Level::Warn => "WARN".yellow(),
                        _ => "ERROR".red(),
                    };
                    let path = record.target().to_string().white();
                    format!("[{} {} {}] {}", name.cyan(), level_str, path, record.args())
                }
                Level::Debug | Level::Trace => {
                    format!("[{} {}] {}", name.cyan(), "DEBUG".dimmed(), record.args())
                }
                _ => format!("[{}] {}", name.cyan(), record.args()),
            };
            writeln!(buf, "{}", line)
        })
        .try_init();
}

/// Terminal colors for verification results.
pub struct Colors;

impl Colors {
    pub fn status(status: CheckStatus) -> ColoredString {
        match status {
            CheckStatus::Consistent => "consistent".green(),
            CheckStatus::Inconsistent => "inconsistent".red(),
            CheckStatus::Failed => "failed".magenta(),
            CheckStatus::Unchecked => "unchecked".yellow(),
        }
    }

    pub fn count(label: &str, n: usize, nonzero_is_bad: bool) -> ColoredString {
        let text = format!("{label}: {n}");
        match (n, nonzero_is_bad) {
            (0, _) => text.normal(),
            (_, true) => text.red(),
            (_, false) => text.green(),
        }
    }
}
