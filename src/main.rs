//! Vidingest CLI: scan a library, verify pending files, or clean up broken titles.

use anyhow::Result;
use clap::Parser;
use std::time::Instant;
use vidingest::engine::arg_parser::Cli;
use vidingest::engine::handle_run;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
