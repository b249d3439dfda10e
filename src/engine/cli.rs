//! CLI entry: logging, settings (defaults → config file → flags), Ctrl+C, then dispatch.

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::engine::arg_parser::{Cli, Commands};
use crate::engine::handlers::{handle_cleanup, handle_scan, handle_verify};
use crate::pipeline::RunControl;
use crate::utils::{load_settings, setup_logging};

/// Ctrl+C requests a cooperative shutdown: running probes finish, queued tasks stay unchecked.
fn install_ctrlc(control: &RunControl) -> Result<()> {
    let control = control.clone();
    ctrlc::set_handler(move || {
        warn!("Interrupt received; finishing running checks");
        control.request_shutdown();
    })
    .context("set Ctrl+C handler")
}

pub fn handle_run(cli: &Cli) -> Result<()> {
    let base = cli.base_dir();
    let mut settings = load_settings(&base);
    settings.opts.verbose |= cli.verbose;
    setup_logging(settings.opts.verbose);

    let db_path = cli.db_path(&base, settings.opts.db_path.as_deref());
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_uppercase(),
        settings
    );
    if !matches!(cli.command, Commands::Scan(_)) && !db_path.exists() {
        anyhow::bail!("no catalog at {}; run `scan` first", db_path.display());
    }

    let control = RunControl::default();
    install_ctrlc(&control)?;
    match &cli.command {
        Commands::Scan(args) => handle_scan(args, &db_path, settings, &control),
        Commands::Verify(common) => handle_verify(common, &db_path, settings, &control),
        Commands::Cleanup(args) => handle_cleanup(args, &db_path, settings, &control),
    }
}
