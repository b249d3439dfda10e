//! Command handlers for scan, verify, and cleanup

use anyhow::Result;
use log::{info, warn};
use std::path::Path;

use crate::Settings;
use crate::cleanup::cleanup;
use crate::engine::arg_parser::{CleanupArgs, CommonArgs, ScanArgs};
use crate::ingest::{RunReport, scan_dir, verify_pending};
use crate::pipeline::RunControl;
use crate::utils::Colors;
use crate::utils::config::WorkerLimits;

/// Overlay command-line flags on the file/default settings.
fn apply_common(common: &CommonArgs, settings: &mut Settings) {
    if let Some(n) = common.workers {
        settings.opts.num_workers = WorkerLimits::clamp(n);
    }
    if let Some(strict) = common.strict {
        settings.opts.strict = strict;
    }
}

fn print_run_report(report: &RunReport) {
    if let Some(scan) = &report.scan {
        info!(
            "Scanned {} video(s): {} new, {} known, {} new title(s), {} unqualified, {} unmatched",
            scan.seen, scan.registered, scan.known, scan.new_titles, scan.unqualified, scan.unmatched
        );
        if !scan.errors.is_empty() {
            warn!("{} file(s) could not be registered", scan.errors.len());
        }
        if !scan.skipped.is_empty() {
            warn!("Skipped {} unreadable path(s)", scan.skipped.len());
        }
    }
    let w = &report.workers;
    info!(
        "{} | {} | {} | {}",
        Colors::count("Consistent", w.consistent, false),
        Colors::count("Inconsistent", w.inconsistent, true),
        Colors::count("Failed", w.failed, true),
        Colors::count("Downstream tasks", w.dispatched, false)
    );
    if w.lost > 0 {
        warn!("{} downstream task(s) could not be recorded; they are sent again next run", w.lost);
    }
}

/// Handle scan command
pub fn handle_scan(args: &ScanArgs, db_path: &Path, mut settings: Settings, control: &RunControl) -> Result<()> {
    apply_common(&args.common, &mut settings);
    settings.opts.db_path = Some(db_path.to_path_buf());
    settings.opts.follow_links |= args.follow_links;
    settings.opts.exclude.extend(args.exclude.iter().cloned());
    settings.opts.register_only = args.register_only;
    let report = scan_dir(&args.dir, &settings, control)?;
    print_run_report(&report);
    Ok(())
}

/// Handle verify command
pub fn handle_verify(common: &CommonArgs, db_path: &Path, mut settings: Settings, control: &RunControl) -> Result<()> {
    apply_common(common, &mut settings);
    let report = verify_pending(db_path, &settings, control)?;
    print_run_report(&report);
    Ok(())
}

/// Handle cleanup command
pub fn handle_cleanup(args: &CleanupArgs, db_path: &Path, mut settings: Settings, control: &RunControl) -> Result<()> {
    apply_common(&args.common, &mut settings);
    if args.dry_run {
        warn!("RUNNING IN DRY-RUN MODE. NOTHING WILL BE RE-VERIFIED.");
    }
    cleanup(db_path, &settings, args.dry_run, control)?;
    Ok(())
}
