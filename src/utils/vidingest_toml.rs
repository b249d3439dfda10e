//! Load `vidingest.toml` (CLI only). Library users build [`Settings`] themselves.
//!
//! Lookup: `VIDINGEST_CONFIG` from the environment, then from `.env` in the directory, then
//! `vidingest.toml` in the directory.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::Settings;
use crate::utils::config::{PackagePaths, WorkerLimits};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct VidingestToml {
    #[serde(default)]
    settings: SettingsSection,
    #[serde(default)]
    extractor: ExtractorSection,
    #[serde(default)]
    probe: ProbeSection,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsSection {
    db_path: Option<String>,
    workers: Option<usize>,
    strict: Option<bool>,
    follow_links: Option<bool>,
    exclude: Option<Vec<String>>,
    verbose: Option<bool>,
    extensions: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractorSection {
    blacklist: Option<Vec<String>>,
    placeholders: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeSection {
    program: Option<String>,
    extra_args: Option<Vec<String>>,
    keepalive_secs: Option<u64>,
    timeout_secs: Option<u64>,
    corruption_signals: Option<Vec<String>>,
}

fn env_config_path(dir: &Path) -> Option<PathBuf> {
    let key = PackagePaths::get().config_env_key();
    let read = || {
        std::env::var(key)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    if let Some(p) = read() {
        return Some(PathBuf::from(p));
    }
    let env_path = dir.join(".env");
    if env_path.is_file() {
        let _ = dotenvy::from_path(&env_path);
        return read().map(PathBuf::from);
    }
    None
}

/// Config file to use for `dir`: env override, else `vidingest.toml` in `dir`.
pub fn config_file_path(dir: &Path) -> PathBuf {
    env_config_path(dir).unwrap_or_else(|| dir.join(PackagePaths::get().config_filename()))
}

/// Parse the config file at `path`. None if missing; parse errors are logged and ignored.
pub(crate) fn load_vidingest_toml(path: &Path) -> Option<VidingestToml> {
    let s = std::fs::read_to_string(path).ok()?;
    toml::from_str(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

/// Overwrite a field from file when present.
macro_rules! apply_file_opt {
    ($sec:expr, $target:expr, $sec_field:ident => $target_field:ident) => {
        if let Some(v) = $sec.$sec_field.clone() {
            $target.$target_field = v;
        }
    };
}

/// Apply file config on top of `settings` (only fields present in the file). Call before CLI flags.
pub(crate) fn apply_file_to_settings(file: &VidingestToml, settings: &mut Settings) {
    let s = &file.settings;
    if let Some(ref p) = s.db_path {
        settings.opts.db_path = Some(PathBuf::from(p));
    }
    if let Some(n) = s.workers {
        settings.opts.num_workers = WorkerLimits::clamp(n);
    }
    apply_file_opt!(s, settings.opts, strict => strict);
    apply_file_opt!(s, settings.opts, follow_links => follow_links);
    apply_file_opt!(s, settings.opts, exclude => exclude);
    apply_file_opt!(s, settings.opts, verbose => verbose);
    apply_file_opt!(s, settings, extensions => extensions);

    let e = &file.extractor;
    apply_file_opt!(e, settings.extractor, blacklist => blacklist);
    apply_file_opt!(e, settings.extractor, placeholders => placeholders);

    let p = &file.probe;
    apply_file_opt!(p, settings.probe, program => program);
    apply_file_opt!(p, settings.probe, extra_args => extra_args);
    if let Some(secs) = p.keepalive_secs {
        settings.probe.keepalive_interval = Duration::from_secs(secs.max(1));
    }
    if let Some(secs) = p.timeout_secs {
        settings.probe.timeout = Duration::from_secs(secs.max(1));
    }
    if let Some(ref signals) = p.corruption_signals {
        settings.probe.corruption_signals = signals.iter().map(|s| s.to_lowercase()).collect();
    }
}

/// Defaults overlaid with the config file for `dir`, if any.
pub fn load_settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    let path = config_file_path(dir);
    if let Some(file) = load_vidingest_toml(&path) {
        log::debug!("loaded config from {}", path.display());
        apply_file_to_settings(&file, &mut settings);
    }
    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let file: VidingestToml = toml::from_str(
            r#"
            [settings]
            workers = 100
            strict = false

            [extractor]
            blacklist = ["sample"]

            [probe]
            keepalive_secs = 10
            corruption_signals = ["Broken Frame"]
            "#,
        )
        .unwrap();
        let mut settings = Settings::default();
        apply_file_to_settings(&file, &mut settings);
        assert_eq!(settings.opts.num_workers, WorkerLimits::MAX_WORKERS);
        assert!(!settings.opts.strict);
        assert_eq!(settings.extractor.blacklist, vec!["sample".to_string()]);
        assert_eq!(settings.extractor.placeholders, vec!["videoplayback".to_string()]);
        assert_eq!(settings.probe.keepalive_interval, Duration::from_secs(10));
        assert_eq!(settings.probe.corruption_signals, vec!["broken frame".to_string()]);
    }

    #[test]
    fn unknown_section_is_rejected() {
        assert!(toml::from_str::<VidingestToml>("[index]\nhash = true\n").is_err());
    }
}
