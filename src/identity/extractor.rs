use serde::Deserialize;
use std::path::Path;

use super::matchers::{Matcher, default_matchers, parse_part};
use super::{Extraction, UnqualifiedReason};
use crate::error::ExtractionFailure;
use crate::types::Identity;

/// Strings that disqualify a filename. Loaded once at startup and injected into the extractor.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Case-insensitive substrings of the full filename that mark a file as not a title.
    pub blacklist: Vec<String>,
    /// Generic stems (e.g. default browser download names) that never name a title.
    pub placeholders: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            blacklist: vec!["hentaikuindo".to_string()],
            placeholders: vec!["videoplayback".to_string()],
        }
    }
}

/// Filename → [`Extraction`]. Pure; share one instance across threads.
#[derive(Clone, Debug)]
pub struct IdentityExtractor {
    blacklist: Vec<String>,
    placeholders: Vec<String>,
    matchers: Vec<Matcher>,
}

impl Default for IdentityExtractor {
    fn default() -> Self {
        Self::new(ExtractorConfig::default())
    }
}

impl IdentityExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self::with_matchers(config, default_matchers())
    }

    /// Use a custom matcher list; its order is the match priority.
    pub fn with_matchers(config: ExtractorConfig, matchers: Vec<Matcher>) -> Self {
        Self {
            blacklist: config
                .blacklist
                .into_iter()
                .map(|s| s.to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            placeholders: config.placeholders,
            matchers,
        }
    }

    pub fn matcher_names(&self) -> Vec<&'static str> {
        self.matchers.iter().map(|m| m.name).collect()
    }

    /// Derive the identity of `filename` (a bare file name, not a path).
    pub fn extract(&self, filename: &str) -> Extraction {
        let lowered = filename.to_lowercase();
        if let Some(entry) = self.blacklist.iter().find(|b| lowered.contains(b.as_str())) {
            return Extraction::Unqualified(UnqualifiedReason::Blacklisted {
                entry: entry.clone(),
            });
        }

        let stem = file_stem(filename).trim();
        if is_hex_only(stem) {
            return Extraction::Unqualified(UnqualifiedReason::HexOnly);
        }
        if let Some(name) = self
            .placeholders
            .iter()
            .find(|p| stem.eq_ignore_ascii_case(p))
        {
            return Extraction::Unqualified(UnqualifiedReason::Placeholder { name: name.clone() });
        }

        let mut attempted = Vec::with_capacity(self.matchers.len());
        for matcher in &self.matchers {
            attempted.push(matcher.name);
            if let Some(token) = matcher.capture(stem) {
                return Extraction::Qualified(Identity::new(
                    token.catalog_number,
                    parse_part(token.rest),
                ));
            }
        }

        Extraction::Failed(ExtractionFailure {
            filename: filename.to_string(),
            attempted,
        })
    }
}

fn file_stem(filename: &str) -> &str {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
}

fn is_hex_only(stem: &str) -> bool {
    !stem.is_empty() && stem.chars().all(|c| c.is_ascii_hexdigit())
}
