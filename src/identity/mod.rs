//! Filename → catalog identity.
//!
//! Evaluation order: blacklist, unqualified-artifact check (hex-only stems and placeholder names),
//! then the ordered matchers. Skips are values, not errors.

mod extractor;
pub mod matchers;

pub use extractor::{ExtractorConfig, IdentityExtractor};
pub use matchers::{LabelSource, Matcher, default_matchers, parse_part};

use std::fmt;

use crate::error::ExtractionFailure;
use crate::types::Identity;

/// Result of [`IdentityExtractor::extract`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Extraction {
    Qualified(Identity),
    /// Valid file that must not be processed further.
    Unqualified(UnqualifiedReason),
    Failed(ExtractionFailure),
}

impl Extraction {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Extraction::Qualified(identity) => Some(identity),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnqualifiedReason {
    Blacklisted { entry: String },
    /// Stem is purely hexadecimal (hash-named download artifact).
    HexOnly,
    Placeholder { name: String },
}

impl fmt::Display for UnqualifiedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnqualifiedReason::Blacklisted { entry } => {
                write!(f, "filename contains blacklisted string {entry:?}")
            }
            UnqualifiedReason::HexOnly => f.write_str("hex-only filename, unknown download artifact"),
            UnqualifiedReason::Placeholder { name } => {
                write!(f, "placeholder filename {name:?}, unknown download artifact")
            }
        }
    }
}
