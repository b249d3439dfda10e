//! Parsing of ffmpeg `time=` and `Duration:` markers.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static TIME_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=(?P<h>\d{1,3}):(?P<m>\d{2}):(?P<s>\d{2})(?:\.(?P<f>\d{1,3}))?")
        .unwrap_or_else(|e| panic!("time marker pattern: {e}"))
});

static DURATION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration:\s*(?P<h>\d{1,3}):(?P<m>\d{2}):(?P<s>\d{2})(?:\.(?P<f>\d{1,3}))?")
        .unwrap_or_else(|e| panic!("duration marker pattern: {e}"))
});

/// Decoding progress of one probe run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Progress {
    /// Decoded media time in milliseconds.
    pub elapsed_ms: u64,
    /// `elapsed / length * 100`, two decimals; None when the length is unknown.
    pub percent: Option<f64>,
}

impl Progress {
    pub fn new(elapsed_ms: u64, length_ms: Option<u64>) -> Self {
        let percent = length_ms
            .filter(|&len| len > 0)
            .map(|len| round2(elapsed_ms as f64 / len as f64 * 100.0));
        Self {
            elapsed_ms,
            percent,
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn captures_to_ms(caps: &Captures<'_>) -> Option<u64> {
    let field = |name: &str| -> Option<u64> { caps.name(name)?.as_str().parse().ok() };
    let hours = field("h")?;
    let minutes = field("m")?;
    let seconds = field("s")?;
    // ffmpeg prints centiseconds; right-pad whatever fraction is present to milliseconds.
    let millis = caps
        .name("f")
        .map(|f| {
            let digits = f.as_str();
            let padded = format!("{digits:0<3}");
            padded.parse::<u64>().unwrap_or(0)
        })
        .unwrap_or(0);
    Some((hours * 3600 + minutes * 60 + seconds) * 1000 + millis)
}

/// Elapsed milliseconds from a `time=HH:MM:SS.ff` marker, if the chunk has one.
pub fn parse_time_marker(chunk: &str) -> Option<u64> {
    TIME_MARKER
        .captures(chunk)
        .and_then(|c| captures_to_ms(&c))
}

/// Container length in milliseconds from a `Duration: HH:MM:SS.ff` line.
pub fn parse_duration_marker(chunk: &str) -> Option<u64> {
    DURATION_MARKER
        .captures(chunk)
        .and_then(|c| captures_to_ms(&c))
}
