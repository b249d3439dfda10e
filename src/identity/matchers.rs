//! Ordered catalog-number matchers and the part-token parser.
//!
//! Order is priority: the first matcher that yields a catalog number wins. More specific shapes
//! (`FC2-PPV`, digit-prefixed labels) therefore come before the generic `LABEL-123` forms.
//!
//! Labels are 2 to 8 letters when a separator precedes the number (`ABCDEFG-123`), but at most 6
//! in the compact form (`SSIS00123`), where longer runs are mostly ordinary words.

use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Minimum digits kept when trimming leading zeros from a catalog number.
const MIN_NUMBER_DIGITS: usize = 3;

/// Where the label half of a catalog number comes from.
#[derive(Clone, Debug)]
pub enum LabelSource {
    /// Taken from the `label` capture group, uppercased.
    Captured,
    /// Fixed label for matchers whose prefix is part of the pattern.
    Fixed(&'static str),
}

/// One pattern able to capture a catalog-number token.
///
/// The regex must have a `number` group and, for [`LabelSource::Captured`], a `label` group.
/// Anything after the `number` group is handed to [`parse_part`].
#[derive(Clone, Debug)]
pub struct Matcher {
    pub name: &'static str,
    regex: Regex,
    label: LabelSource,
}

/// Catalog token found by a matcher plus the unparsed tail of the stem.
#[derive(Debug, PartialEq, Eq)]
pub struct MatchedToken<'a> {
    pub catalog_number: String,
    pub rest: &'a str,
}

impl Matcher {
    pub fn new(name: &'static str, pattern: &str, label: LabelSource) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            regex: Regex::new(pattern)?,
            label,
        })
    }

    /// Try to capture a catalog number in `stem`. Empty tokens count as no match.
    pub fn capture<'a>(&self, stem: &'a str) -> Option<MatchedToken<'a>> {
        let caps = self.regex.captures(stem)?;
        let number = caps.name("number")?;
        let label = match &self.label {
            LabelSource::Fixed(label) => (*label).to_string(),
            LabelSource::Captured => captured_label(&caps)?,
        };
        let number = trim_number(number.as_str());
        if label.is_empty() || number.is_empty() {
            return None;
        }
        Some(MatchedToken {
            catalog_number: format!("{label}-{number}"),
            rest: &stem[caps.name("number")?.end()..],
        })
    }
}

fn captured_label(caps: &Captures<'_>) -> Option<String> {
    let label = caps.name("label")?.as_str().trim();
    Some(label.to_ascii_uppercase())
}

/// Drop leading zeros but keep at least [`MIN_NUMBER_DIGITS`] digits (`00123` → `123`, `007` → `007`).
fn trim_number(number: &str) -> String {
    let significant = number.trim_start_matches('0');
    if significant.len() >= MIN_NUMBER_DIGITS {
        significant.to_string()
    } else {
        let keep = number.len().min(MIN_NUMBER_DIGITS.max(significant.len()));
        number[number.len() - keep..].to_string()
    }
}

/// Built-in matchers in priority order.
pub fn default_matchers() -> Vec<Matcher> {
    DEFAULT_MATCHERS.clone()
}

static DEFAULT_MATCHERS: LazyLock<Vec<Matcher>> = LazyLock::new(|| {
    let specs: [(&'static str, &str, LabelSource); 4] = [
        (
            "fc2-ppv",
            r"(?i)(?:^|[^a-z0-9])fc2[-_ ]*ppv[-_ ]*(?P<number>\d{5,8})(?:$|[^0-9])",
            LabelSource::Fixed("FC2-PPV"),
        ),
        (
            "numeric-prefix-label",
            r"(?i)(?:^|[^a-z0-9])(?P<label>\d{3}[a-z]{2,5})[-_ ]?(?P<number>\d{3,5})(?:$|[^0-9])",
            LabelSource::Captured,
        ),
        (
            "label-dash-number",
            r"(?i)(?:^|[^a-z0-9])(?P<label>[a-z]{2,8})[-_ ](?P<number>\d{2,5})(?:$|[^0-9])",
            LabelSource::Captured,
        ),
        (
            "label-number-compact",
            r"(?i)(?:^|[^a-z0-9])(?P<label>[a-z]{2,6})(?P<number>\d{3,5})(?:$|[^0-9])",
            LabelSource::Captured,
        ),
    ];
    specs
        .into_iter()
        .map(|(name, pattern, label)| {
            Matcher::new(name, pattern, label).unwrap_or_else(|e| panic!("matcher {name}: {e}"))
        })
        .collect()
});

static PART_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[-_ .\[(]*(?:cd|part|pt|disc|disk)[-_ .]?(?P<part>\d{1,2})(?:$|[^0-9])")
        .unwrap_or_else(|e| panic!("part keyword pattern: {e}"))
});

static PART_BARE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[-_](?P<part>\d{1,2})(?:$|[^0-9a-z])")
        .unwrap_or_else(|e| panic!("bare part pattern: {e}"))
});

static PART_LETTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[-_ ]?(?P<letter>[a-f])$")
        .unwrap_or_else(|e| panic!("letter part pattern: {e}"))
});

/// Part index from the tail following a catalog number. Absent or zero → 1.
pub fn parse_part(rest: &str) -> u32 {
    let numeric = PART_KEYWORD
        .captures(rest)
        .or_else(|| PART_BARE.captures(rest))
        .and_then(|c| c.name("part"))
        .and_then(|m| m.as_str().parse::<u32>().ok());
    if let Some(n) = numeric {
        return n.max(1);
    }
    PART_LETTER
        .captures(rest.trim_end())
        .and_then(|c| c.name("letter"))
        .and_then(|m| m.as_str().chars().next())
        .map(|c| u32::from(c.to_ascii_uppercase() as u8 - b'A') + 1)
        .unwrap_or(1)
}
