use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

/// Plate patterns in priority order. The first pattern with a match anywhere
/// in the text wins, even if a later one would match a better substring.
const PATTERNS: [&str; 6] = [
    r"[A-Z]{3}[0-9]{4}",
    r"[A-Z]{2}[0-9]{5}",
    r"[A-Z]{2}[0-9]{4}",
    r"[A-Z]{3}[0-9]{3}",
    r"[A-Z]{2,3}\s*[0-9]{3,4}",
    r"[A-Z]{2,3}-[0-9]{3,4}",
];

static RULES: Lazy<Vec<Regex>> =
    Lazy::new(|| PATTERNS.iter().map(|p| Regex::new(p).unwrap()).collect());

/// A normalized registration: non-empty, `A-Z` and `0-9` only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Plate(String);

impl Plate {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Plate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Finds the plate in raw OCR output. `None` means no plate was detected.
pub fn extract(text: &str) -> Option<Plate> {
    let upper = text.to_ascii_uppercase();
    RULES.iter().enumerate().find_map(|(i, rule)| {
        rule.find(&upper).and_then(|m| {
            debug!("Plate rule {} matched {:?}", i + 1, m.as_str());
            normalize(m.as_str())
        })
    })
}

/// Uppercases and strips everything but ASCII letters and digits.
pub fn normalize(text: &str) -> Option<Plate> {
    let plate: String = text
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if plate.is_empty() {
        None
    } else {
        Some(Plate(plate))
    }
}
