//! Message formatting: pluralized labels, positional templates and the
//! "searching" throbber.

use fancy_regex::Regex;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Number of throbber frames; frame `k` shows `k` leading dots.
pub const THROBBER_FRAMES: u64 = 4;

/// Naming for one level's count.
///
/// Deserializes from a JSON string (`"hit"`), a two element array
/// (`["match", "matches"]`) or a three element array
/// (`["resul", "t", "ts"]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Label {
    /// Regular English noun: `-y` becomes `-ies`, anything else gains `s`.
    Simple(String),
    /// Explicit singular and plural.
    Pair(String, String),
    /// Shared stem followed by a singular or plural suffix.
    PrefixedPair(String, String, String),
}

impl Label {
    pub fn simple(word: impl Into<String>) -> Self {
        Self::Simple(word.into())
    }

    pub fn pair(singular: impl Into<String>, plural: impl Into<String>) -> Self {
        Self::Pair(singular.into(), plural.into())
    }

    pub fn prefixed(
        prefix: impl Into<String>,
        singular: impl Into<String>,
        plural: impl Into<String>,
    ) -> Self {
        Self::PrefixedPair(prefix.into(), singular.into(), plural.into())
    }

    pub fn pluralize(&self, count: usize) -> String {
        pluralize(self, count)
    }
}

impl From<&str> for Label {
    fn from(word: &str) -> Self {
        Self::Simple(word.to_string())
    }
}

pub fn pluralize(label: &Label, count: usize) -> String {
    let one = count == 1;
    match label {
        Label::PrefixedPair(prefix, singular, plural) => {
            format!("{prefix}{}", if one { singular } else { plural })
        }
        Label::Pair(singular, plural) => (if one { singular } else { plural }).clone(),
        Label::Simple(word) => {
            if one {
                word.clone()
            } else if let Some(stem) = word.strip_suffix('y') {
                format!("{stem}ies")
            } else {
                format!("{word}s")
            }
        }
    }
}

fn placeholder_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceCell<Regex> = OnceCell::new();
    PATTERN.get_or_try_init(|| {
        Regex::new(r"\{(\d+)\}").map_err(|err| Error::Template(err.to_string()))
    })
}

/// Substitutes `{n}` with `args[n]`. Placeholders without a matching
/// argument are left as written.
pub fn format_template<S: AsRef<str>>(template: &str, args: &[S]) -> Result<String> {
    let pattern = placeholder_pattern()?;
    let mut out = String::with_capacity(template.len());
    let mut last = 0usize;

    for captures in pattern.captures_iter(template) {
        let captures = captures.map_err(|err| Error::Template(err.to_string()))?;
        let (Some(whole), Some(index)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        out.push_str(&template[last..whole.start()]);
        match index
            .as_str()
            .parse::<usize>()
            .ok()
            .and_then(|index| args.get(index))
        {
            Some(arg) => out.push_str(arg.as_ref()),
            None => out.push_str(whole.as_str()),
        }
        last = whole.end();
    }

    out.push_str(&template[last..]);
    Ok(out)
}

/// Upper-cases the first character.
pub fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Throbber frame for the given tick: `k` dots, a space, then `3 - k` dots.
pub fn throbber(updates: u64) -> String {
    let lead = (updates % THROBBER_FRAMES) as usize;
    let trail = (THROBBER_FRAMES as usize) - lead - 1;
    format!("{} {}", ".".repeat(lead), ".".repeat(trail))
}
