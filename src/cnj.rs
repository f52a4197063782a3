//! CNJ court process numbers.
//!
//! The canonical form is `NNNNNNN-DD.AAAA.J.TR.OOOO` (20 digits). Input may be
//! the canonical form or the bare 20 digits; everything is normalized to the
//! canonical form before it touches storage or the provider.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static CNJ_FORMATTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]{7})-([0-9]{2})\.([0-9]{4})\.([0-9])\.([0-9]{2})\.([0-9]{4})$").expect("valid CNJ regex")
});

static CNJ_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[0-9]{7}-[0-9]{2}\.[0-9]{4}\.[0-9]\.[0-9]{2}\.[0-9]{4}\b").expect("valid CNJ search regex")
});

const CNJ_DIGITS: usize = 20;

/// A validated, normalized CNJ number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cnj(String);

impl Cnj {
    /// Parse a CNJ in canonical or digits-only form.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("CNJ must not be empty".to_string());
        }

        if CNJ_FORMATTED.is_match(trimmed) {
            return Ok(Self(trimmed.to_string()));
        }

        if trimmed.chars().all(|c| c.is_ascii_digit()) {
            if trimmed.len() != CNJ_DIGITS {
                return Err(format!(
                    "expected {CNJ_DIGITS} digits, got {}",
                    trimmed.len()
                ));
            }
            return Ok(Self(format!(
                "{}-{}.{}.{}.{}.{}",
                &trimmed[0..7],
                &trimmed[7..9],
                &trimmed[9..13],
                &trimmed[13..14],
                &trimmed[14..16],
                &trimmed[16..20]
            )));
        }

        Err("expected format NNNNNNN-DD.AAAA.J.TR.OOOO".to_string())
    }

    /// Find the first CNJ mentioned in free text.
    pub fn detect(text: &str) -> Option<Self> {
        CNJ_IN_TEXT
            .find(text)
            .and_then(|m| Self::parse(m.as_str()).ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 20 digits without separators.
    pub fn digits(&self) -> String {
        self.0.chars().filter(char::is_ascii_digit).collect()
    }

    /// Verify the two check digits (ISO 7064 mod 97-10, CNJ Resolution 65/2008).
    ///
    /// Format validation does not require this; providers accept numbers whose
    /// check digits were mistyped at the court of origin.
    pub fn has_valid_check_digits(&self) -> bool {
        let digits = self.digits();
        if digits.len() != CNJ_DIGITS {
            return false;
        }
        let (sequence, rest) = digits.split_at(7);
        let (check, tail) = rest.split_at(2);
        let Ok(expected) = check.parse::<u64>() else {
            return false;
        };

        let mut remainder: u64 = 0;
        for ch in sequence.chars().chain(tail.chars()).chain("00".chars()) {
            let Some(d) = ch.to_digit(10) else {
                return false;
            };
            remainder = (remainder * 10 + u64::from(d)) % 97;
        }
        98 - remainder == expected
    }
}

impl fmt::Display for Cnj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Cnj {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Cnj> for String {
    fn from(value: Cnj) -> Self {
        value.0
    }
}

impl AsRef<str> for Cnj {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
