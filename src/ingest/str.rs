use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::PrimitiveKind;

/// String observations at one path.
#[derive(Clone, Debug, Default)]
pub struct StringShape {
    /// Distinct literals, capped at [`MAX_STR_LITS`].
    pub lits: BTreeSet<String>,
    pub lits_overflowed: bool,
    pub observations: u64,
    /// Every transformed kind seen; `String` when a literal matched none.
    pub kinds: BTreeSet<PrimitiveKind>,
}

// ------------------------------- Policy ---------------------------------- //

const MAX_STR_LITS: usize = 64;
pub(crate) const STRING_ENUM_MAX: usize = 8;
const STRING_ENUM_MAX_LEN: usize = 16;

static UUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .unwrap_or_else(|error| crate::internal_error!("uuid pattern: {error}"))
});

// ------------------------------ Observe ---------------------------------- //

impl StringShape {
    pub fn observe(&mut self, s: &str) {
        self.observations += 1;
        self.kinds.insert(classify(s));
        if self.lits.len() < MAX_STR_LITS {
            self.lits.insert(s.to_string());
        } else if !self.lits.contains(s) {
            self.lits_overflowed = true;
        }
    }

    /// The single primitive all observations agree on.
    pub fn primitive(&self) -> PrimitiveKind {
        match self.kinds.iter().collect::<Vec<_>>().as_slice() {
            [only] => **only,
            _ => PrimitiveKind::String,
        }
    }

    /// Literals that read like a small, closed set of labels.
    ///
    /// Only plain strings qualify, and some literal must repeat.
    pub fn enum_cases(&self) -> Option<&BTreeSet<String>> {
        let qualifies = self.primitive() == PrimitiveKind::String
            && !self.lits_overflowed
            && !self.lits.is_empty()
            && self.lits.len() <= STRING_ENUM_MAX
            && self.observations > self.lits.len() as u64
            && self.lits.iter().all(|s| looks_humanish(s));
        qualifies.then_some(&self.lits)
    }
}

/// The most specific primitive a single string literal fits.
pub fn classify(s: &str) -> PrimitiveKind {
    if s == "true" || s == "false" {
        PrimitiveKind::BoolString
    } else if looks_like_integer(s) {
        PrimitiveKind::IntegerString
    } else if UUID.is_match(s) {
        PrimitiveKind::Uuid
    } else if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() {
        PrimitiveKind::Date
    } else if looks_like_time(s) {
        PrimitiveKind::Time
    } else if looks_like_date_time(s) {
        PrimitiveKind::DateTime
    } else if looks_like_uri(s) {
        PrimitiveKind::Uri
    } else {
        PrimitiveKind::String
    }
}

fn looks_like_integer(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.len() <= 18 && digits.bytes().all(|b| b.is_ascii_digit())
}

fn looks_like_time(s: &str) -> bool {
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f").is_ok()
}

fn looks_like_date_time(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").is_ok()
}

pub fn looks_like_uri(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
        || s.starts_with("mailto:") || s.starts_with("tel:")
}

pub fn looks_humanish(s: &str) -> bool {
    // letters/digits/space/dash/underscore and not too long
    !s.is_empty()
        && s.len() <= STRING_ENUM_MAX_LEN
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '-' || c == '_')
}
