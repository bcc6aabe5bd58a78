//! Canonicalization of extracted field values.
//!
//! Each stage takes a map and returns a new one:
//! [`normalize_values`] cleans every value according to its field kind, then
//! [`finalize_fields`] drops unusable values and promotes `surname` to
//! `full_name` when the latter was not extracted directly.

use chrono::{Datelike, NaiveDate};
use kyc_core::FieldMap;

/// How a field's value is cleaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Name,
    Identifier,
    Date,
    Address,
    Gender,
    Other,
}

impl FieldKind {
    pub fn of(field_name: &str) -> Self {
        match field_name {
            "full_name" | "surname" | "given_names" | "nationality" | "place_of_birth" => {
                Self::Name
            }
            "id_number" | "passport_number" | "license_number" | "document_number" => {
                Self::Identifier
            }
            "date_of_birth" | "issue_date" | "expiry_date" => Self::Date,
            "address" => Self::Address,
            "gender" => Self::Gender,
            _ => Self::Other,
        }
    }
}

/// Date layouts tried in order: ISO, day-first, month-first, two-digit years,
/// then textual months. The first layout that consumes the whole value wins.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d",
    "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y",
    "%m/%d/%Y", "%m-%d-%Y", "%m.%d.%Y",
    "%d/%m/%y", "%d-%m-%y", "%d.%m.%y",
    "%m/%d/%y", "%m-%d-%y", "%m.%d.%y",
    "%d %B %Y", "%d %b %Y", "%d-%b-%Y",
    "%B %d, %Y", "%b %d, %Y", "%B %d %Y", "%b %d %Y",
];

/// Collapse runs of whitespace into single spaces and trim.
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep letters, whitespace, hyphens and apostrophes; title-case each word part.
pub fn normalize_name(value: &str) -> String {
    let kept: String = value
        .chars()
        .filter(|c| c.is_alphabetic() || c.is_whitespace() || *c == '-' || *c == '\'')
        .collect();
    title_case(&collapse_whitespace(&kept))
}

fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut word_start = true;
    for c in value.chars() {
        if word_start {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        word_start = !c.is_alphabetic();
    }
    out
}

/// Alphanumerics only, upper-cased.
pub fn normalize_identifier(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Parse a date in any supported layout and render it as `YYYY-MM-DD`.
///
/// Unparseable input is returned unchanged.
pub fn normalize_date(value: &str) -> String {
    parse_date(value)
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| value.to_string())
}

/// First layout in [`DATE_FORMATS`] that parses the whole value.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let cleaned = collapse_whitespace(value);
    // Textual months may carry an abbreviation dot ("12 MAR. 1988")
    let cleaned = if cleaned.chars().any(|c| c.is_alphabetic()) {
        cleaned.replace('.', "")
    } else {
        cleaned
    };
    DATE_FORMATS.iter().find_map(|format| {
        NaiveDate::parse_from_str(&cleaned, format)
            .ok()
            // %Y also accepts short years; those belong to the %y layouts
            .filter(|date| !format.contains("%Y") || date.year() >= 1000)
    })
}

/// Newlines become `, `; whitespace collapses; trailing separators go.
pub fn normalize_address(value: &str) -> String {
    let joined = value
        .lines()
        .map(|line| collapse_whitespace(line))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    joined
        .trim_end_matches(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .to_string()
}

pub fn normalize_gender(value: &str) -> String {
    match collapse_whitespace(value).to_ascii_uppercase().as_str() {
        "M" | "MALE" => "Male".to_string(),
        "F" | "FEMALE" => "Female".to_string(),
        "X" => "Unspecified".to_string(),
        other => title_case(other),
    }
}

/// Normalize one value according to its field's kind.
pub fn normalize_value(field_name: &str, value: &str) -> String {
    match FieldKind::of(field_name) {
        FieldKind::Name => normalize_name(value),
        FieldKind::Identifier => normalize_identifier(value),
        FieldKind::Date => normalize_date(&collapse_whitespace(value)),
        FieldKind::Address => normalize_address(value),
        FieldKind::Gender => normalize_gender(value),
        FieldKind::Other => collapse_whitespace(value),
    }
}

/// Per-field cleaning stage.
pub fn normalize_values(fields: &FieldMap) -> FieldMap {
    fields
        .iter()
        .map(|(name, value)| (name.clone(), normalize_value(name, value)))
        .collect()
}

/// Post-pass: drop values of one character or less, then rename `surname`
/// to `full_name` when no `full_name` was extracted.
pub fn finalize_fields(fields: FieldMap) -> FieldMap {
    let mut fields: FieldMap = fields
        .into_iter()
        .filter(|(_, value)| value.chars().count() > 1)
        .collect();

    if !fields.contains_key("full_name") {
        if let Some(surname) = fields.remove("surname") {
            fields.insert("full_name".to_string(), surname);
        }
    }
    fields
}

/// Both stages in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueNormalizer;

impl ValueNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, fields: &FieldMap) -> FieldMap {
        finalize_fields(normalize_values(fields))
    }
}
