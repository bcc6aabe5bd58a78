//! Per-document-type field patterns.
//!
//! Rules are static data compiled once into a lazy table. Every pattern is
//! compiled case-insensitive and multi-line; capture group 1 is the value.
//! For each field the first alternative that matches anywhere in the text wins.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error};

use kyc_core::FieldMap;

/// Date value alternatives shared by every date field.
macro_rules! date_value {
    () => {
        r"(\d{1,2}[/\-.]\d{1,2}[/\-.]\d{2,4}|\d{4}[/\-.]\d{1,2}[/\-.]\d{1,2}|\d{1,2}[ \-][A-Z]{3,9}\.?[ \-]\d{4}|[A-Z]{3,9}\.? \d{1,2},? \d{4})"
    };
}

/// Label separator: optional `No`/`Number`/`#`, optional period, optional colon.
macro_rules! sep {
    () => {
        r"\s*[:.#]?\s*"
    };
}

/// One field of one document type with its ordered pattern alternatives.
#[derive(Debug, Clone, Copy)]
pub struct FieldPatternRule {
    pub document_type: &'static str,
    pub field_name: &'static str,
    pub patterns: &'static [&'static str],
}

const FULL_NAME: &[&str] = &[
    concat!(r"^[ \t]*(?:Full[ \t]*)?Name", sep!(), r"([A-Z][A-Z .'\-]*[A-Z])[ \t]*$"),
    concat!(r"^[ \t]*Holder(?:'s)?[ \t]*Name", sep!(), r"([A-Z][A-Z .'\-]*[A-Z])[ \t]*$"),
];

const SURNAME: &[&str] = &[concat!(
    r"^[ \t]*(?:Surname|Last[ \t]*Name|Family[ \t]*Name)",
    sep!(),
    r"([A-Z][A-Z '\-]*[A-Z])[ \t]*$"
)];

const GIVEN_NAMES: &[&str] = &[concat!(
    r"^[ \t]*(?:Given[ \t]*Names?|First[ \t]*Names?|Forenames?)",
    sep!(),
    r"([A-Z][A-Z '\-]*[A-Z])[ \t]*$"
)];

const DATE_OF_BIRTH: &[&str] = &[
    concat!(r"(?:Date[ \t]*of[ \t]*Birth|Birth[ \t]*Date)", sep!(), date_value!()),
    concat!(r"\b(?:DOB|D\.O\.B\.?)", sep!(), date_value!()),
    concat!(r"\bBorn(?:[ \t]*on)?", sep!(), date_value!()),
];

const NATIONALITY: &[&str] = &[concat!(
    r"^[ \t]*(?:Nationality|Citizenship)",
    sep!(),
    r"([A-Z]+(?:[ \-][A-Z]+)?)"
)];

const GENDER: &[&str] = &[concat!(
    r"^[ \t]*(?:Sex|Gender)",
    sep!(),
    r"(Female|Male|F|M|X)\b"
)];

const ADDRESS: &[&str] = &[concat!(
    r"^[ \t]*(?:(?:Residential|Home|Permanent|Postal)[ \t]*)?Address",
    sep!(),
    // Up to two continuation lines that carry no label
    r"([^\n]+(?:\n[^:\n]+){0,2})"
)];

const ISSUE_DATE: &[&str] = &[concat!(
    r"(?:Date[ \t]*of[ \t]*Issue|Issue[ \t]*Date|Issued(?:[ \t]*On)?|Statement[ \t]*Date|Bill[ \t]*Date)",
    sep!(),
    date_value!()
)];

const EXPIRY_DATE: &[&str] = &[concat!(
    r"(?:Date[ \t]*of[ \t]*Expiry|Expiry[ \t]*Date|Expiration[ \t]*Date|Expires(?:[ \t]*On)?|Valid[ \t]*Until)",
    sep!(),
    date_value!()
)];

const PLACE_OF_BIRTH: &[&str] = &[concat!(
    r"^[ \t]*Place[ \t]*of[ \t]*Birth",
    sep!(),
    r"([A-Z][A-Z ,'\-]*[A-Z])[ \t]*$"
)];

/// The rule table, in match order.
pub static FIELD_PATTERN_RULES: &[FieldPatternRule] = &[
    // national_id
    FieldPatternRule {
        document_type: "national_id",
        field_name: "id_number",
        patterns: &[
            concat!(
                r"\b(?:National[ \t]*ID|Identity[ \t]*Card|ID[ \t]*Card|ID)\b[ \t]*(?:No|Number|Num)?\.?",
                sep!(),
                r"([A-Z0-9][A-Z0-9\-]{3,20}[A-Z0-9])\b"
            ),
            concat!(
                r"^[ \t]*(?:Document|Card|Personal)[ \t]*(?:No|Number)\.?",
                sep!(),
                r"([A-Z0-9][A-Z0-9\-]{3,20}[A-Z0-9])\b"
            ),
        ],
    },
    FieldPatternRule { document_type: "national_id", field_name: "full_name", patterns: FULL_NAME },
    FieldPatternRule { document_type: "national_id", field_name: "surname", patterns: SURNAME },
    FieldPatternRule { document_type: "national_id", field_name: "given_names", patterns: GIVEN_NAMES },
    FieldPatternRule { document_type: "national_id", field_name: "date_of_birth", patterns: DATE_OF_BIRTH },
    FieldPatternRule { document_type: "national_id", field_name: "address", patterns: ADDRESS },
    FieldPatternRule { document_type: "national_id", field_name: "nationality", patterns: NATIONALITY },
    FieldPatternRule { document_type: "national_id", field_name: "gender", patterns: GENDER },
    FieldPatternRule { document_type: "national_id", field_name: "expiry_date", patterns: EXPIRY_DATE },
    // passport
    FieldPatternRule {
        document_type: "passport",
        field_name: "passport_number",
        patterns: &[
            concat!(
                r"\bPassport[ \t]*(?:No|Number|Num|#)\.?",
                sep!(),
                r"([A-Z0-9]{6,9})\b"
            ),
            concat!(
                r"^[ \t]*Document[ \t]*(?:No|Number)\.?",
                sep!(),
                r"([A-Z0-9]{6,9})\b"
            ),
        ],
    },
    FieldPatternRule { document_type: "passport", field_name: "surname", patterns: SURNAME },
    FieldPatternRule { document_type: "passport", field_name: "given_names", patterns: GIVEN_NAMES },
    FieldPatternRule { document_type: "passport", field_name: "full_name", patterns: FULL_NAME },
    FieldPatternRule { document_type: "passport", field_name: "nationality", patterns: NATIONALITY },
    FieldPatternRule { document_type: "passport", field_name: "date_of_birth", patterns: DATE_OF_BIRTH },
    FieldPatternRule { document_type: "passport", field_name: "place_of_birth", patterns: PLACE_OF_BIRTH },
    FieldPatternRule { document_type: "passport", field_name: "gender", patterns: GENDER },
    FieldPatternRule { document_type: "passport", field_name: "issue_date", patterns: ISSUE_DATE },
    FieldPatternRule { document_type: "passport", field_name: "expiry_date", patterns: EXPIRY_DATE },
    // drivers_license
    FieldPatternRule {
        document_type: "drivers_license",
        field_name: "license_number",
        patterns: &[
            concat!(
                r"\b(?:Driver'?s?[ \t]*)?Licen[cs]e[ \t]*(?:No|Number|Num|#)\.?",
                sep!(),
                r"([A-Z0-9][A-Z0-9\-]{4,18}[A-Z0-9])\b"
            ),
            concat!(
                r"\b(?:DLN|DL[ \t]*(?:No|#)\.?)",
                sep!(),
                r"([A-Z0-9][A-Z0-9\-]{4,18}[A-Z0-9])\b"
            ),
        ],
    },
    FieldPatternRule { document_type: "drivers_license", field_name: "full_name", patterns: FULL_NAME },
    FieldPatternRule { document_type: "drivers_license", field_name: "surname", patterns: SURNAME },
    FieldPatternRule { document_type: "drivers_license", field_name: "given_names", patterns: GIVEN_NAMES },
    FieldPatternRule { document_type: "drivers_license", field_name: "date_of_birth", patterns: DATE_OF_BIRTH },
    FieldPatternRule { document_type: "drivers_license", field_name: "address", patterns: ADDRESS },
    FieldPatternRule { document_type: "drivers_license", field_name: "issue_date", patterns: ISSUE_DATE },
    FieldPatternRule { document_type: "drivers_license", field_name: "expiry_date", patterns: EXPIRY_DATE },
    // proof_of_address
    FieldPatternRule {
        document_type: "proof_of_address",
        field_name: "full_name",
        patterns: &[
            concat!(r"^[ \t]*(?:Full[ \t]*)?Name", sep!(), r"([A-Z][A-Z .'\-]*[A-Z])[ \t]*$"),
            concat!(
                r"^[ \t]*(?:Account[ \t]*Holder|Customer[ \t]*Name|Bill[ \t]*To)",
                sep!(),
                r"([A-Z][A-Z .'\-]*[A-Z])[ \t]*$"
            ),
        ],
    },
    FieldPatternRule { document_type: "proof_of_address", field_name: "address", patterns: ADDRESS },
    FieldPatternRule { document_type: "proof_of_address", field_name: "issue_date", patterns: ISSUE_DATE },
];

struct CompiledRule {
    document_type: &'static str,
    field_name: &'static str,
    patterns: Vec<Regex>,
}

static COMPILED_RULES: Lazy<Vec<CompiledRule>> = Lazy::new(|| {
    FIELD_PATTERN_RULES
        .iter()
        .map(|rule| CompiledRule {
            document_type: rule.document_type,
            field_name: rule.field_name,
            patterns: rule
                .patterns
                .iter()
                .filter_map(|pattern| match Regex::new(&format!("(?im){}", pattern)) {
                    Ok(regex) => Some(regex),
                    Err(e) => {
                        error!(
                            document_type = rule.document_type,
                            field = rule.field_name,
                            error = %e,
                            "Invalid field pattern skipped"
                        );
                        None
                    }
                })
                .collect(),
        })
        .collect()
});

/// Applies the rule table to recognized text.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldPatternMatcher;

impl FieldPatternMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Document types with at least one rule, in table order.
    pub fn document_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = Vec::new();
        for rule in FIELD_PATTERN_RULES {
            if !types.contains(&rule.document_type) {
                types.push(rule.document_type);
            }
        }
        types
    }

    pub fn supports(&self, document_type: &str) -> bool {
        FIELD_PATTERN_RULES
            .iter()
            .any(|rule| rule.document_type == document_type)
    }

    /// Extract raw field values; unknown document types yield an empty map.
    pub fn match_fields(&self, document_type: &str, text: &str) -> FieldMap {
        let mut fields = FieldMap::new();
        for rule in COMPILED_RULES
            .iter()
            .filter(|rule| rule.document_type == document_type)
        {
            for (alternative, pattern) in rule.patterns.iter().enumerate() {
                let value = pattern
                    .captures(text)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().trim())
                    .filter(|v| !v.is_empty());
                if let Some(value) = value {
                    debug!(field = rule.field_name, alternative, "Field pattern matched");
                    fields.insert(rule.field_name.to_string(), value.to_string());
                    break;
                }
            }
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(document_type: &str, text: &str) -> FieldMap {
        FieldPatternMatcher::new().match_fields(document_type, text)
    }

    #[test]
    fn test_every_pattern_compiles() {
        for rule in FIELD_PATTERN_RULES {
            for pattern in rule.patterns {
                assert!(
                    Regex::new(&format!("(?im){}", pattern)).is_ok(),
                    "{}.{} pattern does not compile: {}",
                    rule.document_type,
                    rule.field_name,
                    pattern
                );
            }
        }
    }

    #[test]
    fn test_national_id_sample() {
        let fields = matched("national_id", "ID No: AB1234567\nName: JANE DOE\nDOB: 05/11/1990");
        assert_eq!(fields.get("id_number").map(String::as_str), Some("AB1234567"));
        assert_eq!(fields.get("full_name").map(String::as_str), Some("JANE DOE"));
        assert_eq!(fields.get("date_of_birth").map(String::as_str), Some("05/11/1990"));
        assert_eq!(fields.len(), 3);
    }

    #[test]
    fn test_labels_tolerate_case_and_separators() {
        let fields = matched(
            "national_id",
            "identity card number. X-99812-K\n  full name   mary o'neil  \nDate of Birth 1985-02-28",
        );
        assert_eq!(fields["id_number"], "X-99812-K");
        assert_eq!(fields["full_name"], "mary o'neil");
        assert_eq!(fields["date_of_birth"], "1985-02-28");
    }

    #[test]
    fn test_surname_line_is_not_full_name() {
        let fields = matched("passport", "Surname: DOE\nGiven Names: JANE MARIE");
        assert_eq!(fields["surname"], "DOE");
        assert_eq!(fields["given_names"], "JANE MARIE");
        assert!(!fields.contains_key("full_name"));
    }

    #[test]
    fn test_passport_sample() {
        let text = "PASSPORT\nPassport No: P1234567\nSurname: DOE\nGiven Names: JANE\n\
                    Nationality: UNITED KINGDOM\nDate of Birth: 12 MAR 1988\nSex: F\n\
                    Place of Birth: LONDON\nDate of Issue: 01/02/2020\nDate of Expiry: 01/02/2030";
        let fields = matched("passport", text);
        assert_eq!(fields["passport_number"], "P1234567");
        assert_eq!(fields["nationality"], "UNITED KINGDOM");
        assert_eq!(fields["date_of_birth"], "12 MAR 1988");
        assert_eq!(fields["gender"], "F");
        assert_eq!(fields["place_of_birth"], "LONDON");
        assert_eq!(fields["issue_date"], "01/02/2020");
        assert_eq!(fields["expiry_date"], "01/02/2030");
    }

    #[test]
    fn test_address_takes_unlabelled_continuation_lines() {
        let text = "Name: JOHN SMITH\nAddress: 12 High Street\nFlat 3\nSpringfield\nIssue Date: 03/04/2024";
        let fields = matched("proof_of_address", text);
        assert_eq!(fields["address"], "12 High Street\nFlat 3\nSpringfield");
        assert_eq!(fields["issue_date"], "03/04/2024");
        assert_eq!(fields["full_name"], "JOHN SMITH");
    }

    #[test]
    fn test_first_alternative_wins() {
        let text = "Account Holder: ALICE BROWN\nName: BOB GREEN";
        let fields = matched("proof_of_address", text);
        assert_eq!(fields["full_name"], "BOB GREEN");
    }

    #[test]
    fn test_drivers_license_number() {
        let fields = matched("drivers_license", "DL No. D123-4567-8901\nDOB 1970/01/31");
        assert_eq!(fields["license_number"], "D123-4567-8901");
        assert_eq!(fields["date_of_birth"], "1970/01/31");
    }

    #[test]
    fn test_unknown_document_type_is_empty() {
        assert!(matched("utility_bill", "Name: JANE DOE").is_empty());
        assert!(!FieldPatternMatcher::new().supports("utility_bill"));
    }

    #[test]
    fn test_document_types_listed_once() {
        assert_eq!(
            FieldPatternMatcher::new().document_types(),
            vec!["national_id", "passport", "drivers_license", "proof_of_address"]
        );
    }

    #[test]
    fn test_no_text_no_fields() {
        assert!(matched("passport", "").is_empty());
    }
}
