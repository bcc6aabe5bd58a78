//! OCR confusion correction for identifier-like runs.
//!
//! Inside runs of six or more upper-case letters/digits, `O`, `I` and `L`
//! directly after a digit are read as `0`, `1` and `1`. Text outside such runs
//! is left alone, including labels on the same line (`ID No:` keeps its
//! letters), and letters not preceded by a digit are never rewritten. A
//! genuine letter that follows a digit inside an identifier is still
//! rewritten; that precision loss is accepted.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static IDENTIFIER_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z0-9]{6,}\b").expect("valid identifier run regex"));

/// Apply the digit-context substitution to every identifier-like run.
pub fn correct_identifier_noise(text: &str) -> String {
    IDENTIFIER_RUN
        .replace_all(text, |caps: &Captures| fix_run(&caps[0]))
        .into_owned()
}

fn fix_run(run: &str) -> String {
    let mut out = String::with_capacity(run.len());
    let mut prev_digit = false;
    for c in run.chars() {
        let fixed = match c {
            'O' if prev_digit => '0',
            'I' | 'L' if prev_digit => '1',
            c => c,
        };
        prev_digit = fixed.is_ascii_digit();
        out.push(fixed);
    }
    out
}
