//! Heuristic confidence score for an extraction.
//!
//! ```text
//! confidence = min(100, 100 × (0.3·min(len/500, 1) + 0.4·min(fields/5, 1) + 0.3·quality))
//! quality    = (alphanumeric + whitespace chars) / chars
//! ```
//!
//! Lengths are counted in chars. Empty text scores 0.0 regardless of fields.

use kyc_core::defaults::{
    SCORE_FIELD_SATURATION, SCORE_TEXT_LENGTH_SATURATION, SCORE_WEIGHT_FIELD_COVERAGE,
    SCORE_WEIGHT_TEXT_LENGTH, SCORE_WEIGHT_TEXT_QUALITY,
};

/// Share of chars that are alphanumeric or whitespace; 0.0 for empty text.
pub fn text_quality(text: &str) -> f64 {
    let (total, clean) = text.chars().fold((0usize, 0usize), |(total, clean), c| {
        let ok = c.is_alphanumeric() || c.is_whitespace();
        (total + 1, clean + ok as usize)
    });
    if total == 0 {
        0.0
    } else {
        clean as f64 / total as f64
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceScorer;

impl ConfidenceScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score in `[0, 100]`, rounded to two decimals.
    pub fn score(&self, raw_text: &str, field_count: usize) -> f64 {
        let length = raw_text.chars().count();
        if length == 0 {
            return 0.0;
        }
        let length_factor = (length as f64 / SCORE_TEXT_LENGTH_SATURATION).min(1.0);
        let field_factor = (field_count as f64 / SCORE_FIELD_SATURATION).min(1.0);
        let quality = text_quality(raw_text);

        let raw = 100.0
            * (SCORE_WEIGHT_TEXT_LENGTH * length_factor
                + SCORE_WEIGHT_FIELD_COVERAGE * field_factor
                + SCORE_WEIGHT_TEXT_QUALITY * quality);
        (raw.min(100.0) * 100.0).round() / 100.0
    }
}
