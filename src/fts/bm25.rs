//! BM25 scoring functions.
//!
//! BM25 scores are **higher is better**. Postings keep raw term frequency
//! and document length so that the length-normalized term weight can be
//! computed against whatever average document length the query sees.

use serde::{Deserialize, Serialize};

use crate::error::{FtsError, Result};

/// BM25 parameters for an index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term-frequency saturation. Default 1.2.
    pub k1: f32,
    /// Document-length normalization. Default 0.75.
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

impl Bm25Params {
    pub fn new(k1: f32, b: f32) -> Result<Self> {
        let params = Self { k1, b };
        params.validate()?;
        Ok(params)
    }

    /// `k1` must be positive and finite, `b` must lie in `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if !self.k1.is_finite() || self.k1 <= 0.0 {
            return Err(FtsError::InvalidIndexParam {
                param: "bm25_k1".into(),
                reason: format!("must be a positive number, got {}", self.k1),
            });
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(FtsError::InvalidIndexParam {
                param: "bm25_b".into(),
                reason: format!("must be within [0, 1], got {}", self.b),
            });
        }
        Ok(())
    }
}

/// Compute Inverse Document Frequency for a term.
///
///   IDF(t) = ln((N - df(t) + 0.5) / (df(t) + 0.5) + 1)
///
/// Always positive, even when every document contains the term.
#[must_use]
pub fn idf(total_docs: u64, doc_freq: u64) -> f32 {
    let n = total_docs as f64;
    let df = doc_freq as f64;
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln() as f32
}

/// Length-normalized term weight of a term occurring `term_freq` times in a
/// document of `doc_length` tokens:
///
///   tf * (k1 + 1) / (tf + k1 * (1 - b + b * |D| / avgdl))
///
/// Monotonically non-decreasing in `term_freq` and non-increasing in
/// `doc_length`; traversal upper bounds rely on both.
#[must_use]
pub fn tf_weight(term_freq: u32, doc_length: u32, avg_doc_length: f32, params: &Bm25Params) -> f32 {
    let tf = term_freq as f32;
    let dl = doc_length as f32;
    let avgdl = if avg_doc_length > 0.0 {
        avg_doc_length
    } else {
        1.0
    };

    let numerator = tf * (params.k1 + 1.0);
    let denominator = tf + params.k1 * (1.0 - params.b + params.b * dl / avgdl);

    if denominator <= 0.0 {
        return 0.0;
    }

    numerator / denominator
}

/// BM25 contribution of a single term in a single document.
#[must_use]
pub fn bm25_term_score(
    term_idf: f32,
    term_freq: u32,
    doc_length: u32,
    avg_doc_length: f32,
    params: &Bm25Params,
) -> f32 {
    term_idf * tf_weight(term_freq, doc_length, avg_doc_length, params)
}
