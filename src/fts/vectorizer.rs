//! Token streams to BM25 sparse vectors.
//!
//! Terms are mapped to 32-bit dimensions by hashing, so ingest and query
//! agree on term ids without a shared dictionary.

use std::collections::BTreeMap;

use xxhash_rust::xxh3::xxh3_64;

use crate::fts::bm25::{tf_weight, Bm25Params};
use crate::fts::stats::CorpusStatistics;
use crate::fts::tokenizer::Token;
use crate::types::SparseVector;

/// Sparse vector whose dimensions are term ids.
pub type SparseTermVector = SparseVector;

/// Dimension of `term` in every BM25 sparse vector.
///
/// The low 32 bits of xxh3, to fit the `u32` dimensions of
/// [`SparseVector`]. Distinct terms can share a dimension; across a
/// vocabulary of `n` terms the chance of any collision is about
/// `n² / 2³³`, and colliding terms score as one term.
#[must_use]
pub fn term_id(term: &str) -> u32 {
    xxh3_64(term.as_bytes()) as u32
}

/// Per-document term frequencies and length, the unit of inverted index
/// ingest and corpus statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentTerms {
    pub term_freqs: BTreeMap<u32, u32>,
    /// Total token count after filtering.
    pub length: u32,
}

impl DocumentTerms {
    pub fn from_tokens(tokens: &[Token]) -> Self {
        let mut term_freqs = BTreeMap::new();
        for token in tokens {
            *term_freqs.entry(term_id(&token.term)).or_insert(0u32) += 1;
        }
        Self {
            term_freqs,
            length: tokens.len() as u32,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// BM25 document vector: each distinct term weighted by its
/// length-normalized term frequency against the corpus average length.
///
/// The idf factor is applied on the query side.
#[must_use]
pub fn vectorize_document(
    tokens: &[Token],
    stats: &CorpusStatistics,
    params: &Bm25Params,
) -> SparseTermVector {
    document_vector(&DocumentTerms::from_tokens(tokens), stats.avg_doc_length(), params)
}

pub fn document_vector(
    terms: &DocumentTerms,
    avg_doc_length: f32,
    params: &Bm25Params,
) -> SparseTermVector {
    terms
        .term_freqs
        .iter()
        .map(|(&term, &tf)| (term, tf_weight(tf, terms.length, avg_doc_length, params)))
        .collect()
}

/// Query vector: raw occurrence count per distinct term.
#[must_use]
pub fn vectorize_query(tokens: &[Token]) -> SparseTermVector {
    let mut counts: BTreeMap<u32, f32> = BTreeMap::new();
    for token in tokens {
        *counts.entry(term_id(&token.term)).or_insert(0.0) += 1.0;
    }
    SparseVector(counts)
}
