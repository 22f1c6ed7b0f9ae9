//! Corpus statistics feeding idf and length normalization.
//!
//! Each segment owns a [`CorpusStatistics`] accumulator that is updated on
//! the ingest path under the segment's write lock. Queries merge the
//! accumulators of every segment they see into a [`QueryStatistics`],
//! restricted to the query's terms, so idf always reflects the whole
//! visible corpus.

use std::collections::HashMap;

use crate::fts::bm25;
use crate::fts::vectorizer::DocumentTerms;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorpusStatistics {
    doc_count: u64,
    total_length: u64,
    doc_freqs: HashMap<u32, u64>,
}

impl CorpusStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&mut self, terms: &DocumentTerms) {
        self.doc_count += 1;
        self.total_length += u64::from(terms.length);
        for &term in terms.term_freqs.keys() {
            *self.doc_freqs.entry(term).or_insert(0) += 1;
        }
    }

    pub fn doc_count(&self) -> u64 {
        self.doc_count
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn doc_freq(&self, term: u32) -> u64 {
        self.doc_freqs.get(&term).copied().unwrap_or(0)
    }

    pub fn avg_doc_length(&self) -> f32 {
        if self.doc_count == 0 {
            0.0
        } else {
            (self.total_length as f64 / self.doc_count as f64) as f32
        }
    }

    /// Statistics restricted to `terms`.
    pub fn partial(&self, terms: &[u32]) -> QueryStatistics {
        QueryStatistics {
            doc_count: self.doc_count,
            total_length: self.total_length,
            doc_freqs: terms.iter().map(|&t| (t, self.doc_freq(t))).collect(),
        }
    }
}

/// Statistics seen by one query: corpus totals plus document frequency of
/// the query terms, merged across segments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryStatistics {
    doc_count: u64,
    total_length: u64,
    doc_freqs: HashMap<u32, u64>,
}

impl QueryStatistics {
    pub fn merge(&mut self, other: &QueryStatistics) {
        self.doc_count += other.doc_count;
        self.total_length += other.total_length;
        for (&term, &df) in &other.doc_freqs {
            *self.doc_freqs.entry(term).or_insert(0) += df;
        }
    }

    /// Take back one document counted by the accumulator this was
    /// derived from. Only the tracked terms are adjusted.
    pub fn remove_document(&mut self, terms: &DocumentTerms) {
        self.doc_count = self.doc_count.saturating_sub(1);
        self.total_length = self.total_length.saturating_sub(u64::from(terms.length));
        for (term, df) in self.doc_freqs.iter_mut() {
            if terms.term_freqs.contains_key(term) {
                *df = df.saturating_sub(1);
            }
        }
    }

    pub fn doc_count(&self) -> u64 {
        self.doc_count
    }

    pub fn doc_freq(&self, term: u32) -> u64 {
        self.doc_freqs.get(&term).copied().unwrap_or(0)
    }

    pub fn avg_doc_length(&self) -> f32 {
        if self.doc_count == 0 {
            0.0
        } else {
            (self.total_length as f64 / self.doc_count as f64) as f32
        }
    }

    /// idf of `term`, or `None` when no visible document contains it.
    pub fn idf(&self, term: u32) -> Option<f32> {
        match self.doc_freq(term) {
            0 => None,
            df => Some(bm25::idf(self.doc_count, df)),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn doc(terms: &[(u32, u32)]) -> DocumentTerms {
        let term_freqs: BTreeMap<u32, u32> = terms.iter().copied().collect();
        let length = term_freqs.values().sum();
        DocumentTerms { term_freqs, length }
    }

    #[test]
    fn test_accumulates() {
        let mut stats = CorpusStatistics::new();
        stats.add_document(&doc(&[(1, 2), (2, 1)]));
        stats.add_document(&doc(&[(1, 1)]));
        assert_eq!(stats.doc_count(), 2);
        assert_eq!(stats.total_length(), 4);
        assert_eq!(stats.doc_freq(1), 2);
        assert_eq!(stats.doc_freq(2), 1);
        assert_eq!(stats.doc_freq(3), 0);
        assert!((stats.avg_doc_length() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_avg_is_zero() {
        assert_eq!(CorpusStatistics::new().avg_doc_length(), 0.0);
    }

    #[test]
    fn test_merge_matches_single_corpus() {
        let docs = [doc(&[(1, 2), (2, 1)]), doc(&[(1, 1)]), doc(&[(3, 4)])];

        let mut whole = CorpusStatistics::new();
        for d in &docs {
            whole.add_document(d);
        }

        let mut left = CorpusStatistics::new();
        left.add_document(&docs[0]);
        let mut right = CorpusStatistics::new();
        right.add_document(&docs[1]);
        right.add_document(&docs[2]);

        let terms = [1, 2, 3];
        let mut merged = left.partial(&terms);
        merged.merge(&right.partial(&terms));

        assert_eq!(merged, whole.partial(&terms));
        assert_eq!(merged.idf(1), whole.partial(&terms).idf(1));
    }

    #[test]
    fn test_remove_document_rewinds_partial() {
        let docs = [doc(&[(1, 2), (2, 1)]), doc(&[(1, 1)])];
        let mut before = CorpusStatistics::new();
        before.add_document(&docs[0]);
        let mut after = before.clone();
        after.add_document(&docs[1]);

        let mut rewound = after.partial(&[1, 2]);
        rewound.remove_document(&docs[1]);
        assert_eq!(rewound, before.partial(&[1, 2]));
    }

    #[test]
    fn test_idf_absent_term() {
        let mut stats = CorpusStatistics::new();
        stats.add_document(&doc(&[(1, 1)]));
        let q = stats.partial(&[1, 9]);
        assert!(q.idf(1).unwrap() > 0.0);
        assert!(q.idf(9).is_none());
    }
}
