//! In-memory inverted index for one BM25 field of one segment.
//!
//! Postings hold raw term frequencies; document lengths live in a dense
//! table indexed by segment ordinal. Keeping both raw lets a query score
//! with the average document length of the whole visible corpus rather
//! than the one in effect when the document was ingested.
//!
//! Each posting list tracks its maximum term frequency and minimum
//! document length. Since the BM25 term weight grows with tf and shrinks
//! with length, `tf_weight(max_tf, min_doc_len)` bounds every entry of the
//! list, which is what dynamic pruning needs.

use std::collections::HashMap;

use crate::fts::bm25::{tf_weight, Bm25Params};
use crate::fts::vectorizer::DocumentTerms;
use crate::types::DocId;

/// A single posting: a document and its term frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub doc: DocId,
    pub tf: u32,
}

/// Posting list for a single term, sorted by document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingList {
    entries: Vec<Posting>,
    max_tf: u32,
    min_doc_len: u32,
}

impl Default for PostingList {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            max_tf: 0,
            min_doc_len: u32::MAX,
        }
    }
}

impl PostingList {
    pub fn entries(&self) -> &[Posting] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_tf(&self) -> u32 {
        self.max_tf
    }

    pub fn min_doc_len(&self) -> u32 {
        self.min_doc_len
    }

    /// Largest BM25 term weight any entry of this list can produce.
    pub fn max_weight(&self, avg_doc_length: f32, params: &Bm25Params) -> f32 {
        if self.entries.is_empty() {
            return 0.0;
        }
        tf_weight(self.max_tf, self.min_doc_len, avg_doc_length, params)
    }

    fn push(&mut self, doc: DocId, tf: u32, doc_len: u32) {
        debug_assert!(self.entries.last().map_or(true, |p| p.doc < doc));
        self.entries.push(Posting { doc, tf });
        self.max_tf = self.max_tf.max(tf);
        self.min_doc_len = self.min_doc_len.min(doc_len);
    }
}

/// term id → posting list, plus per-document lengths.
#[derive(Debug, Clone, Default)]
pub struct InvertedIndex {
    postings: HashMap<u32, PostingList>,
    doc_lengths: Vec<u32>,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from documents in ordinal order.
    pub fn build<'a>(docs: impl IntoIterator<Item = &'a DocumentTerms>) -> Self {
        let mut index = Self::new();
        for terms in docs {
            index.append(terms);
        }
        index.compact();
        index
    }

    /// Append the next document and return its ordinal. Documents without
    /// terms still take an ordinal so ordinals stay aligned with rows.
    pub fn append(&mut self, terms: &DocumentTerms) -> DocId {
        let doc = self.doc_lengths.len() as DocId;
        self.doc_lengths.push(terms.length);
        for (&term, &tf) in &terms.term_freqs {
            self.postings
                .entry(term)
                .or_default()
                .push(doc, tf, terms.length);
        }
        doc
    }

    pub fn posting_list(&self, term: u32) -> Option<&PostingList> {
        self.postings.get(&term).filter(|pl| !pl.is_empty())
    }

    pub fn doc_length(&self, doc: DocId) -> u32 {
        self.doc_lengths.get(doc as usize).copied().unwrap_or(0)
    }

    /// Number of documents appended, including empty ones.
    pub fn num_docs(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn num_terms(&self) -> usize {
        self.postings.len()
    }

    /// Release spare capacity; called when a segment is sealed.
    pub fn compact(&mut self) {
        for pl in self.postings.values_mut() {
            pl.entries.shrink_to_fit();
        }
        self.postings.shrink_to_fit();
        self.doc_lengths.shrink_to_fit();
    }
}
