//! Full-text search: analysis, BM25 weighting, postings and retrieval.
//!
//! Text flows through [`analyzer`] and [`tokenizer`] into
//! [`vectorizer::DocumentTerms`], which are appended to an
//! [`inverted_index::InvertedIndex`] and counted in
//! [`stats::CorpusStatistics`]. Queries are scored by [`traversal`].

pub mod analyzer;
pub mod bm25;
pub mod inverted_index;
pub mod stats;
pub mod tokenizer;
pub mod traversal;
pub mod vectorizer;

pub use analyzer::{Analyzer, AnalyzerRegistry, FieldAnalyzer, MultiAnalyzer};
pub use bm25::Bm25Params;
pub use inverted_index::InvertedIndex;
pub use stats::{CorpusStatistics, QueryStatistics};
pub use traversal::{QueryTerm, Retrieval, ScoreBand, TraversalStrategy};
