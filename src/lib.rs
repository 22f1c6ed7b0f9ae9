//! textsift: BM25 full-text search over schema-declared collections.
//!
//! A collection's schema declares text fields, their analyzers and BM25
//! functions that turn those fields into sparse vectors. Rows are written
//! into growing segments, sealed into immutable ones, and searched with
//! exhaustive or WAND traversal, optionally fused with other vector
//! searches.

pub mod cancel;
pub mod catalog;
pub mod collection;
pub mod config;
pub mod error;
pub mod fts;
pub mod index;
pub mod logging;
pub mod metrics;
pub mod query;
pub mod schema;
pub mod segment;
pub mod types;

pub use cancel::CancelToken;
pub use catalog::CollectionManager;
pub use collection::{Collection, CollectionStats};
pub use config::Config;
pub use error::{FtsError, Result};
pub use index::{IndexParams, MetricType};
pub use query::{HybridSearchRequest, Ranker, SearchIterator, SearchRequest};
pub use schema::{CollectionSchema, FieldSpec, FunctionSpec};
pub use types::{DataType, FieldValue, PrimaryKey, Row, SearchResult, SparseVector, WriteResult};
