//! Index declarations and vector search for non-text fields.
//!
//! BM25 output fields are served by [`crate::fts`]; everything else that
//! carries a vector goes through [`ann::AnnIndex`].

pub mod ann;
pub mod distance;
pub mod params;

use std::sync::Arc;

pub use ann::{AnnIndex, AnnRequest, FlatAnnIndex, VectorQuery};
pub use params::{FieldKind, IndexParams, IndexSpec, IndexType, MetricType};

/// An index attached to one field.
#[derive(Debug, Clone)]
pub struct FieldIndex {
    pub spec: IndexSpec,
    /// Vector search backend; `None` for BM25 and scalar indexes.
    pub ann: Option<Arc<dyn AnnIndex>>,
}

impl FieldIndex {
    pub fn new(spec: IndexSpec) -> Self {
        let ann: Option<Arc<dyn AnnIndex>> = match spec.kind {
            FieldKind::Dense { .. } | FieldKind::Sparse => {
                Some(Arc::new(FlatAnnIndex::new(spec.index_type)))
            }
            FieldKind::Bm25Output | FieldKind::Scalar => None,
        };
        Self { spec, ann }
    }
}
