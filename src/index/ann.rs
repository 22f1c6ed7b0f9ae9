//! Vector search over non-text fields.
//!
//! Dense and user-supplied sparse fields are served through [`AnnIndex`].
//! The only implementation here is an exact flat scan; graph or cluster
//! indexes plug in behind the same trait.

use std::fmt::Debug;

use roaring::RoaringBitmap;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::fts::traversal::ScoreBand;
use crate::index::distance::dense_score;
use crate::index::params::{IndexType, MetricType};
use crate::query::collector::{Hit, TopK};
use crate::types::{FieldValue, PrimaryKey, Row, SparseVector};

/// Query vector for an ANN search.
#[derive(Debug, Clone, Copy)]
pub enum VectorQuery<'a> {
    Dense(&'a [f32]),
    Sparse(&'a SparseVector),
}

/// One segment's worth of vectors plus the query to run over them.
pub struct AnnRequest<'a> {
    pub rows: &'a [Row],
    pub keys: &'a [PrimaryKey],
    pub field: &'a str,
    pub query: VectorQuery<'a>,
    pub metric: MetricType,
    pub allowed: &'a RoaringBitmap,
    pub band: ScoreBand,
    /// Only rows ranked strictly after this (score, key) qualify.
    pub after: Option<(f32, &'a PrimaryKey)>,
    pub cancel: Option<&'a CancelToken>,
    pub cancel_check_interval: usize,
}

pub trait AnnIndex: Send + Sync + Debug {
    fn index_type(&self) -> IndexType;

    /// Best `k` hits of one segment, best-first under the request metric.
    fn search(&self, request: &AnnRequest<'_>, k: usize) -> Result<Vec<Hit>>;
}

/// Exact scan. Used for every dense and sparse index type.
#[derive(Debug, Clone)]
pub struct FlatAnnIndex {
    index_type: IndexType,
}

impl FlatAnnIndex {
    pub fn new(index_type: IndexType) -> Self {
        Self { index_type }
    }
}

impl AnnIndex for FlatAnnIndex {
    fn index_type(&self) -> IndexType {
        self.index_type
    }

    fn search(&self, request: &AnnRequest<'_>, k: usize) -> Result<Vec<Hit>> {
        let mut topk = TopK::new(k, request.metric.order());
        if k == 0 {
            return Ok(Vec::new());
        }
        let interval = request.cancel_check_interval.max(1);
        for (scanned, doc) in request.allowed.iter().enumerate() {
            if scanned % interval == 0 {
                if let Some(cancel) = request.cancel {
                    cancel.check()?;
                }
            }
            let (Some(row), Some(key)) = (
                request.rows.get(doc as usize),
                request.keys.get(doc as usize),
            ) else {
                continue;
            };
            let Some(score) = score_row(row.get(request.field), &request.query, request.metric)
            else {
                continue;
            };
            if !request.band.contains(score) {
                continue;
            }
            if let Some(cursor) = request.after {
                if !request.metric.order().follows((score, key), cursor) {
                    continue;
                }
            }
            topk.offer(doc, score, key);
        }
        Ok(topk.into_sorted())
    }
}

fn score_row(value: Option<&FieldValue>, query: &VectorQuery<'_>, metric: MetricType) -> Option<f32> {
    match (value?, query) {
        (FieldValue::FloatVector(v), VectorQuery::Dense(q)) if v.len() == q.len() => {
            Some(dense_score(v, q, metric))
        }
        (FieldValue::SparseVector(v), VectorQuery::Sparse(q)) => Some(v.dot(q)),
        _ => None,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> (Vec<Row>, Vec<PrimaryKey>) {
        let vectors = [[0.0, 0.0], [1.0, 0.0], [3.0, 4.0], [0.5, 0.5]];
        let rows = vectors
            .iter()
            .map(|v| Row::from([("emb".to_string(), FieldValue::from(v.to_vec()))]))
            .collect();
        let keys = (0..vectors.len() as i64).map(PrimaryKey::Int).collect();
        (rows, keys)
    }

    fn run(metric: MetricType, allowed: &RoaringBitmap, band: ScoreBand, k: usize) -> Vec<i64> {
        let (rows, keys) = rows();
        let query = [1.0, 0.0];
        let request = AnnRequest {
            rows: &rows,
            keys: &keys,
            field: "emb",
            query: VectorQuery::Dense(&query),
            metric,
            allowed,
            band,
            after: None,
            cancel: None,
            cancel_check_interval: 16,
        };
        FlatAnnIndex::new(IndexType::Flat)
            .search(&request, k)
            .unwrap()
            .into_iter()
            .map(|h| match h.key {
                PrimaryKey::Int(v) => v,
                PrimaryKey::Str(_) => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn test_l2_ranks_nearest_first() {
        let allowed: RoaringBitmap = (0..4).collect();
        assert_eq!(run(MetricType::L2, &allowed, ScoreBand::default(), 3), vec![1, 3, 0]);
    }

    #[test]
    fn test_ip_ranks_largest_first() {
        let allowed: RoaringBitmap = (0..4).collect();
        assert_eq!(run(MetricType::Ip, &allowed, ScoreBand::default(), 2), vec![2, 1]);
    }

    #[test]
    fn test_respects_allowed_and_band() {
        let allowed: RoaringBitmap = [0u32, 2, 3].into_iter().collect();
        assert_eq!(run(MetricType::L2, &allowed, ScoreBand::default(), 4), vec![3, 0, 2]);

        let all: RoaringBitmap = (0..4).collect();
        let band = ScoreBand {
            min: Some(0.4),
            max: Some(1.0),
        };
        assert_eq!(run(MetricType::L2, &all, band, 4), vec![3, 0]);
    }

    #[test]
    fn test_after_cursor_skips_earlier_ranks() {
        let (rows, keys) = rows();
        let query = [1.0, 0.0];
        let allowed: RoaringBitmap = (0..4).collect();
        let search = |after: Option<(f32, &PrimaryKey)>| {
            FlatAnnIndex::new(IndexType::Flat)
                .search(
                    &AnnRequest {
                        rows: &rows,
                        keys: &keys,
                        field: "emb",
                        query: VectorQuery::Dense(&query),
                        metric: MetricType::L2,
                        allowed: &allowed,
                        band: ScoreBand::default(),
                        after,
                        cancel: None,
                        cancel_check_interval: 16,
                    },
                    4,
                )
                .unwrap()
        };
        let full = search(None);
        let rest = search(Some((full[1].score, &full[1].key)));
        assert_eq!(rest, full[2..].to_vec());
    }

    #[test]
    fn test_sparse_inner_product() {
        let rows: Vec<Row> = [
            SparseVector::from_iter([(1, 1.0), (2, 2.0)]),
            SparseVector::from_iter([(3, 5.0)]),
        ]
        .into_iter()
        .map(|v| Row::from([("sp".to_string(), FieldValue::from(v))]))
        .collect();
        let keys = vec![PrimaryKey::Int(0), PrimaryKey::Int(1)];
        let query = SparseVector::from_iter([(2, 1.0)]);
        let allowed: RoaringBitmap = (0..2).collect();
        let request = AnnRequest {
            rows: &rows,
            keys: &keys,
            field: "sp",
            query: VectorQuery::Sparse(&query),
            metric: MetricType::Ip,
            allowed: &allowed,
            band: ScoreBand::default(),
            after: None,
            cancel: None,
            cancel_check_interval: 16,
        };
        let hits = FlatAnnIndex::new(IndexType::SparseInvertedIndex)
            .search(&request, 2)
            .unwrap();
        assert_eq!(hits[0].key, PrimaryKey::Int(0));
        assert!((hits[0].score - 2.0).abs() < 1e-6);
    }
}
