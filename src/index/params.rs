//! Index declarations and their validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::Bm25Config;
use crate::error::{FtsError, Result};
use crate::fts::bm25::Bm25Params;
use crate::fts::traversal::TraversalStrategy;
use crate::query::collector::ScoreOrder;
use crate::schema::ValidatedSchema;
use crate::types::DataType;

/// Index parameters as supplied by the caller; returned verbatim by
/// `describe_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexParams {
    pub index_type: String,
    #[serde(default)]
    pub metric_type: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl IndexParams {
    pub fn new(index_type: impl Into<String>, metric_type: impl Into<String>) -> Self {
        Self {
            index_type: index_type.into(),
            metric_type: metric_type.into(),
            params: Map::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    SparseInvertedIndex,
    SparseWand,
    Flat,
    Hnsw,
    IvfFlat,
    /// Scalar inverted index; accepted for scalar fields.
    Inverted,
}

impl IndexType {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "SPARSE_INVERTED_INDEX" => Some(IndexType::SparseInvertedIndex),
            "SPARSE_WAND" => Some(IndexType::SparseWand),
            "FLAT" => Some(IndexType::Flat),
            "HNSW" => Some(IndexType::Hnsw),
            "IVF_FLAT" => Some(IndexType::IvfFlat),
            "INVERTED" => Some(IndexType::Inverted),
            _ => None,
        }
    }

    pub fn is_sparse(self) -> bool {
        matches!(self, IndexType::SparseInvertedIndex | IndexType::SparseWand)
    }

    pub fn is_dense(self) -> bool {
        matches!(self, IndexType::Flat | IndexType::Hnsw | IndexType::IvfFlat)
    }

    fn default_strategy(self) -> TraversalStrategy {
        match self {
            IndexType::SparseWand => TraversalStrategy::DaatWand,
            _ => TraversalStrategy::DaatMaxScore,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricType {
    Bm25,
    Ip,
    L2,
    Cosine,
}

impl MetricType {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "BM25" => Some(MetricType::Bm25),
            "IP" => Some(MetricType::Ip),
            "L2" => Some(MetricType::L2),
            "COSINE" => Some(MetricType::Cosine),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Bm25 => "BM25",
            MetricType::Ip => "IP",
            MetricType::L2 => "L2",
            MetricType::Cosine => "COSINE",
        }
    }

    pub fn order(self) -> ScoreOrder {
        match self {
            MetricType::L2 => ScoreOrder::LowerIsBetter,
            _ => ScoreOrder::HigherIsBetter,
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of data an indexed field holds, as far as search cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Output of a BM25 function; queried with raw text.
    Bm25Output,
    /// User-supplied sparse vectors.
    Sparse,
    Dense { dim: usize },
    Scalar,
}

impl FieldKind {
    pub fn of(schema: &ValidatedSchema, field: &str) -> Option<Self> {
        let spec = schema.field(field)?;
        let kind = match spec.data_type {
            DataType::SparseFloatVector if schema.is_function_output(field) => FieldKind::Bm25Output,
            DataType::SparseFloatVector => FieldKind::Sparse,
            DataType::FloatVector => FieldKind::Dense {
                dim: spec.dim.unwrap_or(0),
            },
            _ => FieldKind::Scalar,
        };
        Some(kind)
    }
}

/// A validated index on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub field: String,
    pub kind: FieldKind,
    pub index_type: IndexType,
    /// `None` for scalar indexes.
    pub metric: Option<MetricType>,
    pub bm25: Bm25Params,
    pub strategy: TraversalStrategy,
    pub declared: IndexParams,
}

impl IndexSpec {
    /// Validate `params` for an index on `field`.
    pub fn validate(
        schema: &ValidatedSchema,
        field: &str,
        params: &IndexParams,
        defaults: &Bm25Config,
    ) -> Result<Self> {
        let kind = FieldKind::of(schema, field).ok_or_else(|| FtsError::IndexFieldNotFound {
            field: field.to_string(),
        })?;
        let index_type =
            IndexType::parse(&params.index_type).ok_or_else(|| FtsError::InvalidIndexType {
                field: field.to_string(),
                index_type: params.index_type.clone(),
            })?;

        let type_fits = match kind {
            FieldKind::Bm25Output | FieldKind::Sparse => index_type.is_sparse(),
            FieldKind::Dense { .. } => index_type.is_dense(),
            FieldKind::Scalar => index_type == IndexType::Inverted,
        };
        if !type_fits {
            return Err(FtsError::InvalidIndexType {
                field: field.to_string(),
                index_type: params.index_type.clone(),
            });
        }

        let metric = Self::validate_metric(field, kind, &params.metric_type)?;

        let mut bm25 = Bm25Params {
            k1: defaults.default_k1,
            b: defaults.default_b,
        };
        let mut strategy = index_type.default_strategy();

        for (key, value) in &params.params {
            match key.as_str() {
                "bm25_k1" if metric == Some(MetricType::Bm25) => bm25.k1 = number(key, value)?,
                "bm25_b" if metric == Some(MetricType::Bm25) => bm25.b = number(key, value)?,
                "inverted_index_algo" if index_type.is_sparse() => {
                    let name = value.as_str().ok_or_else(|| FtsError::InvalidIndexParam {
                        param: key.clone(),
                        reason: format!("expected a string, got {value}"),
                    })?;
                    strategy =
                        TraversalStrategy::parse(name).ok_or_else(|| FtsError::InvalidIndexParam {
                            param: key.clone(),
                            reason: format!("unknown algorithm {name}"),
                        })?;
                }
                "drop_ratio_build" if index_type.is_sparse() => {
                    let ratio = number(key, value)?;
                    if !(0.0..1.0).contains(&ratio) {
                        return Err(FtsError::InvalidIndexParam {
                            param: key.clone(),
                            reason: format!("must be within [0, 1), got {ratio}"),
                        });
                    }
                }
                "M" | "efConstruction" | "nlist" if index_type.is_dense() => {
                    if value.as_u64().map_or(true, |v| v == 0) {
                        return Err(FtsError::InvalidIndexParam {
                            param: key.clone(),
                            reason: format!("expected a positive integer, got {value}"),
                        });
                    }
                }
                // Unrecognised build params are carried but unused.
                _ => {}
            }
        }
        bm25.validate()?;

        Ok(Self {
            field: field.to_string(),
            kind,
            index_type,
            metric,
            bm25,
            strategy,
            declared: params.clone(),
        })
    }

    fn validate_metric(field: &str, kind: FieldKind, raw: &str) -> Result<Option<MetricType>> {
        let invalid = |reason: &str| FtsError::InvalidMetric {
            field: field.to_string(),
            metric: raw.to_string(),
            reason: reason.to_string(),
        };
        if kind == FieldKind::Scalar {
            return if raw.is_empty() {
                Ok(None)
            } else {
                Err(invalid("scalar indexes take no metric"))
            };
        }
        let metric = MetricType::parse(raw).ok_or_else(|| invalid("unknown metric type"))?;
        match (kind, metric) {
            (FieldKind::Bm25Output, MetricType::Bm25) => Ok(Some(metric)),
            (FieldKind::Bm25Output, _) => Err(invalid("BM25 function output requires metric BM25")),
            (_, MetricType::Bm25) => Err(invalid(
                "metric BM25 is only valid on a BM25 function output field",
            )),
            (FieldKind::Sparse, MetricType::Ip) => Ok(Some(metric)),
            (FieldKind::Sparse, _) => Err(invalid("sparse vectors support metric IP only")),
            (FieldKind::Dense { .. }, m) => Ok(Some(m)),
            (FieldKind::Scalar, _) => Ok(None),
        }
    }
}

fn number(key: &str, value: &Value) -> Result<f32> {
    value
        .as_f64()
        .map(|v| v as f32)
        .ok_or_else(|| FtsError::InvalidIndexParam {
            param: key.to_string(),
            reason: format!("expected a number, got {value}"),
        })
}
