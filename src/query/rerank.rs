//! Rank fusion for hybrid search.
//!
//! Rankers are given as JSON objects:
//! ```json
//! {"strategy": "weighted", "params": {"weights": [0.7, 0.3]}}
//! {"strategy": "rrf", "params": {"k": 60}}
//! ```
//!
//! Each input list carries its own metric so weighted fusion can map raw
//! scores onto a common `[0, 1]` "higher is better" scale first.

use std::collections::{HashMap, HashSet};
use std::f32::consts::PI;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{FtsError, Result};
use crate::index::params::MetricType;
use crate::types::{FieldValue, PrimaryKey, SearchResult};

pub const DEFAULT_RRF_K: f32 = 60.0;

#[derive(Debug, Clone, PartialEq)]
pub enum Ranker {
    /// Weighted sum of normalized scores, one weight per input list.
    Weighted { weights: Vec<f32> },
    /// Reciprocal rank fusion: `sum(1 / (k + rank))`, ranks from 1.
    Rrf { k: f32 },
}

impl Ranker {
    pub fn weighted(weights: impl Into<Vec<f32>>) -> Self {
        Ranker::Weighted {
            weights: weights.into(),
        }
    }

    pub fn rrf(k: f32) -> Self {
        Ranker::Rrf { k }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| FtsError::InvalidParameter("ranker must be a JSON object".into()))?;
        let strategy = obj
            .get("strategy")
            .and_then(Value::as_str)
            .ok_or_else(|| FtsError::InvalidParameter("ranker requires a string \"strategy\"".into()))?;
        let params = obj.get("params");
        match strategy.to_ascii_lowercase().as_str() {
            "weighted" => {
                let weights = params
                    .and_then(|p| p.get("weights"))
                    .and_then(Value::as_array)
                    .ok_or_else(|| {
                        FtsError::InvalidParameter("weighted ranker requires params.weights".into())
                    })?
                    .iter()
                    .map(|w| {
                        w.as_f64().map(|w| w as f32).ok_or_else(|| {
                            FtsError::InvalidParameter(format!("weight must be a number, got {w}"))
                        })
                    })
                    .collect::<Result<Vec<f32>>>()?;
                Ok(Ranker::Weighted { weights })
            }
            "rrf" => {
                let k = match params.and_then(|p| p.get("k")) {
                    None => DEFAULT_RRF_K,
                    Some(k) => k.as_f64().ok_or_else(|| {
                        FtsError::InvalidParameter(format!("rrf k must be a number, got {k}"))
                    })? as f32,
                };
                Ok(Ranker::Rrf { k })
            }
            other => Err(FtsError::InvalidParameter(format!(
                "unsupported ranker strategy: {other}"
            ))),
        }
    }

    pub fn to_json_value(&self) -> Value {
        match self {
            Ranker::Weighted { weights } => json!({"strategy": "weighted", "params": {"weights": weights}}),
            Ranker::Rrf { k } => json!({"strategy": "rrf", "params": {"k": k}}),
        }
    }

    pub fn validate(&self, inputs: usize) -> Result<()> {
        match self {
            Ranker::Weighted { weights } => {
                if weights.len() != inputs {
                    return Err(FtsError::InvalidParameter(format!(
                        "weighted ranker has {} weights for {inputs} search requests",
                        weights.len()
                    )));
                }
                if let Some(w) = weights.iter().find(|w| !(0.0..=1.0).contains(*w)) {
                    return Err(FtsError::InvalidParameter(format!(
                        "ranker weight {w} must be within [0, 1]"
                    )));
                }
                Ok(())
            }
            Ranker::Rrf { k } => {
                if !k.is_finite() || *k <= 0.0 {
                    return Err(FtsError::InvalidParameter(format!("rrf k must be positive, got {k}")));
                }
                Ok(())
            }
        }
    }
}

impl Default for Ranker {
    fn default() -> Self {
        Ranker::Rrf { k: DEFAULT_RRF_K }
    }
}

impl<'de> Deserialize<'de> for Ranker {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ranker::from_value(&value).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Ranker {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_json_value().serialize(serializer)
    }
}

/// Map a raw score onto `[0, 1]`, higher is better.
#[must_use]
pub fn normalize(score: f32, metric: MetricType) -> f32 {
    match metric {
        MetricType::Bm25 | MetricType::Ip => 0.5 + score.atan() / PI,
        MetricType::Cosine => (1.0 + score) / 2.0,
        MetricType::L2 => 1.0 - 2.0 * score.atan() / PI,
    }
}

/// One ranked input list.
#[derive(Debug, Clone)]
pub struct RankedList {
    pub metric: MetricType,
    /// Best-first.
    pub hits: Vec<SearchResult>,
}

/// Hashable identity of a group value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
}

impl GroupKey {
    fn of(value: Option<&FieldValue>) -> Self {
        match value {
            Some(FieldValue::Bool(b)) => GroupKey::Bool(*b),
            Some(FieldValue::Int(i)) => GroupKey::Int(*i),
            Some(FieldValue::Float(f)) => GroupKey::Float(f.to_bits()),
            Some(FieldValue::String(s)) => GroupKey::Str(s.clone()),
            _ => GroupKey::Null,
        }
    }
}

/// Fuse `lists` into one ranking, then apply grouping and the window.
///
/// With `group_by`, only the best hit of each distinct group value is
/// kept; rows without a value form one null group.
pub fn fuse(
    lists: &[RankedList],
    ranker: &Ranker,
    limit: usize,
    offset: usize,
    group_by: Option<&str>,
) -> Result<Vec<SearchResult>> {
    ranker.validate(lists.len())?;

    let mut fused: HashMap<PrimaryKey, SearchResult> = HashMap::new();
    for (i, list) in lists.iter().enumerate() {
        for (rank, hit) in list.hits.iter().enumerate() {
            let contribution = match ranker {
                Ranker::Weighted { weights } => weights[i] * normalize(hit.score, list.metric),
                Ranker::Rrf { k } => 1.0 / (k + (rank + 1) as f32),
            };
            let entry = fused.entry(hit.id.clone()).or_insert_with(|| SearchResult {
                id: hit.id.clone(),
                score: 0.0,
                fields: HashMap::new(),
            });
            entry.score += contribution;
            for (name, value) in &hit.fields {
                entry
                    .fields
                    .entry(name.clone())
                    .or_insert_with(|| value.clone());
            }
        }
    }

    let mut ranked: Vec<SearchResult> = fused.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.id.cmp(&b.id))
    });

    if let Some(field) = group_by {
        let mut seen = HashSet::new();
        ranked.retain(|hit| seen.insert(GroupKey::of(hit.fields.get(field))));
    }

    Ok(ranked.into_iter().skip(offset).take(limit).collect())
}
