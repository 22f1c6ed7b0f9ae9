use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A row as supplied by the caller and as returned from queries:
/// field name to value.
pub type Row = HashMap<String, FieldValue>;

/// Dense per-segment document ordinal; assigned in insertion order.
pub type DocId = u32;

/// Primary key of a row. Ordering is total and is used as the final
/// tie-breaker for equally scored results.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    /// An INT64 primary key.
    Int(i64),
    /// A VARCHAR primary key.
    Str(String),
}

impl std::fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrimaryKey::Int(v) => write!(f, "{v}"),
            PrimaryKey::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for PrimaryKey {
    fn from(v: i64) -> Self {
        PrimaryKey::Int(v)
    }
}

impl From<&str> for PrimaryKey {
    fn from(v: &str) -> Self {
        PrimaryKey::Str(v.to_string())
    }
}

impl From<PrimaryKey> for FieldValue {
    fn from(pk: PrimaryKey) -> Self {
        match pk {
            PrimaryKey::Int(v) => FieldValue::Int(v),
            PrimaryKey::Str(v) => FieldValue::String(v),
        }
    }
}

/// Declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    #[serde(rename = "VARCHAR")]
    VarChar,
    FloatVector,
    SparseFloatVector,
}

impl DataType {
    pub fn is_vector(self) -> bool {
        matches!(self, DataType::FloatVector | DataType::SparseFloatVector)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
        )
    }

    /// Inclusive value range for integer types.
    pub fn integer_range(self) -> Option<(i64, i64)> {
        match self {
            DataType::Int8 => Some((i8::MIN as i64, i8::MAX as i64)),
            DataType::Int16 => Some((i16::MIN as i64, i16::MAX as i64)),
            DataType::Int32 => Some((i32::MIN as i64, i32::MAX as i64)),
            DataType::Int64 => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::Bool => "BOOL",
            DataType::Int8 => "INT8",
            DataType::Int16 => "INT16",
            DataType::Int32 => "INT32",
            DataType::Int64 => "INT64",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::VarChar => "VARCHAR",
            DataType::FloatVector => "FLOAT_VECTOR",
            DataType::SparseFloatVector => "SPARSE_FLOAT_VECTOR",
        };
        f.write_str(name)
    }
}

/// Sparse vector keyed by dimension (term id for BM25 vectors).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SparseVector(pub BTreeMap<u32, f32>);

impl SparseVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, dim: u32) -> Option<f32> {
        self.0.get(&dim).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    /// Inner product over the shared dimensions.
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small
            .iter()
            .filter_map(|(dim, v)| large.get(dim).map(|w| v * w))
            .sum()
    }
}

impl FromIterator<(u32, f32)> for SparseVector {
    fn from_iter<I: IntoIterator<Item = (u32, f32)>>(iter: I) -> Self {
        SparseVector(iter.into_iter().collect())
    }
}

/// Field values stored in rows and used in filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// SQL-style null.
    Null,
    Bool(bool),
    /// Any integer width; range-checked against the declared type at ingest.
    Int(i64),
    /// FLOAT and DOUBLE values.
    Float(f64),
    String(String),
    FloatVector(Vec<f32>),
    SparseVector(SparseVector),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Human readable kind, used in type mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Null => "NULL",
            FieldValue::Bool(_) => "BOOL",
            FieldValue::Int(_) => "INT",
            FieldValue::Float(_) => "FLOAT",
            FieldValue::String(_) => "VARCHAR",
            FieldValue::FloatVector(_) => "FLOAT_VECTOR",
            FieldValue::SparseVector(_) => "SPARSE_FLOAT_VECTOR",
        }
    }

    /// Label used to route a row to one of several analyzers.
    pub fn as_label(&self) -> Option<String> {
        match self {
            FieldValue::String(s) => Some(s.clone()),
            FieldValue::Int(v) => Some(v.to_string()),
            FieldValue::Bool(v) => Some(v.to_string()),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<Vec<f32>> for FieldValue {
    fn from(v: Vec<f32>) -> Self {
        FieldValue::FloatVector(v)
    }
}

impl From<SparseVector> for FieldValue {
    fn from(v: SparseVector) -> Self {
        FieldValue::SparseVector(v)
    }
}

/// One ranked hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Primary key of the matched row.
    pub id: PrimaryKey,
    /// Similarity score, or distance for L2.
    pub score: f32,
    /// Requested output fields.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, FieldValue>,
}

/// Outcome of an insert, upsert or delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    pub count: usize,
    pub ids: Vec<PrimaryKey>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_key_ordering() {
        let mut keys = vec![PrimaryKey::Int(3), PrimaryKey::Int(-1), PrimaryKey::Int(2)];
        keys.sort();
        assert_eq!(
            keys,
            vec![PrimaryKey::Int(-1), PrimaryKey::Int(2), PrimaryKey::Int(3)]
        );
        assert!(PrimaryKey::from("a") < PrimaryKey::from("b"));
    }

    #[test]
    fn test_field_value_json_untagged() {
        let row: Row = serde_json::from_str(
            r#"{"id": 1, "text": "hello", "score": 0.5, "flag": true, "missing": null, "emb": [0.1, 0.2]}"#,
        )
        .unwrap();
        assert_eq!(row["id"], FieldValue::Int(1));
        assert_eq!(row["text"], FieldValue::String("hello".into()));
        assert_eq!(row["score"], FieldValue::Float(0.5));
        assert_eq!(row["flag"], FieldValue::Bool(true));
        assert!(row["missing"].is_null());
        assert_eq!(row["emb"], FieldValue::FloatVector(vec![0.1, 0.2]));
    }

    #[test]
    fn test_sparse_vector_dot() {
        let a: SparseVector = [(1, 1.0), (3, 2.0)].into_iter().collect();
        let b: SparseVector = [(3, 4.0), (5, 1.0)].into_iter().collect();
        assert!((a.dot(&b) - 8.0).abs() < 1e-6);
        assert_eq!(a.dot(&SparseVector::new()), 0.0);
    }

    #[test]
    fn test_integer_range() {
        assert_eq!(DataType::Int8.integer_range(), Some((-128, 127)));
        assert_eq!(DataType::VarChar.integer_range(), None);
    }

    #[test]
    fn test_as_label() {
        assert_eq!(FieldValue::from("eng").as_label().as_deref(), Some("eng"));
        assert_eq!(FieldValue::Int(7).as_label().as_deref(), Some("7"));
        assert_eq!(FieldValue::Null.as_label(), None);
    }
}
