use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::DataType;

/// Declaration of one collection field.
///
/// Analyzer parameter blocks are kept as raw JSON; they are parsed and
/// checked by the schema validator so that errors can name the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub nullable: bool,
    /// Maximum length in characters, VARCHAR only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Dimension, FLOAT_VECTOR only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dim: Option<usize>,
    #[serde(default)]
    pub enable_analyzer: bool,
    #[serde(default)]
    pub enable_match: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer_params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_analyzer_params: Option<Value>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            is_primary: false,
            nullable: false,
            max_length: None,
            dim: None,
            enable_analyzer: false,
            enable_match: false,
            analyzer_params: None,
            multi_analyzer_params: None,
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn dim(mut self, dim: usize) -> Self {
        self.dim = Some(dim);
        self
    }

    /// Enable analysis with the given parameter block.
    pub fn analyzer(mut self, params: Value) -> Self {
        self.enable_analyzer = true;
        self.analyzer_params = Some(params);
        self
    }

    /// Enable analysis with the default `standard` analyzer.
    pub fn enable_analyzer(mut self) -> Self {
        self.enable_analyzer = true;
        self
    }

    /// Enable analysis routed by a discriminator field.
    pub fn multi_analyzer(mut self, params: Value) -> Self {
        self.enable_analyzer = true;
        self.multi_analyzer_params = Some(params);
        self
    }

    pub fn enable_match(mut self) -> Self {
        self.enable_match = true;
        self
    }

    pub fn is_vector(&self) -> bool {
        self.data_type.is_vector()
    }
}
