use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionType {
    Bm25,
}

/// A function declared on the schema, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub function_type: FunctionType,
    pub input_field_names: Vec<String>,
    pub output_field_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl FunctionSpec {
    /// BM25 function from one text field into one sparse vector field.
    pub fn bm25(
        name: impl Into<String>,
        input: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            function_type: FunctionType::Bm25,
            input_field_names: vec![input.into()],
            output_field_names: vec![output.into()],
            params: Map::new(),
        }
    }
}

/// A validated BM25 function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bm25Function {
    pub name: String,
    pub input_field: String,
    pub output_field: String,
}
