//! Collection schema declaration and validation.
//!
//! A [`CollectionSchema`] is what the caller declares. [`ValidatedSchema`]
//! is the checked form every other module works with: analyzer blocks are
//! parsed into an [`AnalyzerRegistry`](crate::fts::analyzer::AnalyzerRegistry)
//! and BM25 functions are resolved to their input and output fields.

pub mod field;
pub mod function;
pub mod validate;

use serde::{Deserialize, Serialize};

pub use field::FieldSpec;
pub use function::{Bm25Function, FunctionSpec, FunctionType};
pub use validate::{validate_schema, ValidatedSchema};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub functions: Vec<FunctionSpec>,
    #[serde(default)]
    pub description: String,
}

impl CollectionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn function(mut self, function: FunctionSpec) -> Self {
        self.functions.push(function);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}
