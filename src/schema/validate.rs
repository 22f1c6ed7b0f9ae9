use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::{FtsError, Result};
use crate::fts::analyzer::{Analyzer, AnalyzerRegistry, FieldAnalyzer, MultiAnalyzer};
use crate::schema::{Bm25Function, CollectionSchema, FieldSpec, FunctionType};
use crate::types::{DataType, FieldValue, PrimaryKey, Row};

/// A schema that passed validation. Immutable for the collection's life.
#[derive(Debug, Clone)]
pub struct ValidatedSchema {
    declared: CollectionSchema,
    positions: HashMap<String, usize>,
    primary: usize,
    functions: Vec<Bm25Function>,
    analyzers: AnalyzerRegistry,
}

impl ValidatedSchema {
    /// The schema as declared.
    pub fn declared(&self) -> &CollectionSchema {
        &self.declared
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.declared.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.positions.get(name).map(|&i| &self.declared.fields[i])
    }

    pub fn primary_field(&self) -> &FieldSpec {
        &self.declared.fields[self.primary]
    }

    pub fn functions(&self) -> &[Bm25Function] {
        &self.functions
    }

    pub fn analyzers(&self) -> &AnalyzerRegistry {
        &self.analyzers
    }

    /// The BM25 function writing into `field`, if any.
    pub fn bm25_function_for_output(&self, field: &str) -> Option<&Bm25Function> {
        self.functions.iter().find(|f| f.output_field == field)
    }

    pub fn is_function_output(&self, field: &str) -> bool {
        self.bm25_function_for_output(field).is_some()
    }

    /// Fields a row carries: every declared field except function outputs.
    pub fn row_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.declared
            .fields
            .iter()
            .filter(|f| !self.is_function_output(&f.name))
    }

    /// Primary key of a validated row.
    pub fn primary_key(&self, row: &Row) -> Result<PrimaryKey> {
        let field = self.primary_field();
        match row.get(&field.name) {
            Some(FieldValue::Int(v)) => Ok(PrimaryKey::Int(*v)),
            Some(FieldValue::String(v)) => Ok(PrimaryKey::Str(v.clone())),
            Some(other) => Err(FtsError::SchemaTypeMismatch {
                field: field.name.clone(),
                expected: field.data_type.to_string(),
                actual: other.kind().to_string(),
            }),
            None => Err(FtsError::MissingField {
                field: field.name.clone(),
            }),
        }
    }

    /// Type-check one row and normalize it: missing nullable fields become
    /// `Null`, integers written to float fields become floats.
    pub fn validate_row(&self, mut row: Row) -> Result<Row> {
        if let Some(unknown) = row.keys().find(|k| !self.positions.contains_key(k.as_str())) {
            return Err(FtsError::UnknownField {
                field: unknown.clone(),
            });
        }

        let mut out = Row::with_capacity(self.declared.fields.len());
        for field in &self.declared.fields {
            let value = row.remove(&field.name);
            if self.is_function_output(&field.name) {
                if matches!(value, Some(ref v) if !v.is_null()) {
                    return Err(FtsError::FunctionOutputProvided {
                        field: field.name.clone(),
                    });
                }
                continue;
            }
            let value = match value {
                None | Some(FieldValue::Null) if field.nullable => FieldValue::Null,
                None => {
                    return Err(FtsError::MissingField {
                        field: field.name.clone(),
                    })
                }
                Some(FieldValue::Null) => {
                    return Err(FtsError::NullValue {
                        field: field.name.clone(),
                    })
                }
                Some(v) => check_value(field, v)?,
            };
            out.insert(field.name.clone(), value);
        }
        Ok(out)
    }
}

fn check_value(field: &FieldSpec, value: FieldValue) -> Result<FieldValue> {
    let mismatch = |v: &FieldValue| FtsError::SchemaTypeMismatch {
        field: field.name.clone(),
        expected: field.data_type.to_string(),
        actual: v.kind().to_string(),
    };
    match (field.data_type, value) {
        (DataType::Bool, v @ FieldValue::Bool(_)) => Ok(v),
        (dt, FieldValue::Int(i)) if dt.is_integer() => {
            let (lo, hi) = dt.integer_range().unwrap_or((i64::MIN, i64::MAX));
            if i < lo || i > hi {
                return Err(FtsError::SchemaTypeMismatch {
                    field: field.name.clone(),
                    expected: dt.to_string(),
                    actual: format!("INT out of range ({i})"),
                });
            }
            Ok(FieldValue::Int(i))
        }
        (DataType::Float | DataType::Double, FieldValue::Int(i)) => Ok(FieldValue::Float(i as f64)),
        (DataType::Float | DataType::Double, v @ FieldValue::Float(_)) => Ok(v),
        (DataType::VarChar, FieldValue::String(s)) => {
            if let Some(max) = field.max_length {
                let len = s.chars().count();
                if len > max {
                    return Err(FtsError::MaxLengthExceeded {
                        field: field.name.clone(),
                        max,
                        actual: len,
                    });
                }
            }
            Ok(FieldValue::String(s))
        }
        (DataType::FloatVector, FieldValue::FloatVector(v)) => {
            let dim = field.dim.unwrap_or(0);
            if v.len() != dim {
                return Err(FtsError::DimensionMismatch {
                    field: field.name.clone(),
                    expected: dim,
                    actual: v.len(),
                });
            }
            Ok(FieldValue::FloatVector(v))
        }
        (DataType::SparseFloatVector, v @ FieldValue::SparseVector(_)) => Ok(v),
        (_, v) => Err(mismatch(&v)),
    }
}

/// Validate a declared schema.
///
/// Checks run in a fixed order and the first violation is returned;
/// nothing is registered on failure.
pub fn validate_schema(schema: &CollectionSchema) -> Result<ValidatedSchema> {
    let mut positions = HashMap::new();
    for (i, field) in schema.fields.iter().enumerate() {
        if field.name.is_empty() {
            return Err(FtsError::InvalidSchema("field name must not be empty".into()));
        }
        if positions.insert(field.name.clone(), i).is_some() {
            return Err(FtsError::InvalidSchema(format!(
                "duplicate field name: {}",
                field.name
            )));
        }
    }

    let primaries: Vec<usize> = schema
        .fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.is_primary)
        .map(|(i, _)| i)
        .collect();
    let primary = match primaries.as_slice() {
        [only] => *only,
        [] => return Err(FtsError::InvalidSchema("schema has no primary key".into())),
        _ => {
            return Err(FtsError::InvalidSchema(
                "schema has more than one primary key".into(),
            ))
        }
    };
    let pk = &schema.fields[primary];
    if !matches!(pk.data_type, DataType::Int64 | DataType::VarChar) {
        return Err(FtsError::InvalidSchema(format!(
            "primary key {} must be INT64 or VARCHAR, got {}",
            pk.name, pk.data_type
        )));
    }
    if pk.nullable {
        return Err(FtsError::InvalidSchema(format!(
            "primary key {} cannot be nullable",
            pk.name
        )));
    }

    let mut analyzers = AnalyzerRegistry::new();
    for field in &schema.fields {
        check_field_shape(field)?;
        if let Some(analyzer) = build_field_analyzer(field, schema, &positions)? {
            analyzers.register(field.name.clone(), analyzer);
        }
    }

    let functions = validate_functions(schema, &positions)?;

    debug!(
        fields = schema.fields.len(),
        functions = functions.len(),
        analyzed_fields = analyzers.len(),
        "schema validated"
    );

    Ok(ValidatedSchema {
        declared: schema.clone(),
        positions,
        primary,
        functions,
        analyzers,
    })
}

fn check_field_shape(field: &FieldSpec) -> Result<()> {
    match field.data_type {
        DataType::FloatVector => {
            if field.dim.map_or(true, |d| d == 0) {
                return Err(FtsError::InvalidSchema(format!(
                    "vector field {} requires a positive dim",
                    field.name
                )));
            }
        }
        DataType::VarChar => {
            if field.max_length == Some(0) {
                return Err(FtsError::InvalidSchema(format!(
                    "field {}: max_length must be positive",
                    field.name
                )));
            }
        }
        _ => {}
    }
    if field.is_vector() && field.nullable {
        return Err(FtsError::InvalidSchema(format!(
            "vector field {} cannot be nullable",
            field.name
        )));
    }

    let has_params = field.analyzer_params.is_some() || field.multi_analyzer_params.is_some();
    if (field.enable_analyzer || field.enable_match || has_params)
        && field.data_type != DataType::VarChar
    {
        return Err(FtsError::InvalidSchema(format!(
            "field {}: analyzer settings require a VARCHAR field, got {}",
            field.name, field.data_type
        )));
    }
    if field.analyzer_params.is_some() && field.multi_analyzer_params.is_some() {
        return Err(FtsError::InvalidSchema(format!(
            "field {}: analyzer_params and multi_analyzer_params are mutually exclusive",
            field.name
        )));
    }
    if field.enable_match && !field.enable_analyzer {
        return Err(FtsError::InvalidSchema(format!(
            "field {}: enable_match requires enable_analyzer",
            field.name
        )));
    }
    Ok(())
}

/// Parameter blocks are checked whenever present, even on a field that
/// does not enable analysis; such a field still gets no analyzer.
fn build_field_analyzer(
    field: &FieldSpec,
    schema: &CollectionSchema,
    positions: &HashMap<String, usize>,
) -> Result<Option<FieldAnalyzer>> {
    let analyzer = if let Some(params) = &field.multi_analyzer_params {
        let multi = MultiAnalyzer::from_params(&field.name, params)?;
        let Some(&by) = positions.get(&multi.by_field) else {
            return Err(FtsError::ByFieldNotFound {
                field: field.name.clone(),
                by_field: multi.by_field.clone(),
            });
        };
        let by_field = &schema.fields[by];
        if by_field.name == field.name || by_field.is_vector() {
            return Err(FtsError::InvalidSchema(format!(
                "field {}: by_field {} must be another scalar field",
                field.name, by_field.name
            )));
        }
        FieldAnalyzer::Multi(multi)
    } else {
        match &field.analyzer_params {
            Some(params) => FieldAnalyzer::Single(Analyzer::from_params(params).map_err(
                |reason| FtsError::InvalidAnalyzer {
                    field: field.name.clone(),
                    reason,
                },
            )?),
            None if field.enable_analyzer => FieldAnalyzer::Single(Analyzer::standard()),
            None => return Ok(None),
        }
    };
    Ok(field.enable_analyzer.then_some(analyzer))
}

fn validate_functions(
    schema: &CollectionSchema,
    positions: &HashMap<String, usize>,
) -> Result<Vec<Bm25Function>> {
    let mut names = HashSet::new();
    let mut outputs = HashSet::new();
    let mut validated = Vec::with_capacity(schema.functions.len());

    for function in &schema.functions {
        let invalid = |reason: String| FtsError::InvalidFunction {
            function: function.name.clone(),
            reason,
        };
        if function.name.is_empty() {
            return Err(invalid("function name must not be empty".into()));
        }
        if !names.insert(function.name.as_str()) {
            return Err(invalid("duplicate function name".into()));
        }
        match function.function_type {
            FunctionType::Bm25 => {}
        }
        if !function.params.is_empty() {
            return Err(invalid("BM25 function takes no params".into()));
        }
        let (input, output) = match (
            function.input_field_names.as_slice(),
            function.output_field_names.as_slice(),
        ) {
            ([input], [output]) => (input, output),
            (inputs, outputs) => {
                return Err(invalid(format!(
                    "BM25 function needs exactly one input and one output field, got {} and {}",
                    inputs.len(),
                    outputs.len()
                )))
            }
        };

        let input_field = positions
            .get(input)
            .map(|&i| &schema.fields[i])
            .ok_or_else(|| FtsError::FieldNotFound {
                function: function.name.clone(),
                field: input.clone(),
            })?;
        let output_field = positions
            .get(output)
            .map(|&i| &schema.fields[i])
            .ok_or_else(|| FtsError::FieldNotFound {
                function: function.name.clone(),
                field: output.clone(),
            })?;

        if input_field.data_type != DataType::VarChar {
            return Err(invalid(format!(
                "input field {input} must be VARCHAR, got {}",
                input_field.data_type
            )));
        }
        if !input_field.enable_analyzer {
            return Err(FtsError::InputNotTokenized {
                function: function.name.clone(),
                field: input.clone(),
            });
        }
        if input_field.nullable {
            return Err(FtsError::NullableFunctionInput {
                function: function.name.clone(),
                field: input.clone(),
            });
        }
        if output_field.data_type != DataType::SparseFloatVector {
            return Err(invalid(format!(
                "output field {output} must be SPARSE_FLOAT_VECTOR, got {}",
                output_field.data_type
            )));
        }
        if !outputs.insert(output.as_str()) {
            return Err(invalid(format!(
                "output field {output} is already written by another function"
            )));
        }

        validated.push(Bm25Function {
            name: function.name.clone(),
            input_field: input.clone(),
            output_field: output.clone(),
        });
    }
    Ok(validated)
}
