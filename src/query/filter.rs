//! Scalar and text-match predicates over rows.
//!
//! A [`Filter`] is parsed from an expression string (see
//! [`filter_expr`](crate::query::filter_expr)) and then compiled against a
//! schema. Compilation resolves field types and pre-analyzes every
//! `TEXT_MATCH` query with each analyzer the field can route to, so
//! evaluation never fails and never re-analyzes the query.
//!
//! Null semantics follow SQL: any comparison involving a null value is
//! false, including `!=` and `not in`.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use roaring::RoaringBitmap;

use crate::error::{FtsError, Result};
use crate::fts::analyzer::FieldAnalyzer;
use crate::query::filter_expr::{self, MAX_FILTER_DEPTH};
use crate::schema::ValidatedSchema;
use crate::segment::SegmentView;
use crate::types::{DataType, FieldValue, Row};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// Parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Empty expression; matches every row.
    All,
    Compare {
        field: String,
        op: CompareOp,
        value: Literal,
    },
    In {
        field: String,
        values: Vec<Literal>,
    },
    NotIn {
        field: String,
        values: Vec<Literal>,
    },
    IsNull {
        field: String,
    },
    IsNotNull {
        field: String,
    },
    /// Row text shares at least one token with the analyzed query.
    TextMatch {
        field: String,
        query: String,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn parse(expr: &str) -> Result<Self> {
        filter_expr::parse(expr)
    }
}

/// A filter bound to a schema.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    root: Node,
}

#[derive(Debug, Clone)]
enum Node {
    All,
    Compare {
        field: String,
        op: CompareOp,
        value: Literal,
    },
    In {
        field: String,
        values: Vec<Literal>,
        negated: bool,
    },
    IsNull {
        field: String,
        negated: bool,
    },
    TextMatch {
        field: String,
        analyzer: FieldAnalyzer,
        /// Analyzed query terms keyed by resolved analyzer name.
        terms: HashMap<String, HashSet<String>>,
    },
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
}

impl CompiledFilter {
    /// Parse and compile `expr`. An empty expression matches all rows.
    pub fn from_expr(expr: &str, schema: &ValidatedSchema) -> Result<Self> {
        let filter = Filter::parse(expr)?;
        Self::compile(&filter, schema, expr)
    }

    pub fn compile(filter: &Filter, schema: &ValidatedSchema, expr: &str) -> Result<Self> {
        Ok(Self {
            root: compile_node(filter, schema, expr, 0)?,
        })
    }

    pub fn all() -> Self {
        Self { root: Node::All }
    }

    pub fn is_all(&self) -> bool {
        matches!(self.root, Node::All)
    }

    pub fn matches(&self, row: &Row) -> bool {
        evaluate(&self.root, row)
    }

    /// Live rows of `view` that satisfy the filter.
    pub fn select(&self, view: &SegmentView<'_>) -> RoaringBitmap {
        let live = view.live();
        if self.is_all() {
            return live;
        }
        live.into_iter()
            .filter(|&doc| view.row(doc).is_some_and(|row| self.matches(row)))
            .collect()
    }
}

/// Tree levels a compiled filter may have. A parsed group adds at most an
/// `Or` and an `And` level, so every parsed expression fits.
const MAX_TREE_DEPTH: usize = 4 * MAX_FILTER_DEPTH;

fn invalid(expr: &str, reason: impl Into<String>) -> FtsError {
    FtsError::InvalidFilter {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}

fn compile_node(filter: &Filter, schema: &ValidatedSchema, expr: &str, depth: usize) -> Result<Node> {
    if depth > MAX_TREE_DEPTH {
        return Err(invalid(expr, format!("filter tree deeper than {MAX_TREE_DEPTH}")));
    }
    let node = match filter {
        Filter::All => Node::All,
        Filter::Compare { field, op, value } => {
            let data_type = scalar_type(schema, field, expr)?;
            check_literal(data_type, value, field, expr)?;
            if data_type == DataType::Bool && !matches!(op, CompareOp::Eq | CompareOp::Ne) {
                return Err(invalid(expr, format!("field {field} is BOOL and only supports == and !=")));
            }
            Node::Compare {
                field: field.clone(),
                op: *op,
                value: value.clone(),
            }
        }
        Filter::In { field, values } | Filter::NotIn { field, values } => {
            let data_type = scalar_type(schema, field, expr)?;
            for value in values {
                check_literal(data_type, value, field, expr)?;
            }
            Node::In {
                field: field.clone(),
                values: values.clone(),
                negated: matches!(filter, Filter::NotIn { .. }),
            }
        }
        Filter::IsNull { field } | Filter::IsNotNull { field } => {
            if schema.field(field).is_none() || schema.is_function_output(field) {
                return Err(invalid(expr, format!("unknown field {field}")));
            }
            Node::IsNull {
                field: field.clone(),
                negated: matches!(filter, Filter::IsNotNull { .. }),
            }
        }
        Filter::TextMatch { field, query } => {
            if schema.field(field).is_none() {
                return Err(invalid(expr, format!("unknown field {field}")));
            }
            let analyzer = schema.analyzers().get(field).cloned().ok_or_else(|| {
                invalid(expr, format!("TEXT_MATCH requires enable_analyzer on field {field}"))
            })?;
            let terms = analyzed_query_terms(&analyzer, query);
            Node::TextMatch {
                field: field.clone(),
                analyzer,
                terms,
            }
        }
        Filter::And(children) => Node::And(compile_all(children, schema, expr, depth + 1)?),
        Filter::Or(children) => Node::Or(compile_all(children, schema, expr, depth + 1)?),
        Filter::Not(inner) => Node::Not(Box::new(compile_node(inner, schema, expr, depth + 1)?)),
    };
    Ok(node)
}

fn compile_all(
    children: &[Filter],
    schema: &ValidatedSchema,
    expr: &str,
    depth: usize,
) -> Result<Vec<Node>> {
    children
        .iter()
        .map(|c| compile_node(c, schema, expr, depth))
        .collect()
}

fn analyzed_query_terms(analyzer: &FieldAnalyzer, query: &str) -> HashMap<String, HashSet<String>> {
    let terms_for = |a: &crate::fts::analyzer::Analyzer| -> HashSet<String> {
        a.analyze(query).into_iter().map(|t| t.term).collect()
    };
    match analyzer {
        FieldAnalyzer::Single(a) => {
            HashMap::from([(analyzer.resolve_name(None).to_string(), terms_for(a))])
        }
        FieldAnalyzer::Multi(multi) => multi
            .analyzer_names()
            .map(|name| (name.to_string(), terms_for(multi.resolve(Some(name)))))
            .collect(),
    }
}

fn scalar_type(schema: &ValidatedSchema, field: &str, expr: &str) -> Result<DataType> {
    let spec = schema
        .field(field)
        .ok_or_else(|| invalid(expr, format!("unknown field {field}")))?;
    if spec.is_vector() {
        return Err(invalid(expr, format!("field {field} is a vector and cannot be filtered")));
    }
    Ok(spec.data_type)
}

fn check_literal(data_type: DataType, value: &Literal, field: &str, expr: &str) -> Result<()> {
    let ok = match (data_type, value) {
        (DataType::Bool, Literal::Bool(_)) => true,
        (DataType::VarChar, Literal::String(_)) => true,
        (dt, Literal::Int(_)) if dt.is_integer() => true,
        (DataType::Float | DataType::Double, Literal::Int(_) | Literal::Float(_)) => true,
        // Integer fields may be compared against fractional bounds.
        (dt, Literal::Float(_)) if dt.is_integer() => true,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(invalid(
            expr,
            format!("cannot compare {data_type} field {field} with {value:?}"),
        ))
    }
}

fn evaluate(node: &Node, row: &Row) -> bool {
    match node {
        Node::All => true,
        Node::Compare { field, op, value } => row
            .get(field)
            .and_then(|v| compare(v, value))
            .is_some_and(|ordering| op.holds(ordering)),
        Node::In {
            field,
            values,
            negated,
        } => {
            let Some(v) = row.get(field).filter(|v| !v.is_null()) else {
                return false;
            };
            let found = values
                .iter()
                .any(|lit| compare(v, lit) == Some(Ordering::Equal));
            found != *negated
        }
        Node::IsNull { field, negated } => {
            let null = row.get(field).map_or(true, FieldValue::is_null);
            null != *negated
        }
        Node::TextMatch {
            field,
            analyzer,
            terms,
        } => {
            let Some(text) = row.get(field).and_then(FieldValue::as_str) else {
                return false;
            };
            let label = analyzer.row_label(row);
            let name = analyzer.resolve_name(label.as_deref());
            let Some(query_terms) = terms.get(name) else {
                return false;
            };
            if query_terms.is_empty() {
                return false;
            }
            analyzer
                .resolve(label.as_deref())
                .analyze(text)
                .iter()
                .any(|t| query_terms.contains(&t.term))
        }
        Node::And(children) => children.iter().all(|c| evaluate(c, row)),
        Node::Or(children) => children.iter().any(|c| evaluate(c, row)),
        Node::Not(inner) => !evaluate(inner, row),
    }
}

/// Order a stored value against a literal; `None` when incomparable or
/// the value is null.
fn compare(value: &FieldValue, literal: &Literal) -> Option<Ordering> {
    match (value, literal) {
        (FieldValue::Int(a), Literal::Int(b)) => Some(a.cmp(b)),
        (FieldValue::String(a), Literal::String(b)) => Some(a.as_str().cmp(b.as_str())),
        (FieldValue::Bool(a), Literal::Bool(b)) => Some(a.cmp(b)),
        (FieldValue::Int(_) | FieldValue::Float(_), Literal::Int(_) | Literal::Float(_)) => {
            let a = value.as_f64()?;
            let b = match literal {
                Literal::Int(i) => *i as f64,
                Literal::Float(f) => *f,
                _ => return None,
            };
            if (a - b).abs() < f64::EPSILON {
                Some(Ordering::Equal)
            } else {
                a.partial_cmp(&b)
            }
        }
        _ => None,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{validate_schema, CollectionSchema, FieldSpec};
    use serde_json::json;

    fn schema() -> ValidatedSchema {
        validate_schema(
            &CollectionSchema::new()
                .field(FieldSpec::new("id", DataType::Int64).primary())
                .field(FieldSpec::new("age", DataType::Int32).nullable(true))
                .field(FieldSpec::new("price", DataType::Double))
                .field(FieldSpec::new("active", DataType::Bool))
                .field(FieldSpec::new("tag", DataType::VarChar))
                .field(FieldSpec::new("lang", DataType::VarChar).nullable(true))
                .field(FieldSpec::new("title", DataType::VarChar).enable_analyzer())
                .field(
                    FieldSpec::new("body", DataType::VarChar).multi_analyzer(json!({
                        "by_field": "lang",
                        "analyzers": {
                            "default": {"type": "standard"},
                            "en": {"type": "english"}
                        }
                    })),
                )
                .field(FieldSpec::new("emb", DataType::FloatVector).dim(2)),
        )
        .unwrap()
    }

    fn row(id: i64, age: Option<i64>, tag: &str, title: &str) -> Row {
        Row::from([
            ("id".to_string(), FieldValue::Int(id)),
            ("age".to_string(), age.map_or(FieldValue::Null, FieldValue::Int)),
            ("price".to_string(), FieldValue::Float(id as f64 * 1.5)),
            ("active".to_string(), FieldValue::Bool(id % 2 == 0)),
            ("tag".to_string(), FieldValue::from(tag)),
            ("lang".to_string(), FieldValue::Null),
            ("title".to_string(), FieldValue::from(title)),
            ("body".to_string(), FieldValue::from("")),
        ])
    }

    fn check(expr: &str, row: &Row) -> bool {
        CompiledFilter::from_expr(expr, &schema()).unwrap().matches(row)
    }

    #[test]
    fn test_comparisons() {
        let r = row(4, Some(30), "red", "Hello World");
        assert!(check("id == 4", &r));
        assert!(check("id != 5", &r));
        assert!(check("age >= 30 and age < 31", &r));
        assert!(check("price > 5.5", &r));
        assert!(!check("price > 6", &r));
        assert!(check("tag == \"red\"", &r));
        assert!(check("tag < 's'", &r));
        assert!(check("active == true", &r));
        assert!(check("id in [1, 2, 4]", &r));
        assert!(check("tag not in ['blue']", &r));
        assert!(check("not (id == 5) && (tag == 'red' || id > 100)", &r));
    }

    #[test]
    fn test_null_comparisons_are_false() {
        let r = row(1, None, "red", "x");
        assert!(!check("age == 3", &r));
        assert!(!check("age != 3", &r));
        assert!(!check("age not in [3]", &r));
        assert!(check("age is null", &r));
        assert!(!check("age is not null", &r));
        assert!(check("tag is not null", &r));
    }

    #[test]
    fn test_text_match_any_token() {
        let r = row(1, Some(1), "t", "The Quick brown fox");
        assert!(check("TEXT_MATCH(title, 'quick rabbit')", &r));
        assert!(!check("TEXT_MATCH(title, 'slow rabbit')", &r));
        assert!(!check("TEXT_MATCH(title, '')", &r));
    }

    #[test]
    fn test_text_match_uses_row_analyzer() {
        let mut r = row(1, Some(1), "t", "x");
        r.insert("body".to_string(), FieldValue::from("running dogs"));
        // Standard analyzer keeps "running", which does not match "run".
        assert!(!check("text_match(body, 'run')", &r));
        r.insert("lang".to_string(), FieldValue::from("en"));
        assert!(check("text_match(body, 'run')", &r));
    }

    #[test]
    fn test_compile_errors() {
        let s = schema();
        for expr in [
            "missing == 1",
            "id == 'x'",
            "tag > 3",
            "active > true",
            "emb == 1",
            "TEXT_MATCH(tag, 'x')",
            "TEXT_MATCH(nope, 'x')",
        ] {
            let err = CompiledFilter::from_expr(expr, &s).unwrap_err();
            assert!(matches!(err, FtsError::InvalidFilter { .. }), "{expr}");
        }
    }

    #[test]
    fn test_empty_expression_matches_all() {
        let f = CompiledFilter::from_expr("  ", &schema()).unwrap();
        assert!(f.is_all());
        assert!(f.matches(&row(1, None, "a", "b")));
    }

    #[test]
    fn test_deep_trees_rejected() {
        let s = schema();
        let mut expr = "id == 1".to_string();
        for _ in 0..MAX_FILTER_DEPTH {
            expr = format!("not (id == 2 or tag == 'x' and {expr})");
        }
        assert!(CompiledFilter::from_expr(&expr, &s).is_err());

        let mut expr = "id == 1".to_string();
        for _ in 0..MAX_FILTER_DEPTH / 2 {
            expr = format!("not (id == 2 or tag == 'x' and {expr})");
        }
        assert!(CompiledFilter::from_expr(&expr, &s).is_ok());

        let mut built = Filter::All;
        for _ in 0..5_000 {
            built = Filter::Not(Box::new(built));
        }
        let err = CompiledFilter::compile(&built, &s, "").unwrap_err();
        assert!(matches!(err, FtsError::InvalidFilter { .. }));
    }
}
