mod common;

use common::fixtures::*;
use serde_json::json;
use textsift::collection::Collection;
use textsift::config::Config;
use textsift::error::{ErrorCategory, FtsError};
use textsift::index::IndexParams;
use textsift::query::SearchRequest;
use textsift::schema::{validate_schema, CollectionSchema, FieldSpec, FunctionSpec};
use textsift::types::{DataType, FieldValue, Row, SparseVector};

fn text_schema(text: FieldSpec) -> CollectionSchema {
    CollectionSchema::new()
        .field(FieldSpec::new("id", DataType::Int64).primary())
        .field(FieldSpec::new("language", DataType::VarChar).nullable(true))
        .field(text)
        .field(FieldSpec::new("sparse", DataType::SparseFloatVector))
        .function(FunctionSpec::bm25("bm25", "text", "sparse"))
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[test]
fn test_missing_default_analyzer_then_fixed() {
    let without_default = json!({
        "by_field": "language",
        "analyzers": {"en": {"type": "english"}}
    });
    let err = validate_schema(&text_schema(
        FieldSpec::new("text", DataType::VarChar).multi_analyzer(without_default),
    ))
    .unwrap_err();
    assert!(matches!(err, FtsError::MissingDefaultAnalyzer { .. }));
    assert_eq!(err.category(), ErrorCategory::Schema);

    let with_default = json!({
        "by_field": "language",
        "analyzers": {"en": {"type": "english"}, "default": {"type": "standard"}}
    });
    validate_schema(&text_schema(
        FieldSpec::new("text", DataType::VarChar).multi_analyzer(with_default),
    ))
    .unwrap();
}

#[test]
fn test_nullable_function_input_then_fixed() {
    let err = validate_schema(&text_schema(
        FieldSpec::new("text", DataType::VarChar)
            .enable_analyzer()
            .nullable(true),
    ))
    .unwrap_err();
    assert!(matches!(err, FtsError::NullableFunctionInput { .. }));
    assert!(err.to_string().contains("text"));

    validate_schema(&text_schema(
        FieldSpec::new("text", DataType::VarChar)
            .enable_analyzer()
            .nullable(false),
    ))
    .unwrap();
}

#[test]
fn test_function_input_must_be_analyzed() {
    let err = validate_schema(&text_schema(FieldSpec::new("text", DataType::VarChar))).unwrap_err();
    assert!(matches!(err, FtsError::InputNotTokenized { .. }));
}

#[test]
fn test_function_fields_must_exist() {
    let schema = CollectionSchema::new()
        .field(FieldSpec::new("id", DataType::Int64).primary())
        .field(FieldSpec::new("text", DataType::VarChar).enable_analyzer())
        .function(FunctionSpec::bm25("bm25", "text", "missing_sparse"));
    assert!(matches!(
        validate_schema(&schema).unwrap_err(),
        FtsError::FieldNotFound { .. }
    ));
}

#[test]
fn test_by_field_rules() {
    let missing = json!({"analyzers": {"default": {"type": "standard"}}});
    assert!(matches!(
        validate_schema(&text_schema(
            FieldSpec::new("text", DataType::VarChar).multi_analyzer(missing)
        ))
        .unwrap_err(),
        FtsError::MissingByField { .. }
    ));

    let undeclared = json!({
        "by_field": "lang",
        "analyzers": {"default": {"type": "standard"}}
    });
    assert!(matches!(
        validate_schema(&text_schema(
            FieldSpec::new("text", DataType::VarChar).multi_analyzer(undeclared)
        ))
        .unwrap_err(),
        FtsError::ByFieldNotFound { .. }
    ));
}

#[test]
fn test_params_checked_without_enable_analyzer() {
    let mut text = FieldSpec::new("text", DataType::VarChar);
    text.multi_analyzer_params = Some(json!({
        "by_field": "language",
        "analyzers": {"en": {"type": "english"}}
    }));
    let schema = CollectionSchema::new()
        .field(FieldSpec::new("id", DataType::Int64).primary())
        .field(FieldSpec::new("language", DataType::VarChar).nullable(true))
        .field(text.clone());
    assert!(matches!(
        validate_schema(&schema).unwrap_err(),
        FtsError::MissingDefaultAnalyzer { .. }
    ));

    let mut single = FieldSpec::new("text", DataType::VarChar);
    single.analyzer_params = Some(json!({"tokenizer": "nope"}));
    let schema = CollectionSchema::new()
        .field(FieldSpec::new("id", DataType::Int64).primary())
        .field(single);
    assert!(matches!(
        validate_schema(&schema).unwrap_err(),
        FtsError::InvalidAnalyzer { .. }
    ));

    // A valid block on a field without analysis is accepted and unused.
    text.multi_analyzer_params = Some(multi_analyzer_params());
    let schema = CollectionSchema::new()
        .field(FieldSpec::new("id", DataType::Int64).primary())
        .field(FieldSpec::new("language", DataType::VarChar).nullable(true))
        .field(text);
    let validated = validate_schema(&schema).unwrap();
    assert!(validated.analyzers().get("text").is_none());
}

#[test]
fn test_dangling_alias_is_accepted() {
    let params = json!({
        "by_field": "language",
        "analyzers": {"default": {"type": "standard"}},
        "alias": {"eng": "en"}
    });
    validate_schema(&text_schema(
        FieldSpec::new("text", DataType::VarChar).multi_analyzer(params),
    ))
    .unwrap();
}

#[test]
fn test_invalid_schema_creates_nothing() {
    let manager = textsift::catalog::CollectionManager::new(Config::default());
    let bad = text_schema(FieldSpec::new("text", DataType::VarChar));
    assert!(manager.create("docs", &bad).is_err());
    assert!(manager.list().is_empty());
}

// ---------------------------------------------------------------------------
// Index creation
// ---------------------------------------------------------------------------

#[test]
fn test_index_creation_errors() {
    let c = Collection::new("docs", &bm25_schema(), Config::default()).unwrap();

    let cases = [
        ("text_sparse", IndexParams::new("SPARSE_INVERTED_INDEX", "IP")),
        ("emb", IndexParams::new("HNSW", "BM25")),
        ("text_sparse", bm25_index().param("bm25_k1", -1.0)),
        ("text_sparse", bm25_index().param("bm25_b", 1.5)),
        ("text_sparse", IndexParams::new("NOT_AN_INDEX", "BM25")),
        ("emb", IndexParams::new("HNSW", "L2").param("M", 0)),
        ("nope", bm25_index()),
    ];
    for (field, params) in cases {
        let err = c.create_index(field, params.clone()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Index, "{field} {params:?}: {err}");
    }
    assert!(matches!(
        c.create_index("text_sparse", IndexParams::new("SPARSE_INVERTED_INDEX", "IP"))
            .unwrap_err(),
        FtsError::InvalidMetric { .. }
    ));
    assert!(matches!(
        c.create_index("nope", bm25_index()).unwrap_err(),
        FtsError::IndexFieldNotFound { .. }
    ));
    assert!(c.list_indexes().is_empty());
}

#[test]
fn test_index_params_round_trip_through_describe() {
    let c = Collection::new("docs", &bm25_schema(), Config::default()).unwrap();
    let params = IndexParams::new("SPARSE_WAND", "BM25")
        .param("bm25_k1", 1.5)
        .param("bm25_b", 0.3)
        .param("inverted_index_algo", "TAAT_NAIVE")
        .param("drop_ratio_build", 0.2);
    c.create_index("text_sparse", params.clone()).unwrap();
    assert_eq!(c.describe_index("text_sparse").unwrap(), params);
}

// ---------------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------------

#[test]
fn test_type_mismatch_rejects_batch() {
    let c = indexed_collection(Config::default());
    let mut rng = rng(1);
    let mut rows = random_rows(&mut rng, 0..10);
    rows[7].insert("text".to_string(), FieldValue::Int(3));
    let err = c.insert(rows).unwrap_err();
    assert!(matches!(err, FtsError::SchemaTypeMismatch { .. }));
    assert_eq!(err.category(), ErrorCategory::Ingest);
    assert_eq!(c.count(), 0);
}

#[test]
fn test_invalid_payloads() {
    let c = indexed_collection(Config::default());
    let good = || random_rows(&mut rng(3), 0..1).remove(0);

    let mut wrong_dim = good();
    wrong_dim.insert("emb".to_string(), FieldValue::FloatVector(vec![0.0; 3]));
    assert!(matches!(
        c.insert(vec![wrong_dim]).unwrap_err(),
        FtsError::DimensionMismatch { .. }
    ));

    let mut generated = good();
    generated.insert(
        "text_sparse".to_string(),
        FieldValue::SparseVector(SparseVector::from_iter([(1, 1.0)])),
    );
    assert!(matches!(
        c.insert(vec![generated]).unwrap_err(),
        FtsError::FunctionOutputProvided { .. }
    ));

    let mut unknown = good();
    unknown.insert("bogus".to_string(), FieldValue::Bool(true));
    assert!(matches!(
        c.insert(vec![unknown]).unwrap_err(),
        FtsError::UnknownField { .. }
    ));

    let mut missing = good();
    missing.remove("text");
    assert!(matches!(
        c.insert(vec![missing]).unwrap_err(),
        FtsError::MissingField { .. }
    ));

    let mut too_long = good();
    too_long.insert("text".to_string(), FieldValue::from("x".repeat(5000)));
    assert!(matches!(
        c.insert(vec![too_long]).unwrap_err(),
        FtsError::MaxLengthExceeded { .. }
    ));

    assert_eq!(c.count(), 0);
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[test]
fn test_search_request_errors() {
    let c = indexed_collection(Config::default());
    c.insert(random_rows(&mut rng(4), 0..20)).unwrap();

    let dense_on_bm25 = SearchRequest::new("text_sparse", vec![vec![0.1f32; EMB_DIM].into()]);
    assert!(matches!(
        c.search(&dense_on_bm25).unwrap_err(),
        FtsError::UnsupportedQueryType { .. }
    ));

    let text_on_dense = SearchRequest::text("emb", "apple");
    assert!(matches!(
        c.search(&text_on_dense).unwrap_err(),
        FtsError::UnsupportedQueryType { .. }
    ));

    for expr in ["id <", "text_match(text)", "nope == 1", "id == 'a'", "(id == 1"] {
        let request = SearchRequest::text("text_sparse", "apple").filter(expr);
        assert!(
            matches!(c.search(&request).unwrap_err(), FtsError::InvalidFilter { .. }),
            "{expr}"
        );
    }

    let invalid = [
        SearchRequest::text("text_sparse", "apple").limit(0),
        SearchRequest::text("text_sparse", "apple").offset(16_384).limit(1),
        SearchRequest::text("text_sparse", "apple").range_filter(3.0),
        SearchRequest::text("text_sparse", "apple").radius(f32::NAN),
        SearchRequest::text("text_sparse", "apple").metric_type("IP"),
        SearchRequest::text("text_sparse", "apple").output_fields(&["text_sparse"]),
        SearchRequest::text("text_sparse", "apple").output_fields(&["missing"]),
    ];
    for request in &invalid {
        assert!(
            matches!(c.search(request).unwrap_err(), FtsError::InvalidParameter(_)),
            "{request:?}"
        );
    }

    let row: Row = serde_json::from_value(json!({"id": 1})).unwrap();
    assert!(c.insert(vec![row]).is_err());
}

#[test]
fn test_deeply_nested_filter_is_rejected() {
    let c = indexed_collection(Config::default());
    c.insert(random_rows(&mut rng(5), 0..20)).unwrap();

    let nested = |n: usize| format!("{}category == 1{}", "(".repeat(n), ")".repeat(n));
    let err = c.count_where(&nested(200_000)).unwrap_err();
    assert!(matches!(err, FtsError::InvalidFilter { .. }));
    assert!(matches!(
        c.query(&"not ".repeat(200_000), &[], None).unwrap_err(),
        FtsError::InvalidFilter { .. }
    ));
    let request = SearchRequest::text("text_sparse", "apple").filter(nested(100_000));
    assert!(matches!(
        c.search(&request).unwrap_err(),
        FtsError::InvalidFilter { .. }
    ));

    assert_eq!(
        c.count_where(&nested(100)).unwrap(),
        c.count_where("category == 1").unwrap()
    );
}

#[test]
fn test_iterator_batch_size_bounds() {
    let c = indexed_collection(Config::default());
    let request = SearchRequest::text("text_sparse", "apple");
    assert!(c.search_iterator(&request, Some(0), None).is_err());
    assert!(c.search_iterator(&request, Some(1_000_000), None).is_err());
    let two = SearchRequest::new(
        "text_sparse",
        vec!["a".to_string().into(), "b".to_string().into()],
    );
    assert!(c.search_iterator(&two, Some(10), None).is_err());

    let past_cap = request.clone().offset(c.config().search.max_topk + 1);
    assert!(c.search_iterator(&past_cap, Some(10), None).is_err());
    let bad_filter = request.clone().filter("id >");
    assert!(matches!(
        c.search_iterator(&bad_filter, Some(10), None).unwrap_err(),
        FtsError::InvalidFilter { .. }
    ));
    // No cap on the total number of results.
    assert!(c.search_iterator(&request, Some(10), Some(1_000_000)).is_ok());
}
