use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use textsift::collection::Collection;
use textsift::config::Config;
use textsift::index::IndexParams;
use textsift::schema::{CollectionSchema, FieldSpec, FunctionSpec};
use textsift::types::{DataType, FieldValue, PrimaryKey, Row, SearchResult};

pub const EMB_DIM: usize = 8;

pub const WORDS: &[&str] = &[
    "apple", "river", "stone", "cloud", "engine", "harbor", "lantern", "meadow", "copper",
    "violet", "signal", "garden", "thunder", "pepper", "silver", "canyon", "orbit", "willow",
    "marble", "falcon", "ember", "glacier", "saffron", "quartz",
];

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Space separated words drawn from a skewed distribution, so some terms
/// are frequent and some rare.
pub fn random_text(rng: &mut StdRng, words: usize) -> String {
    (0..words)
        .map(|_| {
            let a = rng.gen_range(0..WORDS.len());
            let b = rng.gen_range(0..WORDS.len());
            WORDS[a.min(b)]
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn random_embedding(rng: &mut StdRng) -> Vec<f32> {
    (0..EMB_DIM).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

/// `{id, category, text, emb, text_sparse}` with `bm25(text) -> text_sparse`.
pub fn bm25_schema() -> CollectionSchema {
    CollectionSchema::new()
        .field(FieldSpec::new("id", DataType::Int64).primary())
        .field(FieldSpec::new("category", DataType::Int64))
        .field(
            FieldSpec::new("text", DataType::VarChar)
                .max_length(4096)
                .enable_analyzer()
                .enable_match(),
        )
        .field(FieldSpec::new("emb", DataType::FloatVector).dim(EMB_DIM))
        .field(FieldSpec::new("text_sparse", DataType::SparseFloatVector))
        .function(FunctionSpec::bm25("text_bm25", "text", "text_sparse"))
}

pub fn doc_row(id: i64, category: i64, text: &str, emb: Vec<f32>) -> Row {
    Row::from([
        ("id".to_string(), FieldValue::Int(id)),
        ("category".to_string(), FieldValue::Int(category)),
        ("text".to_string(), FieldValue::from(text)),
        ("emb".to_string(), FieldValue::FloatVector(emb)),
    ])
}

pub fn random_rows(rng: &mut StdRng, ids: std::ops::Range<i64>) -> Vec<Row> {
    ids.map(|id| {
        let words = rng.gen_range(1..12);
        let text = random_text(rng, words);
        let emb = random_embedding(rng);
        doc_row(id, id % 5, &text, emb)
    })
    .collect()
}

pub fn bm25_index() -> IndexParams {
    IndexParams::new("SPARSE_INVERTED_INDEX", "BM25")
        .param("bm25_k1", 1.2)
        .param("bm25_b", 0.75)
}

pub fn hnsw_index() -> IndexParams {
    IndexParams::new("HNSW", "L2")
        .param("M", 16)
        .param("efConstruction", 200)
}

/// Collection over [`bm25_schema`] with both indexes created.
pub fn indexed_collection(config: Config) -> Collection {
    let collection = Collection::new("docs", &bm25_schema(), config).expect("schema is valid");
    collection
        .create_index("text_sparse", bm25_index())
        .expect("bm25 index");
    collection.create_index("emb", hnsw_index()).expect("hnsw index");
    collection
}

pub fn small_segments() -> Config {
    let mut config = Config::default();
    config.segment.max_growing_rows = 97;
    config
}

pub fn ids(hits: &[SearchResult]) -> Vec<PrimaryKey> {
    hits.iter().map(|h| h.id.clone()).collect()
}

pub fn multi_analyzer_params() -> serde_json::Value {
    json!({
        "by_field": "language",
        "analyzers": {
            "en": {"type": "english"},
            "zh": {"type": "chinese"},
            "default": {"tokenizer": "standard", "filter": ["lowercase"]}
        },
        "alias": {"eng": "en", "cn": "zh", "legacy": "retired"}
    })
}

/// `{id, language, text(multi analyzer), text_sparse}`.
pub fn multi_analyzer_schema() -> CollectionSchema {
    CollectionSchema::new()
        .field(FieldSpec::new("id", DataType::Int64).primary())
        .field(FieldSpec::new("language", DataType::VarChar).nullable(true))
        .field(
            FieldSpec::new("text", DataType::VarChar)
                .enable_analyzer()
                .multi_analyzer(multi_analyzer_params()),
        )
        .field(FieldSpec::new("text_sparse", DataType::SparseFloatVector))
        .function(FunctionSpec::bm25("text_bm25", "text", "text_sparse"))
}

pub fn lang_row(id: i64, language: Option<&str>, text: &str) -> Row {
    Row::from([
        ("id".to_string(), FieldValue::Int(id)),
        (
            "language".to_string(),
            language.map_or(FieldValue::Null, FieldValue::from),
        ),
        ("text".to_string(), FieldValue::from(text)),
    ])
}
