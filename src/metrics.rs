#![allow(clippy::unwrap_used)]

use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

lazy_static::lazy_static! {
    pub static ref ROWS_INGESTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "textsift_rows_ingested_total", "Rows applied by insert and upsert", &["collection", "op"]
    ).unwrap();
    pub static ref INGEST_BATCHES_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "textsift_ingest_batches_rejected_total", "Write batches rejected by validation",
        &["collection"]
    ).unwrap();
    pub static ref SEARCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "textsift_searches_total", "Search requests", &["collection", "kind"]
    ).unwrap();
    pub static ref SEARCH_DURATION: HistogramVec = register_histogram_vec!(
        "textsift_search_duration_seconds", "Search duration", &["collection", "kind"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    ).unwrap();
    pub static ref SEGMENTS_SEALED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "textsift_segments_sealed_total", "Growing segments sealed", &["collection"]
    ).unwrap();
    pub static ref SEAL_DURATION: HistogramVec = register_histogram_vec!(
        "textsift_seal_duration_seconds", "Segment seal duration", &["collection"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();
    pub static ref POSTINGS_VISITED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "textsift_postings_visited_total", "Posting entries scored during retrieval",
        &["strategy"]
    ).unwrap();
}

pub fn init() {
    lazy_static::initialize(&ROWS_INGESTED_TOTAL);
    lazy_static::initialize(&INGEST_BATCHES_REJECTED_TOTAL);
    lazy_static::initialize(&SEARCHES_TOTAL);
    lazy_static::initialize(&SEARCH_DURATION);
    lazy_static::initialize(&SEGMENTS_SEALED_TOTAL);
    lazy_static::initialize(&SEAL_DURATION);
    lazy_static::initialize(&POSTINGS_VISITED_TOTAL);
}

/// Render the default registry in the Prometheus text exposition format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
