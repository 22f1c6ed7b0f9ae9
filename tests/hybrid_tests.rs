mod common;

use std::collections::{HashMap, HashSet};

use common::fixtures::*;
use serde_json::json;
use textsift::error::FtsError;
use textsift::query::rerank::DEFAULT_RRF_K;
use textsift::query::{HybridSearchRequest, Ranker, SearchRequest};
use textsift::types::PrimaryKey;

fn loaded() -> textsift::collection::Collection {
    let collection = indexed_collection(small_segments());
    collection.insert(random_rows(&mut rng(31), 0..600)).unwrap();
    collection
}

fn requests(probe: Vec<f32>) -> Vec<SearchRequest> {
    vec![
        SearchRequest::text("text_sparse", "meadow signal").limit(60),
        SearchRequest::new("emb", vec![probe.into()]).limit(60),
    ]
}

#[test]
fn test_rrf_matches_manual_fusion() {
    let c = loaded();
    let probe = random_embedding(&mut rng(32));
    let singles: Vec<_> = requests(probe.clone())
        .iter()
        .map(|r| c.search(r).unwrap().remove(0))
        .collect();

    let mut expected: HashMap<PrimaryKey, f32> = HashMap::new();
    for list in &singles {
        for (rank, hit) in list.iter().enumerate() {
            *expected.entry(hit.id.clone()).or_default() += 1.0 / (DEFAULT_RRF_K + rank as f32 + 1.0);
        }
    }

    let fused = c
        .hybrid_search(&HybridSearchRequest::new(requests(probe), Ranker::rrf(DEFAULT_RRF_K)).limit(20))
        .unwrap()
        .remove(0);
    assert_eq!(fused.len(), 20);
    for hit in &fused {
        assert!((hit.score - expected[&hit.id]).abs() < 1e-6);
    }
    for pair in fused.windows(2) {
        assert!(
            pair[0].score > pair[1].score
                || (pair[0].score == pair[1].score && pair[0].id < pair[1].id)
        );
    }
}

#[test]
fn test_weighted_single_input_keeps_order() {
    let c = loaded();
    let probe = random_embedding(&mut rng(33));
    let text_only = c
        .search(&requests(probe.clone())[0].clone().limit(15))
        .unwrap()
        .remove(0);
    let fused = c
        .hybrid_search(
            &HybridSearchRequest::new(requests(probe), Ranker::weighted(vec![1.0, 0.0])).limit(15),
        )
        .unwrap()
        .remove(0);
    // Normalization is monotonic, so a zero weight on the second list
    // leaves the first list's order intact among its own hits.
    let text_ids: Vec<_> = ids(&text_only);
    let fused_text: Vec<_> = fused
        .iter()
        .filter(|h| text_ids.contains(&h.id))
        .map(|h| h.id.clone())
        .collect();
    assert_eq!(fused_text, text_ids[..fused_text.len()].to_vec());
}

#[test]
fn test_offset_window_over_fused_results() {
    let c = loaded();
    let probe = random_embedding(&mut rng(34));
    let full = c
        .hybrid_search(&HybridSearchRequest::new(requests(probe.clone()), Ranker::default()).limit(30))
        .unwrap()
        .remove(0);
    let window = c
        .hybrid_search(
            &HybridSearchRequest::new(requests(probe), Ranker::default())
                .offset(10)
                .limit(10),
        )
        .unwrap()
        .remove(0);
    assert_eq!(ids(&window), ids(&full[10..20]));
}

#[test]
fn test_group_by_keeps_best_hit_per_group() {
    let c = loaded();
    let probe = random_embedding(&mut rng(35));
    let ungrouped = c
        .hybrid_search(
            &HybridSearchRequest::new(requests(probe.clone()), Ranker::rrf(60.0))
                .limit(100)
                .output_fields(&["category"]),
        )
        .unwrap()
        .remove(0);
    let grouped = c
        .hybrid_search(
            &HybridSearchRequest::new(requests(probe), Ranker::rrf(60.0))
                .limit(10)
                .group_by("category")
                .output_fields(&["category"]),
        )
        .unwrap()
        .remove(0);

    assert_eq!(grouped.len(), 5);
    let mut seen = HashSet::new();
    for hit in &grouped {
        let group = hit.fields["category"].clone();
        let best = ungrouped
            .iter()
            .find(|h| h.fields["category"] == group)
            .unwrap();
        assert_eq!(hit.id, best.id);
        assert!(seen.insert(format!("{group:?}")));
    }
}

#[test]
fn test_group_by_field_is_fetched_but_not_returned_unless_requested() {
    let c = loaded();
    let grouped = c
        .hybrid_search(
            &HybridSearchRequest::new(requests(random_embedding(&mut rng(36))), Ranker::default())
                .group_by("category"),
        )
        .unwrap()
        .remove(0);
    assert!(!grouped.is_empty());
    assert!(grouped.iter().all(|h| !h.fields.contains_key("category")));
}

#[test]
fn test_ranker_validation() {
    let c = loaded();
    let probe = random_embedding(&mut rng(37));
    let bad = [
        Ranker::weighted(vec![1.0]),
        Ranker::weighted(vec![0.5, 1.5]),
        Ranker::rrf(0.0),
        Ranker::rrf(f32::INFINITY),
    ];
    for ranker in bad {
        let err = c
            .hybrid_search(&HybridSearchRequest::new(requests(probe.clone()), ranker.clone()))
            .unwrap_err();
        assert!(matches!(err, FtsError::InvalidParameter(_)), "{ranker:?}");
    }
    let err = c
        .hybrid_search(&HybridSearchRequest::new(requests(probe), Ranker::default()).group_by("emb"))
        .unwrap_err();
    assert!(matches!(err, FtsError::InvalidParameter(_)));
}

#[test]
fn test_ranker_from_json() {
    let rrf = Ranker::from_value(&json!({"strategy": "rrf", "params": {"k": 20}})).unwrap();
    assert_eq!(rrf, Ranker::rrf(20.0));
    let weighted =
        Ranker::from_value(&json!({"strategy": "weighted", "params": {"weights": [0.2, 0.8]}}))
            .unwrap();
    assert_eq!(weighted, Ranker::weighted(vec![0.2, 0.8]));
    assert!(Ranker::from_value(&json!({"strategy": "borda"})).is_err());
    assert_eq!(Ranker::from_value(&rrf.to_json_value()).unwrap(), rrf);
}
