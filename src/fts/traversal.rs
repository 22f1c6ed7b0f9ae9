//! Ranked retrieval over an [`InvertedIndex`].
//!
//! Three strategies are available:
//!
//! - `TaatNaive`: term-at-a-time, every posting of every query term is
//!   scored. This is the reference.
//! - `DaatWand`: document-at-a-time WAND. Cursors are ordered by current
//!   document; the pivot is the first cursor at which the sum of upper
//!   bounds reaches the current threshold.
//! - `DaatMaxScore`: document-at-a-time MaxScore. Terms are split into
//!   essential and non-essential sets by upper bound prefix sums; only
//!   essential lists drive candidate generation.
//!
//! All three sum a document's term contributions in query term order, so
//! they produce bit-identical scores, and the pruning comparisons are
//! non-strict, so documents tied with the k-th score are still evaluated.
//! Combined with the (score, primary key) order of [`TopK`], the pruned
//! strategies return exactly the list `TaatNaive` returns.

use std::collections::HashMap;

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::fts::bm25::{tf_weight, Bm25Params};
use crate::fts::inverted_index::{InvertedIndex, Posting};
use crate::metrics;
use crate::query::collector::{Hit, ScoreOrder, TopK};
use crate::types::{DocId, PrimaryKey};

/// Relative slack applied to upper bounds so float rounding in a
/// document's summed score can never exceed its bound.
const BOUND_SLACK: f32 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraversalStrategy {
    TaatNaive,
    DaatWand,
    #[serde(rename = "DAAT_MAXSCORE")]
    DaatMaxScore,
}

impl TraversalStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            TraversalStrategy::TaatNaive => "TAAT_NAIVE",
            TraversalStrategy::DaatWand => "DAAT_WAND",
            TraversalStrategy::DaatMaxScore => "DAAT_MAXSCORE",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "TAAT_NAIVE" => Some(TraversalStrategy::TaatNaive),
            "DAAT_WAND" => Some(TraversalStrategy::DaatWand),
            "DAAT_MAXSCORE" => Some(TraversalStrategy::DaatMaxScore),
            _ => None,
        }
    }
}

/// A query term with its precomputed weight `query_tf * idf`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryTerm {
    pub term: u32,
    pub weight: f32,
}

/// Inclusive score band; `None` leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreBand {
    pub min: Option<f32>,
    pub max: Option<f32>,
}

impl ScoreBand {
    pub fn contains(&self, score: f32) -> bool {
        self.min.map_or(true, |m| score >= m) && self.max.map_or(true, |m| score <= m)
    }
}

/// Everything one traversal needs from its segment and its query.
pub struct Retrieval<'a> {
    pub index: &'a InvertedIndex,
    /// Distinct terms in canonical order.
    pub terms: &'a [QueryTerm],
    pub avg_doc_length: f32,
    pub params: Bm25Params,
    /// Documents eligible for scoring (filter passed, not deleted).
    pub allowed: &'a RoaringBitmap,
    /// Primary keys by segment ordinal.
    pub keys: &'a [PrimaryKey],
    pub band: ScoreBand,
    /// Only documents ranked strictly after this (score, key) qualify.
    pub after: Option<(f32, &'a PrimaryKey)>,
    pub cancel: Option<&'a CancelToken>,
    pub cancel_check_interval: usize,
}

impl<'a> Retrieval<'a> {
    /// Best `k` documents, best-first.
    pub fn top_k(&self, strategy: TraversalStrategy, k: usize) -> Result<Vec<Hit>> {
        if k == 0 || self.terms.is_empty() || self.allowed.is_empty() {
            return Ok(Vec::new());
        }
        let mut budget = Budget::new(self.cancel, self.cancel_check_interval);
        let mut topk = TopK::new(k, ScoreOrder::HigherIsBetter);
        match strategy {
            TraversalStrategy::TaatNaive => self.taat(&mut topk, &mut budget)?,
            TraversalStrategy::DaatWand => self.wand(&mut topk, &mut budget)?,
            TraversalStrategy::DaatMaxScore => self.maxscore(&mut topk, &mut budget)?,
        }
        metrics::POSTINGS_VISITED_TOTAL
            .with_label_values(&[strategy.as_str()])
            .inc_by(budget.visited);
        Ok(topk.into_sorted())
    }

    #[inline]
    fn contribution(&self, slot: usize, posting: &Posting) -> f32 {
        self.terms[slot].weight
            * tf_weight(
                posting.tf,
                self.index.doc_length(posting.doc),
                self.avg_doc_length,
                &self.params,
            )
    }

    fn key(&self, doc: DocId) -> Option<&PrimaryKey> {
        self.keys.get(doc as usize)
    }

    fn collect(&self, topk: &mut TopK, doc: DocId, score: f32) {
        if !self.band.contains(score) {
            return;
        }
        let Some(key) = self.key(doc) else {
            return;
        };
        if let Some(cursor) = self.after {
            if !ScoreOrder::HigherIsBetter.follows((score, key), cursor) {
                return;
            }
        }
        topk.offer(doc, score, key);
    }

    /// Score a document must reach to be worth evaluating.
    fn threshold(&self, topk: &TopK) -> Option<f32> {
        match (topk.threshold(), self.band.min) {
            (Some(t), Some(m)) => Some(t.max(m)),
            (t, m) => t.or(m),
        }
    }

    fn taat(&self, topk: &mut TopK, budget: &mut Budget<'_>) -> Result<()> {
        let mut scores: HashMap<DocId, f32> = HashMap::new();
        for (slot, qt) in self.terms.iter().enumerate() {
            let Some(list) = self.index.posting_list(qt.term) else {
                continue;
            };
            for posting in list.entries() {
                budget.tick()?;
                if !self.allowed.contains(posting.doc) {
                    continue;
                }
                *scores.entry(posting.doc).or_insert(0.0) += self.contribution(slot, posting);
            }
        }
        for (doc, score) in scores {
            self.collect(topk, doc, score);
        }
        Ok(())
    }

    fn cursors(&self) -> Vec<Cursor<'a>> {
        self.terms
            .iter()
            .enumerate()
            .filter_map(|(slot, qt)| {
                let list = self.index.posting_list(qt.term)?;
                let bound = qt.weight * list.max_weight(self.avg_doc_length, &self.params);
                Some(Cursor {
                    slot,
                    entries: list.entries(),
                    pos: 0,
                    upper: inflate(bound),
                })
            })
            .collect()
    }

    /// Sum contributions in slot order.
    fn canonical_score(contributions: &mut [(usize, f32)]) -> f32 {
        contributions.sort_unstable_by_key(|(slot, _)| *slot);
        contributions.iter().fold(0.0f32, |acc, (_, c)| acc + c)
    }

    fn wand(&self, topk: &mut TopK, budget: &mut Budget<'_>) -> Result<()> {
        let mut cursors = self.cursors();
        let mut contributions = Vec::with_capacity(cursors.len());

        loop {
            cursors.retain(|c| !c.exhausted());
            if cursors.is_empty() {
                break;
            }
            cursors.sort_by_key(Cursor::doc);
            budget.tick()?;

            let threshold = self.threshold(topk);
            let mut upper_sum = 0.0f32;
            let mut pivot = None;
            for (i, cursor) in cursors.iter().enumerate() {
                upper_sum += cursor.upper;
                if threshold.map_or(true, |t| upper_sum >= t) {
                    pivot = Some(i);
                    break;
                }
            }
            let Some(pivot) = pivot else {
                // No remaining document can reach the threshold.
                break;
            };
            let pivot_doc = cursors[pivot].doc();

            if cursors[0].doc() == pivot_doc {
                if self.allowed.contains(pivot_doc) {
                    contributions.clear();
                    for cursor in cursors.iter().filter(|c| c.doc() == pivot_doc) {
                        if let Some(p) = cursor.current() {
                            budget.tick()?;
                            contributions.push((cursor.slot, self.contribution(cursor.slot, p)));
                        }
                    }
                    let score = Self::canonical_score(&mut contributions);
                    self.collect(topk, pivot_doc, score);
                }
                for cursor in cursors.iter_mut().filter(|c| c.doc() == pivot_doc) {
                    cursor.advance();
                }
            } else {
                for cursor in cursors[..pivot].iter_mut() {
                    cursor.advance_to(pivot_doc);
                }
            }
        }
        Ok(())
    }

    fn maxscore(&self, topk: &mut TopK, budget: &mut Budget<'_>) -> Result<()> {
        let mut cursors = self.cursors();
        if cursors.is_empty() {
            return Ok(());
        }
        cursors.sort_by(|a, b| a.upper.total_cmp(&b.upper));
        // prefix[i] = sum of upper bounds of cursors[..=i]
        let prefix: Vec<f32> = cursors
            .iter()
            .scan(0.0f32, |acc, c| {
                *acc += c.upper;
                Some(*acc)
            })
            .collect();
        let mut contributions = Vec::with_capacity(cursors.len());

        loop {
            budget.tick()?;
            let threshold = self.threshold(topk);
            // cursors[..essential] cannot produce a qualifying hit on their own.
            let essential = threshold.map_or(0, |t| prefix.partition_point(|&p| p < t));
            if essential == cursors.len() {
                break;
            }

            let candidate = cursors[essential..]
                .iter()
                .map(Cursor::doc)
                .min()
                .unwrap_or(DocId::MAX);
            if candidate == DocId::MAX {
                break;
            }

            contributions.clear();
            let mut partial = 0.0f32;
            for cursor in cursors[essential..].iter_mut() {
                if cursor.doc() == candidate {
                    if let Some(p) = cursor.current() {
                        budget.tick()?;
                        let c = self.contribution(cursor.slot, p);
                        partial += c;
                        contributions.push((cursor.slot, c));
                    }
                    cursor.advance();
                }
            }

            if !self.allowed.contains(candidate) {
                continue;
            }

            let mut pruned = false;
            for j in (0..essential).rev() {
                if let Some(t) = threshold {
                    if inflate(partial) + prefix[j] < t {
                        pruned = true;
                        break;
                    }
                }
                let cursor = &mut cursors[j];
                cursor.advance_to(candidate);
                if cursor.doc() == candidate {
                    if let Some(p) = cursor.current() {
                        budget.tick()?;
                        let c = self.contribution(cursor.slot, p);
                        partial += c;
                        contributions.push((cursor.slot, c));
                    }
                }
            }
            if pruned {
                continue;
            }
            let score = Self::canonical_score(&mut contributions);
            self.collect(topk, candidate, score);
        }
        Ok(())
    }
}

#[inline]
fn inflate(bound: f32) -> f32 {
    bound * (1.0 + BOUND_SLACK) + f32::EPSILON
}

struct Cursor<'a> {
    slot: usize,
    entries: &'a [Posting],
    pos: usize,
    upper: f32,
}

impl Cursor<'_> {
    fn exhausted(&self) -> bool {
        self.pos >= self.entries.len()
    }

    fn doc(&self) -> DocId {
        self.entries.get(self.pos).map_or(DocId::MAX, |p| p.doc)
    }

    fn current(&self) -> Option<&Posting> {
        self.entries.get(self.pos)
    }

    fn advance(&mut self) {
        if !self.exhausted() {
            self.pos += 1;
        }
    }

    fn advance_to(&mut self, target: DocId) {
        if self.exhausted() {
            return;
        }
        self.pos += self.entries[self.pos..].partition_point(|p| p.doc < target);
    }
}

/// Counts visited postings and polls the cancel token every `interval`.
struct Budget<'a> {
    cancel: Option<&'a CancelToken>,
    interval: u64,
    visited: u64,
    until_check: u64,
}

impl<'a> Budget<'a> {
    fn new(cancel: Option<&'a CancelToken>, interval: usize) -> Self {
        let interval = interval.max(1) as u64;
        Self {
            cancel,
            interval,
            visited: 0,
            until_check: interval,
        }
    }

    #[inline]
    fn tick(&mut self) -> Result<()> {
        self.visited += 1;
        self.until_check -= 1;
        if self.until_check == 0 {
            self.until_check = self.interval;
            if let Some(cancel) = self.cancel {
                cancel.check()?;
            }
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FtsError;
    use crate::fts::analyzer::Analyzer;
    use crate::fts::stats::CorpusStatistics;
    use crate::fts::vectorizer::{vectorize_query, DocumentTerms};

    struct Fixture {
        index: InvertedIndex,
        stats: CorpusStatistics,
        keys: Vec<PrimaryKey>,
        allowed: RoaringBitmap,
    }

    fn fixture(texts: &[&str]) -> Fixture {
        let analyzer = Analyzer::standard();
        let docs: Vec<DocumentTerms> = texts
            .iter()
            .map(|t| DocumentTerms::from_tokens(&analyzer.analyze(t)))
            .collect();
        let mut stats = CorpusStatistics::new();
        for d in &docs {
            stats.add_document(d);
        }
        Fixture {
            index: InvertedIndex::build(&docs),
            stats,
            keys: (0..texts.len() as i64).map(PrimaryKey::Int).collect(),
            allowed: (0..texts.len() as u32).collect(),
        }
    }

    fn query_terms(f: &Fixture, text: &str) -> Vec<QueryTerm> {
        let q = vectorize_query(&Analyzer::standard().analyze(text));
        let ids: Vec<u32> = q.iter().map(|(t, _)| t).collect();
        let qs = f.stats.partial(&ids);
        q.iter()
            .filter_map(|(term, qtf)| {
                qs.idf(term).map(|idf| QueryTerm {
                    term,
                    weight: qtf * idf,
                })
            })
            .collect()
    }

    fn run(f: &Fixture, text: &str, strategy: TraversalStrategy, k: usize) -> Vec<Hit> {
        let terms = query_terms(f, text);
        Retrieval {
            index: &f.index,
            terms: &terms,
            avg_doc_length: f.stats.avg_doc_length(),
            params: Bm25Params::default(),
            allowed: &f.allowed,
            keys: &f.keys,
            band: ScoreBand::default(),
            after: None,
            cancel: None,
            cancel_check_interval: 1024,
        }
        .top_k(strategy, k)
        .unwrap()
    }

    const CORPUS: &[&str] = &[
        "the quick brown fox jumps over the lazy dog",
        "quick quick quick",
        "a lazy afternoon with a brown dog",
        "foxes and dogs are not friends",
        "the dog sleeps",
        "nothing relevant here",
        "brown bread and brown butter",
        "quick brown dog",
    ];

    #[test]
    fn test_taat_ranks_matching_docs() {
        let f = fixture(CORPUS);
        let hits = run(&f, "quick brown", TraversalStrategy::TaatNaive, 10);
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.score > 0.0));
        assert!(!hits.iter().any(|h| h.key == PrimaryKey::Int(5)));
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_strategies_agree() {
        let f = fixture(CORPUS);
        for query in ["quick brown", "dog", "brown brown lazy", "fox dog quick bread"] {
            for k in [1, 2, 3, 5, 10] {
                let reference = run(&f, query, TraversalStrategy::TaatNaive, k);
                let wand = run(&f, query, TraversalStrategy::DaatWand, k);
                let maxscore = run(&f, query, TraversalStrategy::DaatMaxScore, k);
                assert_eq!(reference, wand, "wand query={query} k={k}");
                assert_eq!(reference, maxscore, "maxscore query={query} k={k}");
            }
        }
    }

    #[test]
    fn test_ties_resolved_by_key() {
        let f = fixture(&["same text", "same text", "same text"]);
        for strategy in [
            TraversalStrategy::TaatNaive,
            TraversalStrategy::DaatWand,
            TraversalStrategy::DaatMaxScore,
        ] {
            let hits = run(&f, "same", strategy, 2);
            let keys: Vec<_> = hits.iter().map(|h| h.key.clone()).collect();
            assert_eq!(keys, vec![PrimaryKey::Int(0), PrimaryKey::Int(1)]);
        }
    }

    #[test]
    fn test_disallowed_docs_excluded() {
        let mut f = fixture(CORPUS);
        f.allowed.remove(1);
        f.allowed.remove(7);
        for strategy in [TraversalStrategy::TaatNaive, TraversalStrategy::DaatWand] {
            let hits = run(&f, "quick", strategy, 10);
            assert!(hits
                .iter()
                .all(|h| h.key != PrimaryKey::Int(1) && h.key != PrimaryKey::Int(7)));
            assert_eq!(hits.len(), 1);
        }
    }

    #[test]
    fn test_band_bounds_scores() {
        let f = fixture(CORPUS);
        let all = run(&f, "brown dog", TraversalStrategy::TaatNaive, 10);
        let low = all[all.len() - 1].score;
        let high = all[0].score;
        let mid = (low + high) / 2.0;
        let terms = query_terms(&f, "brown dog");
        for strategy in [
            TraversalStrategy::TaatNaive,
            TraversalStrategy::DaatWand,
            TraversalStrategy::DaatMaxScore,
        ] {
            let hits = Retrieval {
                index: &f.index,
                terms: &terms,
                avg_doc_length: f.stats.avg_doc_length(),
                params: Bm25Params::default(),
                allowed: &f.allowed,
                keys: &f.keys,
                band: ScoreBand {
                    min: Some(mid),
                    max: Some(high),
                },
                after: None,
                cancel: None,
                cancel_check_interval: 1024,
            }
            .top_k(strategy, 10)
            .unwrap();
            assert!(!hits.is_empty());
            assert!(hits.len() < all.len());
            assert!(hits.iter().all(|h| h.score >= mid && h.score <= high));
        }
    }

    #[test]
    fn test_cancelled_traversal() {
        let texts: Vec<String> = (0..200).map(|i| format!("common term {i}")).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let f = fixture(&refs);
        let terms = query_terms(&f, "common term");
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = Retrieval {
            index: &f.index,
            terms: &terms,
            avg_doc_length: f.stats.avg_doc_length(),
            params: Bm25Params::default(),
            allowed: &f.allowed,
            keys: &f.keys,
            band: ScoreBand::default(),
            after: None,
            cancel: Some(&cancel),
            cancel_check_interval: 16,
        }
        .top_k(TraversalStrategy::TaatNaive, 10);
        assert!(matches!(result, Err(FtsError::Cancelled)));
    }

    #[test]
    fn test_pages_after_cursor_concatenate_to_full_list() {
        let f = fixture(CORPUS);
        let terms = query_terms(&f, "brown dog quick");
        let full = run(&f, "brown dog quick", TraversalStrategy::TaatNaive, 10);
        for strategy in [
            TraversalStrategy::TaatNaive,
            TraversalStrategy::DaatWand,
            TraversalStrategy::DaatMaxScore,
        ] {
            let mut paged: Vec<Hit> = Vec::new();
            loop {
                let cursor = paged.last().map(|h| (h.score, &h.key));
                let page = Retrieval {
                    index: &f.index,
                    terms: &terms,
                    avg_doc_length: f.stats.avg_doc_length(),
                    params: Bm25Params::default(),
                    allowed: &f.allowed,
                    keys: &f.keys,
                    band: ScoreBand::default(),
                    after: cursor,
                    cancel: None,
                    cancel_check_interval: 1024,
                }
                .top_k(strategy, 2)
                .unwrap();
                if page.is_empty() {
                    break;
                }
                paged.extend(page);
            }
            assert_eq!(paged, full, "{strategy:?}");
        }
    }

    #[test]
    fn test_no_terms_no_hits() {
        let f = fixture(CORPUS);
        assert!(run(&f, "zebra", TraversalStrategy::DaatWand, 10).is_empty());
        assert!(run(&f, "", TraversalStrategy::TaatNaive, 10).is_empty());
    }

    #[test]
    fn test_strategy_names_round_trip() {
        for s in [
            TraversalStrategy::TaatNaive,
            TraversalStrategy::DaatWand,
            TraversalStrategy::DaatMaxScore,
        ] {
            assert_eq!(TraversalStrategy::parse(s.as_str()), Some(s));
        }
        assert_eq!(TraversalStrategy::parse("BOGUS"), None);
    }
}
