//! Bounded top-k collection with a total order on results.
//!
//! Results are ranked by score (direction depends on the metric) and ties
//! are broken by ascending primary key, so every retrieval strategy that
//! computes identical scores returns an identical list.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;

use crate::types::{DocId, PrimaryKey};

/// Which end of the score range is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreOrder {
    /// Similarities: BM25, IP, COSINE.
    HigherIsBetter,
    /// Distances: L2.
    LowerIsBetter,
}

impl ScoreOrder {
    /// Map a raw score to a value where larger is always better.
    #[inline]
    pub fn rank_value(self, score: f32) -> f32 {
        match self {
            ScoreOrder::HigherIsBetter => score,
            ScoreOrder::LowerIsBetter => -score,
        }
    }

    /// Best-first comparison of two hits.
    pub fn compare(self, a: (f32, &PrimaryKey), b: (f32, &PrimaryKey)) -> Ordering {
        OrderedFloat(self.rank_value(b.0))
            .cmp(&OrderedFloat(self.rank_value(a.0)))
            .then_with(|| a.1.cmp(b.1))
    }

    /// Whether `hit` ranks strictly after `cursor`.
    pub fn follows(self, hit: (f32, &PrimaryKey), cursor: (f32, &PrimaryKey)) -> bool {
        self.compare(hit, cursor) == Ordering::Greater
    }
}

/// A ranked document within one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub doc: DocId,
    pub key: PrimaryKey,
    pub score: f32,
}

#[derive(Debug)]
struct Entry {
    rank: OrderedFloat<f32>,
    hit: Hit,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl Ord for Entry {
    // Worst entry is the greatest, so it sits on top of the max-heap.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| self.hit.key.cmp(&other.hit.key))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Keeps the `k` best hits seen so far.
#[derive(Debug)]
pub struct TopK {
    k: usize,
    order: ScoreOrder,
    heap: BinaryHeap<Entry>,
}

impl TopK {
    pub fn new(k: usize, order: ScoreOrder) -> Self {
        Self {
            k,
            order,
            heap: BinaryHeap::with_capacity(k.saturating_add(1).min(1 << 16)),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.k
    }

    /// Raw score of the worst kept hit, once full.
    pub fn threshold(&self) -> Option<f32> {
        if !self.is_full() {
            return None;
        }
        self.heap.peek().map(|e| e.hit.score)
    }

    /// Offer a hit. `key` is cloned only when the hit is kept.
    pub fn offer(&mut self, doc: DocId, score: f32, key: &PrimaryKey) -> bool {
        if self.k == 0 {
            return false;
        }
        let rank = OrderedFloat(self.order.rank_value(score));
        if self.is_full() {
            let Some(worst) = self.heap.peek() else {
                return false;
            };
            let beats = rank > worst.rank || (rank == worst.rank && *key < worst.hit.key);
            if !beats {
                return false;
            }
            self.heap.pop();
        }
        self.heap.push(Entry {
            rank,
            hit: Hit {
                doc,
                key: key.clone(),
                score,
            },
        });
        true
    }

    /// Hits best-first.
    pub fn into_sorted(self) -> Vec<Hit> {
        let mut entries = self.heap.into_vec();
        // Entry order puts the best hit first.
        entries.sort_unstable();
        entries.into_iter().map(|e| e.hit).collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn keys(hits: &[Hit]) -> Vec<i64> {
        hits.iter()
            .map(|h| match h.key {
                PrimaryKey::Int(v) => v,
                PrimaryKey::Str(_) => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn test_keeps_k_best() {
        let mut topk = TopK::new(3, ScoreOrder::HigherIsBetter);
        for (i, score) in [0.5, 2.0, 1.0, 3.0, 0.1].iter().enumerate() {
            topk.offer(i as u32, *score, &PrimaryKey::Int(i as i64));
        }
        let hits = topk.into_sorted();
        assert_eq!(keys(&hits), vec![3, 1, 2]);
    }

    #[test]
    fn test_ties_break_by_key() {
        let mut topk = TopK::new(2, ScoreOrder::HigherIsBetter);
        topk.offer(0, 1.0, &PrimaryKey::Int(9));
        topk.offer(1, 1.0, &PrimaryKey::Int(4));
        topk.offer(2, 1.0, &PrimaryKey::Int(7));
        assert_eq!(keys(&topk.into_sorted()), vec![4, 7]);
    }

    #[test]
    fn test_lower_is_better() {
        let mut topk = TopK::new(2, ScoreOrder::LowerIsBetter);
        topk.offer(0, 5.0, &PrimaryKey::Int(0));
        topk.offer(1, 1.0, &PrimaryKey::Int(1));
        topk.offer(2, 3.0, &PrimaryKey::Int(2));
        assert_eq!(keys(&topk.into_sorted()), vec![1, 2]);
    }

    #[test]
    fn test_threshold_only_when_full() {
        let mut topk = TopK::new(2, ScoreOrder::HigherIsBetter);
        topk.offer(0, 5.0, &PrimaryKey::Int(0));
        assert_eq!(topk.threshold(), None);
        topk.offer(1, 2.0, &PrimaryKey::Int(1));
        assert_eq!(topk.threshold(), Some(2.0));
        topk.offer(2, 3.0, &PrimaryKey::Int(2));
        assert_eq!(topk.threshold(), Some(3.0));
    }

    #[test]
    fn test_zero_k_accepts_nothing() {
        let mut topk = TopK::new(0, ScoreOrder::HigherIsBetter);
        assert!(!topk.offer(0, 1.0, &PrimaryKey::Int(0)));
        assert!(topk.into_sorted().is_empty());
    }

    #[test]
    fn test_compare_best_first() {
        let a = PrimaryKey::Int(1);
        let b = PrimaryKey::Int(2);
        let order = ScoreOrder::HigherIsBetter;
        assert_eq!(order.compare((2.0, &a), (1.0, &b)), Ordering::Less);
        assert_eq!(order.compare((1.0, &a), (1.0, &b)), Ordering::Less);
        assert_eq!(
            ScoreOrder::LowerIsBetter.compare((2.0, &a), (1.0, &b)),
            Ordering::Greater
        );
    }
}
