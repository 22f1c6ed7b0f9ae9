//! Dense vector metrics.
//!
//! Scores are returned in each metric's native direction: L2 is a squared
//! distance (lower is closer), IP and COSINE are similarities (higher is
//! closer). Callers rank through [`ScoreOrder`](crate::query::collector::ScoreOrder).

use crate::index::params::MetricType;

/// Score `a` against `b` under `metric`. Non-dense metrics score 0.
#[inline]
pub fn dense_score(a: &[f32], b: &[f32], metric: MetricType) -> f32 {
    match metric {
        MetricType::L2 => l2_squared(a, b),
        MetricType::Ip => inner_product(a, b),
        MetricType::Cosine => cosine_similarity(a, b),
        MetricType::Bm25 => 0.0,
    }
}

/// Cosine similarity in `[-1, 1]`. A zero-magnitude vector is treated as
/// orthogonal to everything.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector dimensions must match");

    let (dot, norm_a, norm_b) = cosine_components(a, b);

    let denom = (norm_a * norm_b).sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    // Clamp to [-1, 1] to handle floating-point drift.
    (dot / denom).clamp(-1.0, 1.0)
}

/// Squared Euclidean distance. Ordering matches true L2 distance.
#[inline]
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector dimensions must match");

    let mut sum: f32 = 0.0;
    let chunks = a.len() / 8;
    let remainder = a.len() % 8;

    for i in 0..chunks {
        let base = i * 8;
        let mut tmp = [0.0f32; 8];
        for j in 0..8 {
            let d = a[base + j] - b[base + j];
            tmp[j] = d * d;
        }
        for val in tmp {
            sum += val;
        }
    }

    let base = chunks * 8;
    for i in 0..remainder {
        let d = a[base + i] - b[base + i];
        sum += d * d;
    }

    sum
}

#[inline]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector dimensions must match");

    let mut sum: f32 = 0.0;
    let chunks = a.len() / 8;
    let remainder = a.len() % 8;

    for i in 0..chunks {
        let base = i * 8;
        let mut tmp = [0.0f32; 8];
        for j in 0..8 {
            tmp[j] = a[base + j] * b[base + j];
        }
        for val in tmp {
            sum += val;
        }
    }

    let base = chunks * 8;
    for i in 0..remainder {
        sum += a[base + i] * b[base + i];
    }

    sum
}

/// Compute (dot, ||a||^2, ||b||^2) in a single pass.
#[inline]
fn cosine_components(a: &[f32], b: &[f32]) -> (f32, f32, f32) {
    let mut dot: f32 = 0.0;
    let mut norm_a: f32 = 0.0;
    let mut norm_b: f32 = 0.0;

    for (&ai, &bi) in a.iter().zip(b) {
        dot += ai * bi;
        norm_a += ai * ai;
        norm_b += bi * bi;
    }

    (dot, norm_a, norm_b)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_identical_is_zero() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        assert_eq!(l2_squared(&a, &a), 0.0);
    }

    #[test]
    fn test_l2_known_value() {
        assert!((l2_squared(&[0.0, 0.0], &[3.0, 4.0]) - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_inner_product_with_remainder() {
        let a: Vec<f32> = (0..11).map(|i| i as f32).collect();
        let expected: f32 = a.iter().map(|x| x * x).sum();
        assert!((inner_product(&a, &a) - expected).abs() < 1e-3);
    }

    #[test]
    fn test_cosine_bounds() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_dispatch() {
        let a = [1.0, 2.0];
        let b = [3.0, 4.0];
        assert!((dense_score(&a, &b, MetricType::Ip) - 11.0).abs() < 1e-6);
        assert!((dense_score(&a, &b, MetricType::L2) - 8.0).abs() < 1e-6);
    }
}
