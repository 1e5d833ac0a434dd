// Utility functions for mood-ranking-service

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Compute exponential decay `exp(-age / scale)`; a non-positive scale means no decay
pub fn exponential_decay(age: f64, scale: f64) -> f64 {
    if scale <= 0.0 {
        return 1.0;
    }
    (-age.max(0.0) / scale).exp()
}

/// Cosine similarity; 0.0 for empty, mismatched or zero-norm inputs
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= f64::EPSILON || norm_b <= f64::EPSILON {
        return 0.0;
    }

    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    if sim.is_finite() {
        sim.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Temperature-scaled softmax. Output sums to 1 for any non-empty finite input.
pub fn softmax(values: &[f64], temperature: f64) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }

    let t = if temperature > f64::EPSILON { temperature } else { 1.0 };
    let max = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);

    if !max.is_finite() {
        return vec![1.0 / values.len() as f64; values.len()];
    }

    let exps: Vec<f64> = values
        .iter()
        .map(|v| if v.is_finite() { ((v - max) / t).exp() } else { 0.0 })
        .collect();
    let sum: f64 = exps.iter().sum();

    if sum <= 0.0 || !sum.is_finite() {
        return vec![1.0 / values.len() as f64; values.len()];
    }

    exps.into_iter().map(|e| e / sum).collect()
}

/// Least-squares slope of `values` over their index (0, 1, 2, ...)
pub fn least_squares_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }

    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n_f;

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }

    if den <= f64::EPSILON {
        0.0
    } else {
        num / den
    }
}

/// Deterministic value in [0, 1) derived from a seed and a key
pub fn seeded_unit(seed: u64, key: &str) -> f64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    key.hash(&mut hasher);
    // Top 53 bits give a uniformly spaced f64 in [0, 1)
    (hasher.finish() >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_decay() {
        assert!((exponential_decay(0.0, 30.0) - 1.0).abs() < 1e-9);
        assert!((exponential_decay(30.0, 30.0) - (-1.0f64).exp()).abs() < 1e-9);
        assert_eq!(exponential_decay(10.0, 0.0), 1.0);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let weights = softmax(&[0.2, 0.9, 0.4, 0.1, 0.5], 0.25);
        let sum: f64 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(weights[1] > weights[2]);

        let uniform = softmax(&[f64::NAN, f64::NAN], 1.0);
        assert_eq!(uniform, vec![0.5, 0.5]);
    }

    #[test]
    fn test_least_squares_slope() {
        assert!((least_squares_slope(&[-0.5, -0.3, -0.1]) - 0.2).abs() < 1e-9);
        assert!((least_squares_slope(&[0.5, 0.1, -0.4]) + 0.45).abs() < 1e-9);
        assert_eq!(least_squares_slope(&[0.3]), 0.0);
    }

    #[test]
    fn test_seeded_unit_is_stable() {
        let a = seeded_unit(42, "song-1");
        let b = seeded_unit(42, "song-1");
        let c = seeded_unit(43, "song-1");
        assert_eq!(a, b);
        assert!((0.0..1.0).contains(&a));
        assert_ne!(a, c);
    }
}
