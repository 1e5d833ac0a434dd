// ============================================
// Personalization Weights
// ============================================
//
// Per-user named feature weights, bounded to [min, max] and decaying lazily
// toward the neutral value 1.0:
//
//   w <- 1 + (w - 1) * (1 - decay_rate)^periods
//
// Only whole elapsed periods are applied; the remainder carries over.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MOOD_MATCH: &str = "mood_match";
pub const VA_SIMILARITY: &str = "va_similarity";
pub const CONTENT_SIMILARITY: &str = "content_similarity";
pub const COLLABORATIVE: &str = "collaborative";
pub const DIVERSITY: &str = "diversity";
pub const NOVELTY: &str = "novelty";

pub const FEATURES: [&str; 6] = [
    MOOD_MATCH,
    VA_SIMILARITY,
    CONTENT_SIMILARITY,
    COLLABORATIVE,
    DIVERSITY,
    NOVELTY,
];

pub const NEUTRAL_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    pub value: f64,
    pub last_decay: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalizationWeights {
    entries: BTreeMap<String, WeightEntry>,
    min: f64,
    max: f64,
}

impl PersonalizationWeights {
    pub fn new(min: f64, max: f64, now: DateTime<Utc>) -> Self {
        let entries = FEATURES
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    WeightEntry {
                        value: NEUTRAL_WEIGHT.clamp(min, max),
                        last_decay: now,
                    },
                )
            })
            .collect();
        Self { entries, min, max }
    }

    pub fn get(&self, name: &str) -> f64 {
        self.entries
            .get(name)
            .map(|e| e.value)
            .unwrap_or(NEUTRAL_WEIGHT)
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    pub fn as_map(&self) -> BTreeMap<String, f64> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value))
            .collect()
    }

    /// Apply every whole decay period elapsed since each weight's last decay.
    /// Returns the number of weights whose value moved.
    pub fn apply_decay(&mut self, now: DateTime<Utc>, rate: f64, period_days: f64) -> usize {
        if period_days <= 0.0 || rate <= 0.0 {
            return 0;
        }
        let period = Duration::milliseconds((period_days * 86_400_000.0) as i64);
        if period <= Duration::zero() {
            return 0;
        }

        let mut moved = 0;
        for entry in self.entries.values_mut() {
            let elapsed = now - entry.last_decay;
            if elapsed < period {
                continue;
            }
            let periods = elapsed.num_milliseconds() / period.num_milliseconds();
            let factor = (1.0 - rate.clamp(0.0, 1.0)).powi(periods.min(i32::MAX as i64) as i32);
            let decayed = NEUTRAL_WEIGHT + (entry.value - NEUTRAL_WEIGHT) * factor;
            if (decayed - entry.value).abs() > f64::EPSILON {
                moved += 1;
            }
            entry.value = decayed.clamp(self.min, self.max);
            entry.last_decay = entry.last_decay + period * periods as i32;
        }
        moved
    }

    /// Copy with decay applied, leaving `self` untouched
    pub fn decayed(&self, now: DateTime<Utc>, rate: f64, period_days: f64) -> Self {
        let mut copy = self.clone();
        copy.apply_decay(now, rate, period_days);
        copy
    }

    /// Value `name` would take after adding `delta`
    pub fn proposed(&self, name: &str, delta: f64) -> f64 {
        let next = self.get(name) + delta;
        if next.is_finite() {
            next.clamp(self.min, self.max)
        } else {
            self.get(name)
        }
    }

    /// Add `delta` to a weight, clamped to bounds. Returns true if the value changed.
    pub fn adjust(&mut self, name: &str, delta: f64, now: DateTime<Utc>) -> bool {
        let next = self.proposed(name, delta);
        let entry = self
            .entries
            .entry(name.to_string())
            .or_insert(WeightEntry {
                value: NEUTRAL_WEIGHT,
                last_decay: now,
            });
        let changed = (next - entry.value).abs() > f64::EPSILON;
        entry.value = next;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_weights_are_neutral() {
        let w = PersonalizationWeights::new(0.1, 2.0, Utc::now());
        for name in FEATURES {
            assert_eq!(w.get(name), 1.0);
        }
    }

    #[test]
    fn test_adjust_is_clamped() {
        let now = Utc::now();
        let mut w = PersonalizationWeights::new(0.1, 2.0, now);
        for _ in 0..100 {
            w.adjust(MOOD_MATCH, 0.15, now);
            w.adjust(NOVELTY, -0.15, now);
        }
        assert_eq!(w.get(MOOD_MATCH), 2.0);
        assert_eq!(w.get(NOVELTY), 0.1);
        assert!(!w.adjust(MOOD_MATCH, 0.15, now));
    }

    #[test]
    fn test_decay_moves_toward_neutral() {
        let start = Utc::now() - Duration::days(15);
        let mut w = PersonalizationWeights::new(0.1, 2.0, start);
        w.adjust(DIVERSITY, 1.0, start);
        assert_eq!(w.get(DIVERSITY), 2.0);

        // Two whole 7-day periods: 1 + 1.0 * 0.95^2
        w.apply_decay(Utc::now(), 0.05, 7.0);
        assert!((w.get(DIVERSITY) - (1.0 + 0.9025)).abs() < 1e-9);

        // Remainder of the third period has not elapsed yet
        assert_eq!(w.apply_decay(Utc::now(), 0.05, 7.0), 0);
    }
}
