// ============================================
// Gaussian Mood Prototypes
// ============================================
//
// Each mood is modelled as an axis-aligned Gaussian in VA space:
//
//   log p(x | mood) = -1/2 * Σ_d [ ln(2π σ²_d) + (x_d - μ_d)² / σ²_d ]
//
// Prototypes are fitted from weak labels. A mood with fewer than two
// weak-labelled songs uses a fixed wide-variance default instead.
// Genre prototypes are blended into the global one with weight n / (n + min).

use crate::models::{Intensity, Mood, VaPoint};
use crate::utils::softmax;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::f64::consts::PI;
use tracing::warn;

/// Diagonal Gaussian in VA space
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GaussianPrototype {
    pub mean: VaPoint,
    pub var_valence: f64,
    pub var_arousal: f64,
    /// Songs the prototype was fitted from (0 for defaults)
    pub members: usize,
}

impl GaussianPrototype {
    /// Fit from weak-labelled points; `None` when fewer than two points
    pub fn fit(points: &[VaPoint], variance_floor: f64) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }

        let n = points.len() as f64;
        let mean_v = points.iter().map(|p| p.valence).sum::<f64>() / n;
        let mean_a = points.iter().map(|p| p.arousal).sum::<f64>() / n;
        let var_v = points
            .iter()
            .map(|p| (p.valence - mean_v).powi(2))
            .sum::<f64>()
            / n;
        let var_a = points
            .iter()
            .map(|p| (p.arousal - mean_a).powi(2))
            .sum::<f64>()
            / n;

        Some(Self {
            mean: VaPoint::new(mean_v, mean_a),
            var_valence: var_v.max(variance_floor),
            var_arousal: var_a.max(variance_floor),
            members: points.len(),
        })
    }

    /// Fixed wide-variance prototype for a mood without enough members
    pub fn default_for(mood: Mood, variance: f64) -> Self {
        let (valence, arousal) = match mood {
            Mood::Happy => (0.6, 0.25),
            Mood::Energetic => (0.6, 0.75),
            Mood::Calm => (0.5, -0.5),
            Mood::Sad => (-0.6, -0.5),
            Mood::Tense => (-0.4, 0.5),
            Mood::Angry => (-0.6, 0.8),
        };
        Self {
            mean: VaPoint::new(valence, arousal),
            var_valence: variance,
            var_arousal: variance,
            members: 0,
        }
    }

    pub fn log_likelihood(&self, point: VaPoint) -> f64 {
        let term = |x: f64, mu: f64, var: f64| (2.0 * PI * var).ln() + (x - mu).powi(2) / var;
        -0.5 * (term(point.valence, self.mean.valence, self.var_valence)
            + term(point.arousal, self.mean.arousal, self.var_arousal))
    }

    /// Move `weight` of the way from `self` toward `other`
    pub fn blend(&self, other: &GaussianPrototype, weight: f64) -> Self {
        let w = weight.clamp(0.0, 1.0);
        let mix = |a: f64, b: f64| (1.0 - w) * a + w * b;
        Self {
            mean: VaPoint::new(
                mix(self.mean.valence, other.mean.valence),
                mix(self.mean.arousal, other.mean.arousal),
            ),
            var_valence: mix(self.var_valence, other.var_valence),
            var_arousal: mix(self.var_arousal, other.var_arousal),
            members: self.members.max(other.members),
        }
    }
}

/// Output of `classify`
#[derive(Debug, Clone, Serialize)]
pub struct MoodClassification {
    pub log_likelihoods: BTreeMap<Mood, f64>,
    pub probabilities: BTreeMap<Mood, f64>,
    pub mood: Mood,
    pub confidence: f64,
    pub intensity: Intensity,
}

/// All prototypes produced by one fit
#[derive(Debug, Clone, Serialize)]
pub struct PrototypeSet {
    pub global: BTreeMap<Mood, GaussianPrototype>,
    /// (mood, genre token) -> prototype fitted from that subset
    #[serde(skip)]
    pub genre: HashMap<(Mood, String), GaussianPrototype>,
    pub min_genre_members: usize,
    pub intensity_threshold: f64,
    default_variance: f64,
}

impl PrototypeSet {
    /// Prototype set made only of defaults (used before the first fit)
    pub fn defaults(default_variance: f64, min_genre_members: usize, intensity_threshold: f64) -> Self {
        let global = Mood::ALL
            .iter()
            .map(|m| (*m, GaussianPrototype::default_for(*m, default_variance)))
            .collect();
        Self {
            global,
            genre: HashMap::new(),
            min_genre_members,
            intensity_threshold,
            default_variance,
        }
    }

    pub fn with_prototypes(
        global: BTreeMap<Mood, GaussianPrototype>,
        genre: HashMap<(Mood, String), GaussianPrototype>,
        default_variance: f64,
        min_genre_members: usize,
        intensity_threshold: f64,
    ) -> Self {
        Self {
            global,
            genre,
            min_genre_members,
            intensity_threshold,
            default_variance,
        }
    }

    /// Effective prototype for a mood, blended with the genre prototype if one exists
    pub fn prototype(&self, mood: Mood, genre_token: Option<&str>) -> GaussianPrototype {
        let global = self
            .global
            .get(&mood)
            .copied()
            .unwrap_or_else(|| GaussianPrototype::default_for(mood, self.default_variance));

        match genre_token.and_then(|g| self.genre.get(&(mood, g.to_string()))) {
            Some(genre_proto) => {
                let n = genre_proto.members as f64;
                let weight = n / (n + self.min_genre_members.max(1) as f64);
                global.blend(genre_proto, weight)
            }
            None => global,
        }
    }

    pub fn centroid(&self, mood: Mood) -> VaPoint {
        self.prototype(mood, None).mean
    }

    pub fn classify(&self, point: VaPoint, genre_token: Option<&str>) -> MoodClassification {
        let mut log_likelihoods = BTreeMap::new();

        for mood in Mood::ALL {
            let proto = self.prototype(mood, genre_token);
            let mut ll = proto.log_likelihood(point);
            if !ll.is_finite() {
                warn!(
                    mood = %mood,
                    valence = point.valence,
                    arousal = point.arousal,
                    "Non-finite log-likelihood, using fallback prototype"
                );
                ll = GaussianPrototype::default_for(mood, self.default_variance)
                    .log_likelihood(point);
            }
            log_likelihoods.insert(mood, ll);
        }

        let lls: Vec<f64> = Mood::ALL.iter().map(|m| log_likelihoods[m]).collect();
        let probs = softmax(&lls, 1.0);
        let probabilities: BTreeMap<Mood, f64> =
            Mood::ALL.iter().copied().zip(probs.iter().copied()).collect();

        // First maximum in Mood::ALL order wins ties
        let (mood, confidence) = Mood::ALL
            .iter()
            .zip(probs.iter())
            .fold((Mood::ALL[0], f64::NEG_INFINITY), |best, (m, p)| {
                if *p > best.1 {
                    (*m, *p)
                } else {
                    best
                }
            });

        MoodClassification {
            log_likelihoods,
            probabilities,
            mood,
            confidence,
            intensity: intensity_bucket(point.arousal, self.intensity_threshold),
        }
    }
}

/// |arousal| < t -> Low, < 2t -> Medium, otherwise High
pub fn intensity_bucket(arousal: f64, threshold: f64) -> Intensity {
    let distance = arousal.abs();
    if distance < threshold {
        Intensity::Low
    } else if distance < 2.0 * threshold {
        Intensity::Medium
    } else {
        Intensity::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_requires_two_points() {
        assert!(GaussianPrototype::fit(&[VaPoint::new(0.1, 0.1)], 1e-3).is_none());

        let proto = GaussianPrototype::fit(
            &[VaPoint::new(0.2, 0.4), VaPoint::new(0.4, 0.6)],
            1e-3,
        )
        .unwrap();
        assert!((proto.mean.valence - 0.3).abs() < 1e-9);
        assert!((proto.var_valence - 0.01).abs() < 1e-9);
        assert_eq!(proto.members, 2);
    }

    #[test]
    fn test_variance_floor_applies() {
        let proto = GaussianPrototype::fit(
            &[VaPoint::new(0.5, 0.5), VaPoint::new(0.5, 0.5)],
            1e-3,
        )
        .unwrap();
        assert_eq!(proto.var_valence, 1e-3);
        assert!(proto.log_likelihood(VaPoint::new(0.5, 0.5)).is_finite());
    }

    #[test]
    fn test_log_likelihood_peaks_at_mean() {
        let proto = GaussianPrototype::default_for(Mood::Sad, 0.5);
        let at_mean = proto.log_likelihood(proto.mean);
        let away = proto.log_likelihood(VaPoint::new(0.9, 0.9));
        assert!(at_mean > away);
    }

    #[test]
    fn test_classify_probabilities_sum_to_one() {
        let set = PrototypeSet::defaults(0.5, 5, 0.33);
        for (v, a) in [(0.9, 0.9), (-0.8, -0.7), (0.0, 0.0), (-0.6, 0.85)] {
            let c = set.classify(VaPoint::new(v, a), None);
            let sum: f64 = c.probabilities.values().sum();
            assert!((sum - 1.0).abs() < 1e-9);
            assert!((c.confidence - c.probabilities[&c.mood]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_classify_default_regions() {
        let set = PrototypeSet::defaults(0.05, 5, 0.33);
        assert_eq!(set.classify(VaPoint::new(-0.6, -0.5), None).mood, Mood::Sad);
        assert_eq!(set.classify(VaPoint::new(0.6, 0.75), None).mood, Mood::Energetic);
        assert_eq!(set.classify(VaPoint::new(0.5, -0.5), None).mood, Mood::Calm);
    }

    #[test]
    fn test_genre_blend_pulls_toward_genre() {
        let mut genre = HashMap::new();
        genre.insert(
            (Mood::Happy, "jazz".to_string()),
            GaussianPrototype {
                mean: VaPoint::new(0.2, -0.2),
                var_valence: 0.1,
                var_arousal: 0.1,
                members: 5,
            },
        );
        let global: BTreeMap<_, _> = Mood::ALL
            .iter()
            .map(|m| (*m, GaussianPrototype::default_for(*m, 0.5)))
            .collect();
        let set = PrototypeSet::with_prototypes(global, genre, 0.5, 5, 0.33);

        let blended = set.prototype(Mood::Happy, Some("jazz"));
        // n / (n + min) = 5 / 10
        assert!((blended.mean.valence - 0.4).abs() < 1e-9);
        assert_eq!(set.prototype(Mood::Happy, Some("rock")).mean.valence, 0.6);
    }

    #[test]
    fn test_intensity_bucket() {
        assert_eq!(intensity_bucket(0.1, 0.33), Intensity::Low);
        assert_eq!(intensity_bucket(-0.5, 0.33), Intensity::Medium);
        assert_eq!(intensity_bucket(0.9, 0.33), Intensity::High);
    }
}
