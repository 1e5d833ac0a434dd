// ============================================
// Candidate Strategy Scorers
// ============================================
//
// Five independent scorers, each a pure (song, context) -> [0, 1] function.
// Missing inputs yield the neutral score 0.5.
//
// Combined score for a song:
//
//   Σ blend_i * w_i * score_i / Σ blend_i * w_i
//
// where blend comes from the bandit (or the static cold-start blend) and
// w_i is the user's personalization weight for that strategy term.

use crate::config::StrategyConfig;
use crate::models::{AudioFeatures, Mood, Song, StrategyKind, VaPoint};
use crate::services::learner::weights::{
    PersonalizationWeights, COLLABORATIVE, CONTENT_SIMILARITY, DIVERSITY, MOOD_MATCH, NOVELTY,
    VA_SIMILARITY,
};
use crate::utils::{cosine_similarity, seeded_unit};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const NEUTRAL_SCORE: f64 = 0.5;

const MOOD_MATCH_SHARE: f64 = 0.7;
const VA_SIMILARITY_SHARE: f64 = 0.3;
/// √5, the distance normalizer of the VA similarity term
const VA_DISTANCE_SCALE: f64 = 2.236_067_977_499_79;

/// Mixing proportions over the five strategies; always sums to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyBlend {
    weights: [f64; 5],
}

impl StrategyBlend {
    pub fn uniform() -> Self {
        Self {
            weights: [0.2; 5],
        }
    }

    /// Build from raw non-negative values; falls back to uniform when degenerate
    pub fn from_raw(raw: [f64; 5]) -> Self {
        let cleaned = raw.map(|v| if v.is_finite() && v > 0.0 { v } else { 0.0 });
        let sum: f64 = cleaned.iter().sum();
        if sum <= f64::EPSILON {
            return Self::uniform();
        }
        Self {
            weights: cleaned.map(|v| v / sum),
        }
    }

    pub fn get(&self, kind: StrategyKind) -> f64 {
        self.weights[kind.index()]
    }

    /// Scale the diversity share by `2 * factor`, then renormalize.
    /// 0.5 leaves the blend unchanged.
    pub fn with_diversity_factor(&self, factor: f64) -> Self {
        let mut raw = self.weights;
        raw[StrategyKind::Diversity.index()] *= 2.0 * factor.clamp(0.0, 1.0);
        Self::from_raw(raw)
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        StrategyKind::ALL
            .iter()
            .map(|k| (k.as_str().to_string(), self.get(*k)))
            .collect()
    }
}

/// Everything a scorer may look at, assembled once per request
#[derive(Debug, Clone)]
pub struct ScoringContext {
    pub target_mood: Option<Mood>,
    pub target_va: Option<VaPoint>,
    /// Trajectory asked for an emotional lift
    pub uplift: bool,
    pub uplift_valence_shift: f64,
    /// Running average of liked-song feature vectors
    pub liked_centroid: Option<Vec<f64>>,
    /// Liked centroids of taste neighbours
    pub neighbor_centroids: Vec<Vec<f64>>,
    /// Feature vectors of the most recent songs, newest first
    pub recent_vectors: Vec<[f64; AudioFeatures::VECTOR_LEN]>,
    pub seed: u64,
    pub weights: PersonalizationWeights,
    pub config: StrategyConfig,
}

/// Per-song breakdown kept for ranking explanations and learner attribution
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyBreakdown {
    pub scores: [f64; 5],
    pub mood_match: Option<f64>,
    pub va_similarity: Option<f64>,
    /// blend_i * w_i * score_i, before normalization
    pub weighted: [f64; 5],
    pub combined: f64,
}

impl StrategyBreakdown {
    /// Strategy with the largest weighted term; first in `StrategyKind::ALL` on ties
    pub fn dominant(&self) -> StrategyKind {
        let mut best = StrategyKind::ALL[0];
        for kind in StrategyKind::ALL {
            if self.weighted[kind.index()] > self.weighted[best.index()] {
                best = kind;
            }
        }
        best
    }

    /// Feature name -> contribution in [0, 1], as consumed by the learner
    pub fn contributions(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        if let Some(m) = self.mood_match {
            out.insert(MOOD_MATCH.to_string(), m);
        }
        if let Some(v) = self.va_similarity {
            out.insert(VA_SIMILARITY.to_string(), v);
        }
        out.insert(
            CONTENT_SIMILARITY.to_string(),
            self.scores[StrategyKind::Content.index()],
        );
        out.insert(
            COLLABORATIVE.to_string(),
            self.scores[StrategyKind::Collaborative.index()],
        );
        out.insert(
            DIVERSITY.to_string(),
            self.scores[StrategyKind::Diversity.index()],
        );
        out.insert(
            NOVELTY.to_string(),
            self.scores[StrategyKind::Exploration.index()],
        );
        out
    }
}

/// Personalization weight name applied to each strategy term
fn strategy_weight_name(kind: StrategyKind) -> Option<&'static str> {
    match kind {
        StrategyKind::Emotion => None,
        StrategyKind::Content => Some(CONTENT_SIMILARITY),
        StrategyKind::Collaborative => Some(COLLABORATIVE),
        StrategyKind::Diversity => Some(DIVERSITY),
        StrategyKind::Exploration => Some(NOVELTY),
    }
}

impl StrategyKind {
    /// Score one candidate with this strategy
    pub fn score(&self, song: &Song, ctx: &ScoringContext) -> f64 {
        let raw = match self {
            StrategyKind::Emotion => emotion_terms(song, ctx).0,
            StrategyKind::Content => content_score(song, ctx),
            StrategyKind::Collaborative => collaborative_score(song, ctx),
            StrategyKind::Diversity => diversity_score(song, ctx),
            StrategyKind::Exploration => exploration_score(song, ctx),
        };
        if raw.is_finite() {
            raw.clamp(0.0, 1.0)
        } else {
            NEUTRAL_SCORE
        }
    }
}

/// Score with every strategy and combine under `blend`
pub fn score_all(song: &Song, ctx: &ScoringContext, blend: &StrategyBlend) -> StrategyBreakdown {
    let (_, mood_match, va_similarity) = emotion_terms(song, ctx);
    let scores = StrategyKind::ALL.map(|k| k.score(song, ctx));

    let mut weighted = [0.0; 5];
    let mut norm = 0.0;
    for kind in StrategyKind::ALL {
        let w = strategy_weight_name(kind)
            .map(|name| ctx.weights.get(name))
            .unwrap_or(1.0);
        let share = blend.get(kind) * w;
        weighted[kind.index()] = share * scores[kind.index()];
        norm += share;
    }

    let combined = if norm > f64::EPSILON {
        (weighted.iter().sum::<f64>() / norm).clamp(0.0, 1.0)
    } else {
        NEUTRAL_SCORE
    };

    StrategyBreakdown {
        scores,
        mood_match,
        va_similarity,
        weighted,
        combined,
    }
}

/// (emotion score, categorical match term, VA similarity term)
fn emotion_terms(song: &Song, ctx: &ScoringContext) -> (f64, Option<f64>, Option<f64>) {
    let mood_match = ctx.target_mood.map(|target| {
        if song.mood == target {
            1.0
        } else if ctx.uplift && song.mood.is_positive() {
            0.5
        } else {
            0.0
        }
    });

    let va_similarity = ctx.target_va.map(|target| {
        let target = if ctx.uplift {
            VaPoint::new(target.valence + ctx.uplift_valence_shift, target.arousal)
        } else {
            target
        };
        (1.0 - song.va.distance(&target) / VA_DISTANCE_SCALE).clamp(0.0, 1.0)
    });

    let w_match = MOOD_MATCH_SHARE * ctx.weights.get(MOOD_MATCH);
    let w_va = VA_SIMILARITY_SHARE * ctx.weights.get(VA_SIMILARITY);

    let score = match (mood_match, va_similarity) {
        (Some(m), Some(v)) => (w_match * m + w_va * v) / (w_match + w_va),
        (Some(m), None) => m,
        (None, Some(v)) => v,
        (None, None) => NEUTRAL_SCORE,
    };
    (score, mood_match, va_similarity)
}

fn content_score(song: &Song, ctx: &ScoringContext) -> f64 {
    match &ctx.liked_centroid {
        Some(centroid) => cosine_similarity(&song.feature_vector(), centroid),
        None => NEUTRAL_SCORE,
    }
}

/// Best match among taste neighbours
fn collaborative_score(song: &Song, ctx: &ScoringContext) -> f64 {
    if ctx.neighbor_centroids.is_empty() {
        return NEUTRAL_SCORE;
    }
    let vector = song.feature_vector();
    ctx.neighbor_centroids
        .iter()
        .map(|c| cosine_similarity(&vector, c))
        .fold(0.0, f64::max)
}

fn diversity_score(song: &Song, ctx: &ScoringContext) -> f64 {
    let window = ctx.config.diversity_window.max(1);
    if ctx.recent_vectors.is_empty() {
        return NEUTRAL_SCORE;
    }
    let vector = song.feature_vector();
    let max_sim = ctx
        .recent_vectors
        .iter()
        .take(window)
        .map(|r| cosine_similarity(&vector, r))
        .fold(0.0, f64::max);
    1.0 - max_sim
}

/// Random half from the request seed, the rest inverse popularity
fn exploration_score(song: &Song, ctx: &ScoringContext) -> f64 {
    let share = ctx.config.exploration_random_share.clamp(0.0, 1.0);
    let random = seeded_unit(ctx.seed, &song.id);
    let obscurity = 1.0 / (1.0 + (1.0 + song.popularity.plays as f64).ln());
    share * random + (1.0 - share) * obscurity
}
