// Request / response types of the engine boundary

use crate::services::bandit::ArmPosterior;
use crate::services::context::ContextFeatures;
use crate::services::trajectory::TrajectorySummary;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

fn default_limit() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_diversity_factor() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationOptions {
    #[serde(default = "default_true")]
    pub use_trajectory: bool,
    /// 0.5 keeps the selected blend; higher values favour the diversity strategy
    #[serde(default = "default_diversity_factor")]
    pub diversity_factor: f64,
    #[serde(default = "default_true")]
    pub explain: bool,
    /// Fixes the exploration and sampling randomness for this request
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for RecommendationOptions {
    fn default() -> Self {
        Self {
            use_trajectory: true,
            diversity_factor: default_diversity_factor(),
            explain: true,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub user_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub mood_hint: Option<String>,
    /// Desired energy in [0, 1]
    #[serde(default)]
    pub energy_hint: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub options: RecommendationOptions,
}

impl RecommendationRequest {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: None,
            mood_hint: None,
            energy_hint: None,
            message: None,
            limit: default_limit(),
            options: RecommendationOptions::default(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_mood(mut self, mood: impl Into<String>) -> Self {
        self.mood_hint = Some(mood.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.options.seed = Some(seed);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedSong {
    pub song_id: String,
    pub title: String,
    pub artist: String,
    pub score: f64,
    pub strategy_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub request_id: Uuid,
    pub session_id: String,
    pub recommendations: Vec<RecommendedSong>,
    pub strategy_blend_used: BTreeMap<String, f64>,
    pub cold_start_active: bool,
    pub personalization_weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotional_trajectory: Option<TrajectorySummary>,
    pub processing_time_ms: u64,
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub user_id: String,
    pub song_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub feedback_kind: String,
    /// Seconds listened
    #[serde(default)]
    pub play_duration: Option<f64>,
    /// Full song length in seconds
    #[serde(default)]
    pub song_duration: Option<f64>,
}

impl FeedbackRequest {
    pub fn new(user_id: impl Into<String>, song_id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            song_id: song_id.into(),
            session_id: None,
            feedback_kind: kind.into(),
            play_duration: None,
            song_duration: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_durations(mut self, played: f64, total: f64) -> Self {
        self.play_duration = Some(played);
        self.song_duration = Some(total);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackAck {
    pub accepted: bool,
    /// Bandit reward the event will credit
    pub reward_applied: Option<f64>,
    pub weights_changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub user_id: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextFeatures>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trajectory: Option<TrajectorySummary>,
    /// Empty until the bandit has been used for this user
    pub bandit_posteriors: BTreeMap<String, ArmPosterior>,
    pub weights: BTreeMap<String, f64>,
    pub cold_start_active: bool,
    pub personalization_weight: f64,
    pub feedback_count: u64,
    /// Reward the session would earn if it closed now
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_reward: Option<f64>,
}
