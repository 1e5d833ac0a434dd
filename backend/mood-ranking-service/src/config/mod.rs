use serde::Deserialize;
use std::env;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be a valid {expected} (got {value:?})")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub mood_space: MoodSpaceConfig,
    pub context: ContextConfig,
    pub trajectory: TrajectoryConfig,
    pub strategies: StrategyConfig,
    pub bandit: BanditConfig,
    pub cold_start: ColdStartConfig,
    pub ranking: RankingConfig,
    pub reward: RewardConfig,
    pub learner: LearnerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,
    /// JSON catalog snapshot loaded by the binary
    pub catalog_path: Option<String>,
    pub maintenance_interval_secs: u64,
    /// Inactivity after which a session is considered expired
    pub session_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: "mood-ranking-service".to_string(),
            catalog_path: None,
            maintenance_interval_secs: 60,
            session_timeout_secs: 1800, // 30 minutes
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoodSpaceConfig {
    /// Relative catalog size change that triggers a refit
    pub refit_tolerance: f64,
    /// |arousal| step between intensity buckets
    pub intensity_threshold: f64,
    /// Minimum songs per (mood, genre token) before a genre prototype is used
    pub min_genre_members: usize,
    /// Per-axis variance of the fallback prototypes
    pub default_variance: f64,
    pub variance_floor: f64,
}

impl Default for MoodSpaceConfig {
    fn default() -> Self {
        Self {
            refit_tolerance: 0.1,
            intensity_threshold: 0.33,
            min_genre_members: 5,
            default_variance: 0.5,
            variance_floor: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    pub max_turns: usize,
    /// Recently served/played songs remembered per session
    pub recent_songs: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            recent_songs: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrajectoryConfig {
    pub window: usize,
    pub slope_threshold: f64,
    /// Valence added to the target when the uplift modifier is active
    pub uplift_valence_shift: f64,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            window: 5,
            slope_threshold: 0.05,
            uplift_valence_shift: 0.3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// K for the diversity scorer
    pub diversity_window: usize,
    /// Minimum Jaccard overlap of liked sets to count as a taste neighbour
    pub collaborative_min_overlap: f64,
    pub collaborative_max_neighbors: usize,
    /// Share of the exploration score that is random (rest is inverse popularity)
    pub exploration_random_share: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            diversity_window: 10,
            collaborative_min_overlap: 0.1,
            collaborative_max_neighbors: 20,
            exploration_random_share: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BanditConfig {
    pub softmax_temperature: f64,
    /// Posterior shrink happens every N updates (0 disables)
    pub prior_reset_interval: u64,
    /// Fraction of accumulated evidence kept on a prior reset
    pub prior_reset_retention: f64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            softmax_temperature: 0.2,
            prior_reset_interval: 200,
            prior_reset_retention: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColdStartConfig {
    /// Users with fewer lifetime feedback events bypass the bandit
    pub threshold: u64,
    /// Feedback count at which personalization weight reaches 1.0
    pub full_personalization_at: u64,
    pub popularity_decay_days: f64,
    /// VA radius around the target centroid for cluster bootstrap
    pub cluster_radius: f64,
    /// Share of cluster-bootstrap picks in the hybrid interleave
    pub hybrid_cluster_ratio: f64,
}

impl Default for ColdStartConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            full_personalization_at: 30,
            popularity_decay_days: 30.0,
            cluster_radius: 0.6,
            hybrid_cluster_ratio: 0.6,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RankingConfig {
    /// λ of the recency penalty, per day
    pub recency_lambda: f64,
    pub top_window: usize,
    pub min_genres_in_top: usize,
    pub min_artists_for_constraint: usize,
    pub max_limit: usize,
    /// Node budget for the constrained top-window arrangement search
    pub arrangement_budget: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            recency_lambda: 0.5,
            top_window: 5,
            min_genres_in_top: 3,
            min_artists_for_constraint: 3,
            max_limit: 100,
            arrangement_budget: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RewardConfig {
    pub engagement_weight: f64,
    pub satisfaction_weight: f64,
    pub emotion_weight: f64,
    /// Plays at which the play-count half of engagement saturates
    pub play_saturation: u32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            engagement_weight: 0.4,
            satisfaction_weight: 0.3,
            emotion_weight: 0.3,
            play_saturation: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LearnerConfig {
    pub weight_min: f64,
    pub weight_max: f64,
    /// Fraction of the distance to 1.0 removed per decay period
    pub decay_rate: f64,
    pub decay_period_days: f64,
    /// Served-recommendation entries kept per user for attribution
    pub served_ledger_capacity: usize,
    /// Longest wait for a user's state lock before an event application fails
    pub apply_timeout_ms: u64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            weight_min: 0.1,
            weight_max: 2.0,
            decay_rate: 0.05,
            decay_period_days: 7.0,
            served_ledger_capacity: 200,
            apply_timeout_ms: 2_000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let config = Config {
            service: ServiceConfig {
                service_name: env::var("SERVICE_NAME")
                    .unwrap_or(defaults.service.service_name),
                catalog_path: env::var("CATALOG_PATH").ok(),
                maintenance_interval_secs: env_or(
                    "MAINTENANCE_INTERVAL_SECS",
                    defaults.service.maintenance_interval_secs,
                )?,
                session_timeout_secs: env_or(
                    "SESSION_TIMEOUT_SECS",
                    defaults.service.session_timeout_secs,
                )?,
            },
            mood_space: MoodSpaceConfig {
                refit_tolerance: env_or(
                    "MOOD_REFIT_TOLERANCE",
                    defaults.mood_space.refit_tolerance,
                )?,
                intensity_threshold: env_or(
                    "MOOD_INTENSITY_THRESHOLD",
                    defaults.mood_space.intensity_threshold,
                )?,
                min_genre_members: env_or(
                    "MOOD_MIN_GENRE_MEMBERS",
                    defaults.mood_space.min_genre_members,
                )?,
                ..defaults.mood_space
            },
            context: ContextConfig {
                max_turns: env_or("CONTEXT_MAX_TURNS", defaults.context.max_turns)?,
                ..defaults.context
            },
            trajectory: TrajectoryConfig {
                window: env_or("TRAJECTORY_WINDOW", defaults.trajectory.window)?,
                ..defaults.trajectory
            },
            strategies: StrategyConfig {
                diversity_window: env_or(
                    "DIVERSITY_WINDOW",
                    defaults.strategies.diversity_window,
                )?,
                ..defaults.strategies
            },
            bandit: BanditConfig {
                softmax_temperature: env_or(
                    "BANDIT_SOFTMAX_TEMPERATURE",
                    defaults.bandit.softmax_temperature,
                )?,
                prior_reset_interval: env_or(
                    "BANDIT_PRIOR_RESET_INTERVAL",
                    defaults.bandit.prior_reset_interval,
                )?,
                ..defaults.bandit
            },
            cold_start: ColdStartConfig {
                threshold: env_or("COLD_START_THRESHOLD", defaults.cold_start.threshold)?,
                hybrid_cluster_ratio: env_or(
                    "COLD_START_CLUSTER_RATIO",
                    defaults.cold_start.hybrid_cluster_ratio,
                )?,
                popularity_decay_days: env_or(
                    "POPULARITY_DECAY_DAYS",
                    defaults.cold_start.popularity_decay_days,
                )?,
                ..defaults.cold_start
            },
            ranking: RankingConfig {
                recency_lambda: env_or("RECENCY_LAMBDA", defaults.ranking.recency_lambda)?,
                ..defaults.ranking
            },
            reward: defaults.reward,
            learner: LearnerConfig {
                decay_rate: env_or("WEIGHT_DECAY_RATE", defaults.learner.decay_rate)?,
                decay_period_days: env_or(
                    "WEIGHT_DECAY_PERIOD_DAYS",
                    defaults.learner.decay_period_days,
                )?,
                apply_timeout_ms: env_or(
                    "LEARNER_APPLY_TIMEOUT_MS",
                    defaults.learner.apply_timeout_ms,
                )?,
                ..defaults.learner
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.context.max_turns == 0 || self.trajectory.window == 0 {
            return Err(ConfigError::Inconsistent(
                "context and trajectory windows must be non-empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.cold_start.hybrid_cluster_ratio) {
            return Err(ConfigError::Inconsistent(
                "COLD_START_CLUSTER_RATIO must be within [0, 1]".to_string(),
            ));
        }
        if self.cold_start.full_personalization_at == 0 {
            return Err(ConfigError::Inconsistent(
                "full_personalization_at must be positive".to_string(),
            ));
        }
        if self.learner.weight_min > self.learner.weight_max {
            return Err(ConfigError::Inconsistent(
                "weight_min must not exceed weight_max".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.learner.decay_rate) {
            return Err(ConfigError::Inconsistent(
                "WEIGHT_DECAY_RATE must be within [0, 1]".to_string(),
            ));
        }
        if self.learner.apply_timeout_ms == 0 {
            return Err(ConfigError::Inconsistent(
                "LEARNER_APPLY_TIMEOUT_MS must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
            expected: std::any::type_name::<T>(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.context.max_turns, 10);
        assert_eq!(config.trajectory.window, 5);
        assert_eq!(config.cold_start.threshold, 10);
        assert_eq!(config.cold_start.full_personalization_at, 30);
    }

    #[test]
    fn test_env_or_rejects_garbage() {
        env::set_var("MOOD_RANKING_TEST_GARBAGE", "not-a-number");
        let result: Result<u64, _> = env_or("MOOD_RANKING_TEST_GARBAGE", 5);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
        env::remove_var("MOOD_RANKING_TEST_GARBAGE");

        let fallback: u64 = env_or("MOOD_RANKING_TEST_MISSING", 7).unwrap();
        assert_eq!(fallback, 7);
    }

    #[test]
    fn test_validate_catches_bad_ratio() {
        let mut config = Config::default();
        config.cold_start.hybrid_cluster_ratio = 1.5;
        assert!(config.validate().is_err());
    }
}
