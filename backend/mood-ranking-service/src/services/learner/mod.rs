// ============================================
// Online Learner
// ============================================
//
// Applies one feedback event to a user's state:
//
// 1. Lazy decay of personalization weights toward 1.0
// 2. w = clamp(w + rate * signal * contribution, min, max) per feature
// 3. Binary bandit reward for the credited strategy (1.0 if the signal is
//    positive, 0.0 otherwise), so exactly one of α / β advances
// 4. Taste profile and play history bookkeeping
//
// The continuous session reward is applied separately, once per session.

pub mod weights;
mod worker;

pub use weights::PersonalizationWeights;
pub use worker::{FeedbackWorkers, WorkerMessage};

use crate::config::LearnerConfig;
use crate::models::{AudioFeatures, FeedbackEvent, FeedbackKind, StrategyKind};
use crate::services::bandit::{ArmUpdate, BanditStrategySelector};
use crate::store::{UserState, UserStore};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LearnerError {
    #[error("No learning state for user {0}")]
    UnknownUser(String),

    #[error("Feedback worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("State for user {user_id} stayed locked for {waited_ms}ms")]
    StateBusy { user_id: String, waited_ms: u64 },
}

pub type Result<T> = std::result::Result<T, LearnerError>;

pub fn signal(kind: FeedbackKind) -> f64 {
    match kind {
        FeedbackKind::Like => 1.0,
        FeedbackKind::Love => 1.0,
        FeedbackKind::Play => 0.5,
        FeedbackKind::Skip => -0.5,
        FeedbackKind::Dislike => -1.0,
        FeedbackKind::Complete => 0.3,
        FeedbackKind::Revisit => 0.7,
    }
}

pub fn learning_rate(kind: FeedbackKind) -> f64 {
    match kind {
        FeedbackKind::Like => 0.12,
        FeedbackKind::Love => 0.15,
        FeedbackKind::Dislike => 0.12,
        FeedbackKind::Skip => 0.08,
        FeedbackKind::Play => 0.10,
        FeedbackKind::Complete => 0.08,
        FeedbackKind::Revisit => 0.10,
    }
}

/// Feedback event plus the song's feature vector, looked up at submit time
#[derive(Debug, Clone)]
pub struct LearningJob {
    pub event: FeedbackEvent,
    pub song_vector: Option<[f64; AudioFeatures::VECTOR_LEN]>,
}

/// What applying an event would do, computed from a state snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct LearningPlan {
    /// Kind after revisit promotion
    pub kind: FeedbackKind,
    pub bandit_reward: f64,
    pub weight_deltas: BTreeMap<String, f64>,
    pub weights_changed: bool,
}

#[derive(Debug, Clone)]
pub struct LearningOutcome {
    pub plan: LearningPlan,
    pub arm_update: ArmUpdate,
    pub feedback_count: u64,
}

pub struct OnlineLearner {
    config: LearnerConfig,
    store: Arc<UserStore>,
    bandit: Arc<BanditStrategySelector>,
}

impl OnlineLearner {
    pub fn new(config: LearnerConfig, store: Arc<UserStore>, bandit: Arc<BanditStrategySelector>) -> Self {
        Self {
            config,
            store,
            bandit,
        }
    }

    /// A play of a song already in the play history becomes a revisit
    pub fn effective_kind(state: &UserState, event: &FeedbackEvent) -> FeedbackKind {
        if event.kind == FeedbackKind::Play && state.play_history.contains_key(&event.song_id) {
            FeedbackKind::Revisit
        } else {
            event.kind
        }
    }

    pub fn plan(&self, state: &UserState, event: &FeedbackEvent, now: DateTime<Utc>) -> LearningPlan {
        let kind = Self::effective_kind(state, event);
        let step = learning_rate(kind) * signal(kind);
        let weights = state
            .weights
            .decayed(now, self.config.decay_rate, self.config.decay_period_days);

        let weight_deltas: BTreeMap<String, f64> = event
            .context
            .contributions
            .iter()
            .filter(|(_, c)| c.is_finite() && **c > 0.0)
            .map(|(name, c)| (name.clone(), step * c.clamp(0.0, 1.0)))
            .collect();

        let weights_changed = weight_deltas
            .iter()
            .any(|(name, delta)| (weights.proposed(name, *delta) - weights.get(name)).abs() > f64::EPSILON);

        LearningPlan {
            kind,
            bandit_reward: if signal(kind) > 0.0 { 1.0 } else { 0.0 },
            weight_deltas,
            weights_changed,
        }
    }

    /// Apply one event under the user's lock. Fails with `StateBusy` when the
    /// lock is not acquired within `apply_timeout_ms`; nothing is changed then.
    pub async fn apply(&self, job: &LearningJob) -> Result<LearningOutcome> {
        let event = &job.event;
        let waited_ms = self.config.apply_timeout_ms;
        let outcome = self
            .store
            .update_within(&event.user_id, Duration::from_millis(waited_ms), |state| {
                let now = Utc::now();
                state
                    .weights
                    .apply_decay(now, self.config.decay_rate, self.config.decay_period_days);

                let plan = self.plan(state, event, now);
                for (name, delta) in &plan.weight_deltas {
                    state.weights.adjust(name, *delta, now);
                }

                let arm_update =
                    self.bandit
                        .update(state.arms_mut(), event.context.strategy, plan.bandit_reward);
                state.feedback_count += 1;

                match plan.kind {
                    FeedbackKind::Like | FeedbackKind::Love => {
                        state.taste.add(&event.song_id, job.song_vector)
                    }
                    FeedbackKind::Dislike => state.taste.remove(&event.song_id, job.song_vector),
                    _ => {}
                }
                if plan.kind.is_listen() {
                    state
                        .play_history
                        .insert(event.song_id.clone(), event.occurred_at);
                }

                LearningOutcome {
                    plan,
                    arm_update,
                    feedback_count: state.feedback_count,
                }
            })
            .await
            .ok_or_else(|| LearnerError::StateBusy {
                user_id: event.user_id.clone(),
                waited_ms,
            })?;

        debug!(
            user_id = %event.user_id,
            song_id = %event.song_id,
            kind = outcome.plan.kind.as_str(),
            strategy = %event.context.strategy,
            reward = outcome.plan.bandit_reward,
            feedback_count = outcome.feedback_count,
            "Feedback applied"
        );
        Ok(outcome)
    }

    /// Feed a continuous session reward to the strategy the session relied on
    pub async fn apply_session_reward(
        &self,
        user_id: &str,
        strategy: StrategyKind,
        reward: f64,
    ) -> Result<ArmUpdate> {
        if self.store.get(user_id).is_none() {
            return Err(LearnerError::UnknownUser(user_id.to_string()));
        }
        let update = self
            .store
            .update(user_id, |state| self.bandit.update(state.arms_mut(), strategy, reward))
            .await;
        debug!(user_id = %user_id, strategy = %strategy, reward = reward, "Session reward applied");
        Ok(update)
    }
}
