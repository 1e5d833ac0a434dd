// ============================================
// Recommendation Engine
// ============================================
//
// Request path:
// 1. Validate, refresh the mood space from the catalog (cached snapshot on
//    store failure)
// 2. Conversation turn -> target mood / VA point, trajectory summary
// 3. Strategy blend: uniform while cold, Thompson sampled otherwise
// 4. Score every song, mix with the cold-start fallback list, apply recency
// 5. Arrange the top window, attach explanations, remember what was served
//
// Feedback is acknowledged from a state snapshot and applied by the user's
// background worker.

use crate::catalog::{CatalogStore, LexiconMoodExtractor, MoodExtractor};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::models::{
    AudioFeatures, ContextSnapshot, FeedbackAck, FeedbackEvent, FeedbackKind, FeedbackRequest,
    Mood, RecommendationRequest, RecommendationResponse, RecommendedSong, SessionStatus, VaPoint,
};
use crate::services::bandit::BanditStrategySelector;
use crate::services::cold_start::{ColdStartGate, FallbackRanking};
use crate::services::context::{ConversationContextMemory, ConversationTurn, SessionHandle};
use crate::services::learner::{
    FeedbackWorkers, LearningJob, OnlineLearner, PersonalizationWeights, WorkerMessage,
};
use crate::services::mood_space::{MoodSpaceSnapshot, MoodVectorSpace};
use crate::services::ranking::{explain, RankedCandidate, RankingAggregator, POPULARITY_LABEL};
use crate::services::reward::{SessionReward, SessionRewardCalculator};
use crate::services::strategies::{score_all, ScoringContext, StrategyBlend};
use crate::services::trajectory::TrajectorySummary;
use crate::store::{UserState, UserStore};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Feedback workers exit after this long without messages
const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Cluster bootstrap length relative to the requested limit
const CLUSTER_CAP_FACTOR: usize = 4;

/// Result of one maintenance pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub expired_sessions: usize,
    pub rewards_settled: usize,
    pub users_decayed: usize,
    pub catalog_songs: usize,
    pub catalog_error: Option<String>,
}

/// Read-only view of a user's learning state taken at request time
struct UserView {
    feedback_count: u64,
    weights: PersonalizationWeights,
    liked: BTreeSet<String>,
    liked_centroid: Option<Vec<f64>>,
    play_history: HashMap<String, DateTime<Utc>>,
}

impl UserView {
    fn of(state: &UserState, weights: PersonalizationWeights) -> Self {
        Self {
            feedback_count: state.feedback_count,
            weights,
            liked: state.taste.liked().clone(),
            liked_centroid: state.taste.centroid(),
            play_history: state.play_history.clone(),
        }
    }
}

/// What the conversation says the listener wants right now
struct TurnTarget {
    mood: Option<Mood>,
    va: Option<VaPoint>,
    uplift: bool,
    trajectory: Option<TrajectorySummary>,
    recent: Vec<String>,
}

pub struct RecommendationEngine {
    config: Config,
    catalog: Arc<dyn CatalogStore>,
    extractor: Arc<dyn MoodExtractor>,
    mood_space: MoodVectorSpace,
    sessions: ConversationContextMemory,
    store: Arc<UserStore>,
    bandit: Arc<BanditStrategySelector>,
    cold_start: ColdStartGate,
    ranking: RankingAggregator,
    reward: SessionRewardCalculator,
    workers: FeedbackWorkers,
}

impl RecommendationEngine {
    pub fn new(config: Config, catalog: Arc<dyn CatalogStore>) -> Self {
        let store = Arc::new(UserStore::new(config.learner.clone()));
        Self::with_store(config, catalog, store)
    }

    /// Build on an existing user store
    pub fn with_store(config: Config, catalog: Arc<dyn CatalogStore>, store: Arc<UserStore>) -> Self {
        let bandit = Arc::new(BanditStrategySelector::new(config.bandit.clone()));
        let learner = Arc::new(OnlineLearner::new(
            config.learner.clone(),
            Arc::clone(&store),
            Arc::clone(&bandit),
        ));

        Self {
            catalog,
            extractor: Arc::new(LexiconMoodExtractor::new()),
            mood_space: MoodVectorSpace::new(config.mood_space.clone()),
            sessions: ConversationContextMemory::new(
                config.context.clone(),
                config.trajectory.clone(),
            ),
            store,
            bandit,
            cold_start: ColdStartGate::new(config.cold_start.clone()),
            ranking: RankingAggregator::new(config.ranking.clone()),
            reward: SessionRewardCalculator::new(config.reward.clone()),
            workers: FeedbackWorkers::new(learner, WORKER_IDLE_TIMEOUT),
            config,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn MoodExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<UserStore> {
        &self.store
    }

    pub fn mood_space(&self) -> &MoodVectorSpace {
        &self.mood_space
    }

    /// Number of Thompson sampling draws made so far
    pub fn bandit_selections(&self) -> u64 {
        self.bandit.selections()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    // ============================================
    // Catalog
    // ============================================

    /// Refit the mood space when the catalog size drifted past the tolerance
    pub async fn refresh_catalog(&self) -> Result<Arc<MoodSpaceSnapshot>> {
        let count = self.catalog.track_count().await?;
        if !self.mood_space.needs_refit(count) {
            return Ok(self.mood_space.snapshot());
        }
        let tracks = self.catalog.fetch_tracks().await?;
        Ok(self.mood_space.ensure_fresh(&tracks)?)
    }

    /// Current snapshot plus whether it is a stale fallback
    async fn load_snapshot(&self) -> Result<(Arc<MoodSpaceSnapshot>, bool)> {
        match self.refresh_catalog().await {
            Ok(snapshot) => Ok((snapshot, false)),
            Err(EngineError::StoreUnavailable(msg)) if self.mood_space.is_fitted() => {
                warn!(error = %msg, "Catalog unavailable, serving cached snapshot");
                Ok((self.mood_space.snapshot(), true))
            }
            Err(e) if self.mood_space.is_fitted() => {
                warn!(error = %e, "Catalog refresh failed, keeping cached snapshot");
                Ok((self.mood_space.snapshot(), false))
            }
            Err(e) => Err(e),
        }
    }

    // ============================================
    // Recommend
    // ============================================

    fn validate_request(&self, request: &RecommendationRequest) -> Result<Option<Mood>> {
        if request.user_id.trim().is_empty() {
            return Err(EngineError::Validation("user_id is required".to_string()));
        }
        if matches!(&request.session_id, Some(s) if s.trim().is_empty()) {
            return Err(EngineError::Validation("session_id must not be empty".to_string()));
        }
        let max = self.ranking.max_limit();
        if request.limit == 0 || request.limit > max {
            return Err(EngineError::Validation(format!(
                "limit must be between 1 and {}, got {}",
                max, request.limit
            )));
        }
        let factor = request.options.diversity_factor;
        if !factor.is_finite() || !(0.0..=1.0).contains(&factor) {
            return Err(EngineError::Validation(format!(
                "diversity_factor must be in [0, 1], got {}",
                factor
            )));
        }
        if let Some(energy) = request.energy_hint {
            if !energy.is_finite() || !(0.0..=1.0).contains(&energy) {
                return Err(EngineError::Validation(format!(
                    "energy_hint must be in [0, 1], got {}",
                    energy
                )));
            }
        }
        request
            .mood_hint
            .as_deref()
            .map(|m| {
                m.parse::<Mood>()
                    .map_err(|_| EngineError::Validation(format!("unknown mood: {}", m)))
            })
            .transpose()
    }

    /// Mood centroid with the arousal replaced by the energy hint
    fn target_point(snapshot: &MoodSpaceSnapshot, mood: Option<Mood>, energy: Option<f64>) -> Option<VaPoint> {
        match (mood, energy) {
            (Some(m), Some(e)) => Some(VaPoint::new(snapshot.centroid(m).valence, 2.0 * e - 1.0)),
            (Some(m), None) => Some(snapshot.centroid(m)),
            (None, Some(e)) => Some(VaPoint::new(0.0, 2.0 * e - 1.0)),
            (None, None) => None,
        }
    }

    /// Record the conversation turn and derive what to aim for
    async fn conversation_turn(
        &self,
        session: &SessionHandle,
        request: &RecommendationRequest,
        hinted: Option<Mood>,
        snapshot: &MoodSpaceSnapshot,
        now: DateTime<Utc>,
    ) -> TurnTarget {
        let extracted = request
            .message
            .as_deref()
            .map(|text| self.extractor.extract(text))
            .unwrap_or_default();
        let turn_mood = hinted.or(extracted.mood);
        let turn_va = turn_mood.and_then(|m| Self::target_point(snapshot, Some(m), request.energy_hint));
        let confidence = turn_va
            .map(|va| snapshot.classify_point(va).confidence)
            .unwrap_or(0.0);

        let mut session = session.write().await;
        session.add_turn(ConversationTurn {
            text: request.message.clone(),
            mood: turn_mood,
            intensity: extracted.intensity,
            entities: extracted.entities,
            va: turn_va,
            confidence,
            at: now,
        });

        let features = session.get_context_features();
        let mood = turn_mood.or(features.dominant_mood);
        let trajectory = request
            .options
            .use_trajectory
            .then(|| session.trajectory().summary());

        TurnTarget {
            mood,
            va: Self::target_point(snapshot, mood, request.energy_hint),
            uplift: trajectory.as_ref().map_or(false, |t| t.should_intervene),
            trajectory,
            recent: session
                .recent_songs()
                .take(self.config.strategies.diversity_window)
                .cloned()
                .collect(),
        }
    }

    pub async fn recommend(&self, request: RecommendationRequest) -> Result<RecommendationResponse> {
        let started = Instant::now();
        let request_id = Uuid::new_v4();
        let hinted = self.validate_request(&request)?;

        let (snapshot, degraded) = self.load_snapshot().await?;
        if snapshot.is_empty() {
            return Err(EngineError::Exhausted("catalog has no songs".to_string()));
        }

        let now = Utc::now();
        let user_id = request.user_id.as_str();
        let seed = request.options.seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);

        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| ConversationContextMemory::default_session_id(user_id));
        let session = self.sessions.get_or_create(&session_id, user_id).await;
        let target = self
            .conversation_turn(&session, &request, hinted, &snapshot, now)
            .await;

        let learner = &self.config.learner;
        let user = match self
            .store
            .read(user_id, |s| {
                UserView::of(s, s.weights.decayed(now, learner.decay_rate, learner.decay_period_days))
            })
            .await
        {
            Some(view) => view,
            None => {
                let fresh = UserState::new(user_id, learner);
                let weights = fresh.weights.clone();
                UserView::of(&fresh, weights)
            }
        };

        let cold = self.cold_start.is_cold(user.feedback_count);
        let pw = if degraded {
            0.0
        } else {
            self.cold_start.personalization_weight(user.feedback_count)
        };

        let selected = if cold || degraded {
            StrategyBlend::uniform()
        } else {
            let bandit = &self.bandit;
            self.store
                .update(user_id, |s| bandit.select_blend(s.arms_mut(), &mut rng))
                .await
        };
        let blend = selected.with_diversity_factor(request.options.diversity_factor);

        let neighbor_centroids = if cold || degraded {
            Vec::new()
        } else {
            self.store.neighbor_centroids(
                user_id,
                &user.liked,
                self.config.strategies.collaborative_min_overlap,
                self.config.strategies.collaborative_max_neighbors,
            )
        };

        let ctx = ScoringContext {
            target_mood: target.mood,
            target_va: target.va,
            uplift: target.uplift,
            uplift_valence_shift: self.config.trajectory.uplift_valence_shift,
            liked_centroid: user.liked_centroid.clone(),
            neighbor_centroids,
            recent_vectors: target
                .recent
                .iter()
                .filter_map(|id| snapshot.song(id))
                .map(|s| s.feature_vector())
                .collect(),
            seed,
            weights: user.weights.clone(),
            config: self.config.strategies.clone(),
        };

        let fallback: Option<FallbackRanking> = if degraded {
            Some(self.cold_start.hybrid_fallback(&snapshot.songs, None, 0, now))
        } else if pw < 1.0 {
            Some(self.cold_start.hybrid_fallback(
                &snapshot.songs,
                target.mood.map(|m| snapshot.centroid(m)),
                request.limit * CLUSTER_CAP_FACTOR,
                now,
            ))
        } else {
            None
        };

        let candidates: Vec<RankedCandidate> = snapshot
            .songs
            .iter()
            .map(|song| {
                let breakdown = score_all(song, &ctx, &blend);
                let strategy = breakdown.dominant();
                let fallback_score = fallback.as_ref().map_or(0.0, |f| f.score(&song.id));
                let fallback_source = fallback.as_ref().and_then(|f| f.source(&song.id));

                let (base, label) = if degraded {
                    (fallback_score, POPULARITY_LABEL.to_string())
                } else {
                    let base = RankingAggregator::blend_cold_start(breakdown.combined, fallback_score, pw);
                    let label = match fallback_source {
                        Some(source) if (1.0 - pw) * fallback_score > pw * breakdown.combined => {
                            source.as_str().to_string()
                        }
                        _ => strategy.as_str().to_string(),
                    };
                    (base, label)
                };
                let recency = self
                    .ranking
                    .recency_factor(user.play_history.get(&song.id).copied(), now);

                RankedCandidate {
                    song_id: song.id.clone(),
                    artist: song.artist.clone(),
                    genre: song.genre.clone(),
                    score: base * recency,
                    strategy,
                    label,
                    contributions: breakdown.contributions(),
                    explanation: None,
                }
            })
            .collect();

        let mut ranked = self.ranking.arrange(candidates, request.limit);
        if ranked.is_empty() {
            return Err(EngineError::Exhausted("no candidate survived ranking".to_string()));
        }
        if request.options.explain {
            for candidate in ranked.iter_mut() {
                if let Some(song) = snapshot.song(&candidate.song_id) {
                    candidate.explanation =
                        Some(explain(&candidate.label, target.mood, song, target.uplift));
                }
            }
        }

        self.store
            .update(user_id, |s| {
                for c in &ranked {
                    s.served.record(
                        &c.song_id,
                        ContextSnapshot {
                            strategy: c.strategy,
                            mood: target.mood,
                            contributions: c.contributions.clone(),
                        },
                    );
                }
            })
            .await;
        session
            .write()
            .await
            .mark_recommended(ranked.iter().map(|c| (c.song_id.as_str(), c.strategy)));

        let recommendations: Vec<RecommendedSong> = ranked
            .into_iter()
            .map(|c| {
                let title = snapshot
                    .song(&c.song_id)
                    .map(|s| s.title.clone())
                    .unwrap_or_default();
                RecommendedSong {
                    song_id: c.song_id,
                    title,
                    artist: c.artist,
                    score: c.score,
                    strategy_label: c.label,
                    explanation: c.explanation,
                }
            })
            .collect();

        let processing_time_ms = started.elapsed().as_millis() as u64;
        info!(
            request_id = %request_id,
            user_id = %user_id,
            session_id = %session_id,
            mood = target.mood.map(|m| m.as_str()).unwrap_or("unknown"),
            count = recommendations.len(),
            cold_start = cold,
            personalization_weight = pw,
            uplift = target.uplift,
            degraded = degraded,
            processing_time_ms = processing_time_ms,
            "Recommendations served"
        );

        Ok(RecommendationResponse {
            request_id,
            session_id,
            recommendations,
            strategy_blend_used: blend.to_map(),
            cold_start_active: cold,
            personalization_weight: pw,
            emotional_trajectory: target.trajectory,
            processing_time_ms,
            degraded,
        })
    }

    // ============================================
    // Feedback
    // ============================================

    fn validate_feedback(request: &FeedbackRequest) -> Result<(FeedbackKind, Option<f64>)> {
        if request.user_id.trim().is_empty() {
            return Err(EngineError::Validation("user_id is required".to_string()));
        }
        if request.song_id.trim().is_empty() {
            return Err(EngineError::Validation("song_id is required".to_string()));
        }
        let kind = request.feedback_kind.parse::<FeedbackKind>().map_err(|_| {
            EngineError::Validation(format!("unknown feedback kind: {}", request.feedback_kind))
        })?;

        let listen_fraction = match (request.play_duration, request.song_duration) {
            (None, _) => None,
            (Some(played), total) => {
                if !played.is_finite() || played < 0.0 {
                    return Err(EngineError::Validation(format!(
                        "play_duration must be a non-negative number, got {}",
                        played
                    )));
                }
                match total {
                    Some(t) if t.is_finite() && t > 0.0 => Some((played / t).clamp(0.0, 1.0)),
                    Some(t) => {
                        return Err(EngineError::Validation(format!(
                            "song_duration must be positive, got {}",
                            t
                        )))
                    }
                    None => None,
                }
            }
        };
        Ok((kind, listen_fraction))
    }

    /// Songs added after the last fit are classified against the current prototypes
    async fn classify_unfitted(
        &self,
        song_id: &str,
    ) -> (Option<[f64; AudioFeatures::VECTOR_LEN]>, Option<Mood>) {
        match self.catalog.fetch_track(song_id).await {
            Ok(Some(track)) => {
                let classification = self.mood_space.classify(&track.features, &track.genre);
                debug!(
                    song_id = %song_id,
                    mood = %classification.mood,
                    "Classified song outside the fitted snapshot"
                );
                (Some(track.features.to_vector()), Some(classification.mood))
            }
            Ok(None) => {
                debug!(song_id = %song_id, "Feedback for song outside the catalog");
                (None, None)
            }
            Err(e) => {
                warn!(song_id = %song_id, error = %e, "Catalog lookup failed, feedback left unclassified");
                (None, None)
            }
        }
    }

    /// Acknowledge a feedback event and queue it for learning
    pub async fn submit_feedback(&self, request: FeedbackRequest) -> Result<FeedbackAck> {
        let (kind, listen_fraction) = Self::validate_feedback(&request)?;
        let now = Utc::now();

        let snapshot = self.mood_space.snapshot();
        let (song_vector, song_mood) = match snapshot.song(&request.song_id) {
            Some(song) => (Some(song.feature_vector()), Some(song.mood)),
            None => self.classify_unfitted(&request.song_id).await,
        };

        let handle = self.store.get(&request.user_id);
        let guard = match &handle {
            Some(h) => Some(h.read().await),
            None => None,
        };
        let fresh;
        let state: &UserState = match &guard {
            Some(g) => &**g,
            None => {
                fresh = UserState::new(&request.user_id, &self.config.learner);
                &fresh
            }
        };

        let context = state
            .served
            .lookup(&request.song_id)
            .cloned()
            .unwrap_or_else(|| ContextSnapshot::unattributed(song_mood));
        let event = FeedbackEvent {
            user_id: request.user_id.clone(),
            song_id: request.song_id.clone(),
            session_id: request.session_id.clone(),
            kind,
            listen_fraction,
            context,
            occurred_at: now,
        };
        let plan = self.workers.learner().plan(state, &event, now);
        drop(guard);

        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| ConversationContextMemory::default_session_id(&request.user_id));
        match self.sessions.get(&session_id) {
            Some(session) => {
                let mut session = session.write().await;
                if session.user_id == request.user_id && !session.is_closed() {
                    session.record_feedback(&request.song_id, plan.kind, listen_fraction);
                }
            }
            None => debug!(session_id = %session_id, "Feedback for unknown session"),
        }

        let dispatched = self.workers.dispatch(
            &request.user_id,
            WorkerMessage::Learn(Box::new(LearningJob { event, song_vector })),
        );
        if let Err(e) = &dispatched {
            error!(user_id = %request.user_id, error = %e, "Feedback could not be queued");
        }

        debug!(
            user_id = %request.user_id,
            song_id = %request.song_id,
            kind = plan.kind.as_str(),
            reward = plan.bandit_reward,
            "Feedback accepted"
        );

        Ok(FeedbackAck {
            accepted: dispatched.is_ok(),
            reward_applied: dispatched.is_ok().then_some(plan.bandit_reward),
            weights_changed: plan.weights_changed,
        })
    }

    /// Wait until every feedback event queued for the user has been applied
    pub async fn flush_feedback(&self, user_id: &str) -> Result<()> {
        Ok(self.workers.flush(user_id).await?)
    }

    // ============================================
    // Sessions
    // ============================================

    pub async fn session_status(&self, user_id: &str, session_id: Option<&str>) -> Result<SessionStatus> {
        if user_id.trim().is_empty() {
            return Err(EngineError::Validation("user_id is required".to_string()));
        }
        let session_id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| ConversationContextMemory::default_session_id(user_id));

        let (context, trajectory, session_reward) = match self.sessions.get(&session_id) {
            Some(handle) => {
                let session = handle.read().await;
                if session.user_id == user_id {
                    let reward = self
                        .reward
                        .calculate(session.feedback_stats(), session.trajectory().valence_span());
                    (
                        Some(session.get_context_features()),
                        Some(session.trajectory().summary()),
                        Some(reward.total),
                    )
                } else {
                    (None, None, None)
                }
            }
            None => (None, None, None),
        };

        let now = Utc::now();
        let learner = &self.config.learner;
        let (posteriors, weights, feedback_count) = self
            .store
            .read(user_id, |s| {
                (
                    s.arms.as_ref().map(|a| a.to_map()).unwrap_or_default(),
                    s.weights
                        .decayed(now, learner.decay_rate, learner.decay_period_days)
                        .as_map(),
                    s.feedback_count,
                )
            })
            .await
            .unwrap_or_else(|| {
                let fresh = UserState::new(user_id, learner);
                (Default::default(), fresh.weights.as_map(), 0)
            });

        Ok(SessionStatus {
            user_id: user_id.to_string(),
            session_id,
            context,
            trajectory,
            bandit_posteriors: posteriors,
            weights,
            cold_start_active: self.cold_start.is_cold(feedback_count),
            personalization_weight: self.cold_start.personalization_weight(feedback_count),
            feedback_count,
            session_reward,
        })
    }

    /// Close a session and feed its reward to the bandit.
    ///
    /// Returns `None` for unknown sessions and sessions that never served a
    /// recommendation.
    pub async fn close_session(&self, user_id: &str, session_id: Option<&str>) -> Result<Option<SessionReward>> {
        if user_id.trim().is_empty() {
            return Err(EngineError::Validation("user_id is required".to_string()));
        }
        let session_id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| ConversationContextMemory::default_session_id(user_id));
        let Some(handle) = self.sessions.get(&session_id) else {
            return Ok(None);
        };
        if handle.read().await.user_id != user_id {
            return Err(EngineError::Validation(format!(
                "session {} does not belong to user {}",
                session_id, user_id
            )));
        }
        self.sessions.remove(&session_id);
        Ok(self.settle_session(&handle).await)
    }

    async fn settle_session(&self, handle: &SessionHandle) -> Option<SessionReward> {
        let mut session = handle.write().await;
        session.close();
        if !session.settle_reward() {
            return None;
        }
        let strategy = session.dominant_strategy()?;
        let reward = self
            .reward
            .calculate(session.feedback_stats(), session.trajectory().valence_span());

        if let Err(e) = self.workers.dispatch(
            &session.user_id,
            WorkerMessage::SessionReward {
                strategy,
                reward: reward.total,
            },
        ) {
            error!(session_id = %session.id, error = %e, "Session reward could not be queued");
            return None;
        }

        info!(
            session_id = %session.id,
            user_id = %session.user_id,
            strategy = %strategy,
            reward = reward.total,
            engagement = reward.engagement,
            satisfaction = reward.satisfaction,
            emotional_improvement = reward.emotional_improvement,
            "Session reward settled"
        );
        Some(reward)
    }

    // ============================================
    // Maintenance
    // ============================================

    /// Expire idle sessions, decay idle users and re-check the catalog
    pub async fn run_maintenance(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let timeout = chrono::Duration::seconds(self.config.service.session_timeout_secs as i64);
        let expired = self.sessions.sweep_expired(now, timeout);

        let mut report = MaintenanceReport {
            expired_sessions: expired.len(),
            ..Default::default()
        };
        for handle in &expired {
            if self.settle_session(handle).await.is_some() {
                report.rewards_settled += 1;
            }
        }

        report.users_decayed = self.store.decay_idle(now);

        match self.refresh_catalog().await {
            Ok(snapshot) => report.catalog_songs = snapshot.songs.len(),
            Err(e) => {
                warn!(error = %e, "Catalog refresh failed during maintenance");
                report.catalog_songs = self.mood_space.snapshot().songs.len();
                report.catalog_error = Some(e.to_string());
            }
        }

        debug!(
            expired_sessions = report.expired_sessions,
            rewards_settled = report.rewards_settled,
            users_decayed = report.users_decayed,
            catalog_songs = report.catalog_songs,
            "Maintenance pass completed"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogError, InMemoryCatalog, MockCatalogStore};
    use crate::services::mood_space::tests::track;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn catalog() -> Vec<crate::models::TrackRecord> {
        vec![
            track("s1", "a1", "pop", 0.9, 0.9, 0.1),
            track("s2", "a2", "pop", 0.85, 0.8, 0.1),
            track("s3", "a3", "folk", 0.1, 0.1, 0.9),
            track("s4", "a4", "folk", 0.15, 0.15, 0.8),
            track("s5", "a5", "jazz", 0.8, 0.2, 0.9),
            track("s6", "a6", "jazz", 0.75, 0.25, 0.8),
        ]
    }

    fn engine() -> RecommendationEngine {
        RecommendationEngine::new(Config::default(), Arc::new(InMemoryCatalog::new(catalog())))
    }

    #[tokio::test]
    async fn test_rejects_invalid_requests() {
        let engine = engine();
        let cases = [
            RecommendationRequest::new(""),
            RecommendationRequest::new("u1").with_limit(0),
            RecommendationRequest::new("u1").with_limit(10_000),
            RecommendationRequest::new("u1").with_mood("ecstatic-ish"),
        ];
        for request in cases {
            let err = engine.recommend(request).await.unwrap_err();
            assert!(err.is_client_error(), "{:?}", err);
        }

        let mut request = RecommendationRequest::new("u1");
        request.energy_hint = Some(1.5);
        assert!(matches!(
            engine.recommend(request).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_catalog_is_exhausted() {
        let engine = RecommendationEngine::new(Config::default(), Arc::new(InMemoryCatalog::new(vec![])));
        let result = engine.recommend(RecommendationRequest::new("u1")).await;
        assert!(matches!(result, Err(EngineError::Exhausted(_))));
    }

    #[tokio::test]
    async fn test_unavailable_store_without_snapshot() {
        let mut mock = MockCatalogStore::new();
        mock.expect_track_count()
            .returning(|| Err(CatalogError::Unavailable("connection refused".to_string())));
        let engine = RecommendationEngine::new(Config::default(), Arc::new(mock));

        let result = engine.recommend(RecommendationRequest::new("u1")).await;
        assert!(matches!(result, Err(EngineError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_degraded_mode_serves_popularity_from_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut mock = MockCatalogStore::new();
        mock.expect_track_count().returning(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(6)
            } else {
                Err(CatalogError::Unavailable("timeout".to_string()))
            }
        });
        mock.expect_fetch_tracks().times(1).returning(|| Ok(catalog()));
        let engine = RecommendationEngine::new(Config::default(), Arc::new(mock));

        let first = engine
            .recommend(RecommendationRequest::new("u1").with_mood("happy").with_limit(3))
            .await
            .unwrap();
        assert!(!first.degraded);

        let second = engine
            .recommend(RecommendationRequest::new("u1").with_mood("happy").with_limit(3))
            .await
            .unwrap();
        assert!(second.degraded);
        assert_eq!(second.personalization_weight, 0.0);
        assert!(second
            .recommendations
            .iter()
            .all(|r| r.strategy_label == POPULARITY_LABEL));
    }

    #[tokio::test]
    async fn test_failed_refit_keeps_cached_snapshot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut mock = MockCatalogStore::new();
        mock.expect_track_count().returning(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(6)
            } else {
                Ok(40)
            }
        });
        let fetches = Arc::new(AtomicUsize::new(0));
        let fetch_counter = Arc::clone(&fetches);
        mock.expect_fetch_tracks().returning(move || {
            if fetch_counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(catalog())
            } else {
                Err(CatalogError::InvalidData("row 17: bad tempo".to_string()))
            }
        });
        let engine = RecommendationEngine::new(Config::default(), Arc::new(mock));

        let first = engine
            .recommend(RecommendationRequest::new("u1").with_mood("calm").with_limit(2))
            .await
            .unwrap();
        assert_eq!(first.recommendations.len(), 2);

        let second = engine
            .recommend(RecommendationRequest::new("u1").with_mood("calm").with_limit(2))
            .await
            .unwrap();
        assert_eq!(second.recommendations.len(), 2);
        assert!(!second.degraded);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_feedback_for_song_added_after_fit() {
        let shared = Arc::new(InMemoryCatalog::new(catalog()));
        let engine = RecommendationEngine::new(Config::default(), shared.clone());
        engine
            .recommend(RecommendationRequest::new("u1").with_mood("happy").with_limit(2))
            .await
            .unwrap();

        shared.upsert(vec![track("s7", "a7", "pop", 0.9, 0.85, 0.1)]).await;
        assert!(engine.mood_space().snapshot().song("s7").is_none());

        let ack = engine
            .submit_feedback(FeedbackRequest::new("u2", "s7", "like"))
            .await
            .unwrap();
        assert!(ack.accepted);
        engine.flush_feedback("u2").await.unwrap();

        let centroid = engine
            .store()
            .read("u2", |s| s.taste.centroid())
            .await
            .unwrap();
        assert!(centroid.is_some());
    }

    #[tokio::test]
    async fn test_feedback_validation() {
        let engine = engine();
        let bad = [
            FeedbackRequest::new("u1", "", "like"),
            FeedbackRequest::new("u1", "s1", "meh"),
            FeedbackRequest::new("u1", "s1", "play").with_durations(-1.0, 200.0),
            FeedbackRequest::new("u1", "s1", "play").with_durations(10.0, 0.0),
        ];
        for request in bad {
            assert!(matches!(
                engine.submit_feedback(request).await,
                Err(EngineError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_close_unknown_session_is_none() {
        let engine = engine();
        assert!(engine.close_session("u1", Some("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_maintenance_expires_and_settles() {
        let engine = engine();
        engine
            .recommend(RecommendationRequest::new("u1").with_session("s-1").with_mood("calm"))
            .await
            .unwrap();
        engine
            .submit_feedback(FeedbackRequest::new("u1", "s3", "like").with_session("s-1"))
            .await
            .unwrap();
        engine.flush_feedback("u1").await.unwrap();

        let later = Utc::now() + chrono::Duration::hours(2);
        let report = engine.run_maintenance(later).await;
        assert_eq!(report.expired_sessions, 1);
        assert_eq!(report.rewards_settled, 1);
        assert_eq!(engine.active_sessions(), 0);
    }
}
