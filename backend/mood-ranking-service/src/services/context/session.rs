use crate::config::{ContextConfig, TrajectoryConfig};
use crate::models::{FeedbackKind, Intensity, Mood, StrategyKind, VaPoint};
use crate::services::trajectory::{EmotionalState, EmotionalTrajectoryTracker};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Conversation FSM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Greeting,
    Eliciting,
    Recommending,
    Refining,
    Closed,
}

/// One user message, already reduced to a coarse mood bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub text: Option<String>,
    pub mood: Option<Mood>,
    pub intensity: Option<Intensity>,
    pub entities: Vec<String>,
    /// Emotional target this turn implies, when a mood was present
    pub va: Option<VaPoint>,
    pub confidence: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextFeatures {
    pub dominant_mood: Option<Mood>,
    /// Share of mood-bearing turns that agree with the dominant mood
    pub mood_consistency: f64,
    pub entities: Vec<String>,
    pub state: SessionState,
    pub turn_count: usize,
}

/// Interaction counters feeding the session reward
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionFeedbackStats {
    pub plays: u32,
    pub listen_fraction_sum: f64,
    pub listen_samples: u32,
    pub likes: u32,
    pub skips: u32,
    pub dislikes: u32,
    pub total_interactions: u32,
}

impl SessionFeedbackStats {
    pub fn record(&mut self, kind: FeedbackKind, listen_fraction: Option<f64>) {
        self.total_interactions += 1;
        match kind {
            FeedbackKind::Like | FeedbackKind::Love => self.likes += 1,
            FeedbackKind::Skip => self.skips += 1,
            FeedbackKind::Dislike => self.dislikes += 1,
            FeedbackKind::Play | FeedbackKind::Complete | FeedbackKind::Revisit => {
                self.plays += 1
            }
        }
        if let Some(fraction) = listen_fraction.filter(|f| f.is_finite()) {
            self.listen_fraction_sum += fraction.clamp(0.0, 1.0);
            self.listen_samples += 1;
        } else if kind == FeedbackKind::Complete {
            self.listen_fraction_sum += 1.0;
            self.listen_samples += 1;
        }
    }

    pub fn avg_listen_fraction(&self) -> f64 {
        if self.listen_samples == 0 {
            0.0
        } else {
            self.listen_fraction_sum / self.listen_samples as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationSession {
    pub id: String,
    pub user_id: String,
    turns: VecDeque<ConversationTurn>,
    max_turns: usize,
    entities: BTreeSet<String>,
    state: SessionState,
    pub started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    trajectory: EmotionalTrajectoryTracker,
    recent_songs: VecDeque<String>,
    recent_capacity: usize,
    feedback: SessionFeedbackStats,
    /// Served song count per credited strategy
    served_by: BTreeMap<StrategyKind, u32>,
    /// Set once the continuous session reward has been fed to the bandit
    reward_settled: bool,
}

impl ConversationSession {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        context: &ContextConfig,
        trajectory: &TrajectoryConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            turns: VecDeque::with_capacity(context.max_turns),
            max_turns: context.max_turns.max(1),
            entities: BTreeSet::new(),
            state: SessionState::Greeting,
            started_at: now,
            last_activity: now,
            trajectory: EmotionalTrajectoryTracker::new(trajectory),
            recent_songs: VecDeque::new(),
            recent_capacity: context.recent_songs.max(1),
            feedback: SessionFeedbackStats::default(),
            served_by: BTreeMap::new(),
            reward_settled: false,
        }
    }

    /// Append a turn, evicting the oldest beyond `max_turns`
    pub fn add_turn(&mut self, turn: ConversationTurn) {
        if self.state == SessionState::Closed {
            return;
        }

        self.last_activity = turn.at;
        self.entities.extend(turn.entities.iter().cloned());

        self.state = match (self.state, turn.mood.is_some()) {
            (SessionState::Greeting, false) => SessionState::Eliciting,
            (SessionState::Greeting, true) | (SessionState::Eliciting, true) => {
                SessionState::Recommending
            }
            (SessionState::Recommending, _) | (SessionState::Refining, _) => {
                SessionState::Refining
            }
            (state, _) => state,
        };

        if let (Some(mood), Some(va)) = (turn.mood, turn.va) {
            self.trajectory.add_state(EmotionalState {
                valence: va.valence,
                arousal: va.arousal,
                mood,
                confidence: turn.confidence,
                timestamp: turn.at,
            });
        }

        if self.turns.len() == self.max_turns {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Rolling mode of turn moods; ties go to the most recently seen mood
    fn mode_mood(&self) -> (Option<Mood>, f64) {
        let mut counts: HashMap<Mood, (usize, usize)> = HashMap::new();
        let mut with_mood = 0;
        for (i, mood) in self.turns.iter().enumerate().filter_map(|(i, t)| t.mood.map(|m| (i, m))) {
            let entry = counts.entry(mood).or_insert((0, i));
            entry.0 += 1;
            entry.1 = i;
            with_mood += 1;
        }

        counts
            .into_iter()
            .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then(a.1 .1.cmp(&b.1 .1)))
            .map(|(mood, (count, _))| (Some(mood), count as f64 / with_mood as f64))
            .unwrap_or((None, 0.0))
    }

    pub fn get_context_features(&self) -> ContextFeatures {
        let (dominant_mood, mood_consistency) = self.mode_mood();
        ContextFeatures {
            dominant_mood,
            mood_consistency,
            entities: self.entities.iter().cloned().collect(),
            state: self.state,
            turn_count: self.turns.len(),
        }
    }

    /// Recommendations were served in this session
    pub fn mark_recommended<'a>(
        &mut self,
        served: impl IntoIterator<Item = (&'a str, StrategyKind)>,
    ) {
        if matches!(self.state, SessionState::Greeting | SessionState::Eliciting) {
            self.state = SessionState::Recommending;
        }
        self.last_activity = Utc::now();
        for (id, strategy) in served {
            self.push_recent(id);
            *self.served_by.entry(strategy).or_insert(0) += 1;
        }
    }

    /// Strategy credited with most served songs; `None` before anything was served
    pub fn dominant_strategy(&self) -> Option<StrategyKind> {
        self.served_by
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(k, _)| *k)
    }

    pub fn record_feedback(&mut self, song_id: &str, kind: FeedbackKind, listen_fraction: Option<f64>) {
        self.last_activity = Utc::now();
        self.feedback.record(kind, listen_fraction);
        if kind.is_listen() {
            self.push_recent(song_id);
        }
    }

    fn push_recent(&mut self, song_id: &str) {
        self.recent_songs.retain(|s| s != song_id);
        if self.recent_songs.len() == self.recent_capacity {
            self.recent_songs.pop_front();
        }
        self.recent_songs.push_back(song_id.to_string());
    }

    /// Most recent first
    pub fn recent_songs(&self) -> impl Iterator<Item = &String> {
        self.recent_songs.iter().rev()
    }

    pub fn trajectory(&self) -> &EmotionalTrajectoryTracker {
        &self.trajectory
    }

    pub fn feedback_stats(&self) -> &SessionFeedbackStats {
        &self.feedback
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.last_activity > timeout
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Marks the session reward as applied; returns false if it already was
    pub fn settle_reward(&mut self) -> bool {
        !std::mem::replace(&mut self.reward_settled, true)
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&mut self, at: DateTime<Utc>) {
        self.last_activity = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ConversationSession {
        ConversationSession::new(
            "s-1",
            "u-1",
            &ContextConfig::default(),
            &TrajectoryConfig::default(),
        )
    }

    fn turn(mood: Option<Mood>, entities: &[&str]) -> ConversationTurn {
        ConversationTurn {
            text: None,
            mood,
            intensity: None,
            entities: entities.iter().map(|e| e.to_string()).collect(),
            va: mood.map(|_| VaPoint::new(-0.5, -0.4)),
            confidence: 0.7,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_fsm_transitions() {
        let mut s = session();
        assert_eq!(s.state(), SessionState::Greeting);
        s.add_turn(turn(None, &[]));
        assert_eq!(s.state(), SessionState::Eliciting);
        s.add_turn(turn(Some(Mood::Sad), &[]));
        assert_eq!(s.state(), SessionState::Recommending);
        s.add_turn(turn(None, &[]));
        assert_eq!(s.state(), SessionState::Refining);
        s.close();
        s.add_turn(turn(Some(Mood::Happy), &[]));
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[test]
    fn test_turns_are_bounded_and_entities_accumulate() {
        let mut s = session();
        for i in 0..15 {
            let entity = format!("e{}", i);
            s.add_turn(turn(Some(Mood::Calm), &[entity.as_str()]));
        }
        let features = s.get_context_features();
        assert_eq!(features.turn_count, 10);
        // Entities are accumulated across evicted turns too
        assert_eq!(features.entities.len(), 15);
    }

    #[test]
    fn test_mode_mood_and_consistency() {
        let mut s = session();
        s.add_turn(turn(Some(Mood::Sad), &[]));
        s.add_turn(turn(Some(Mood::Sad), &[]));
        s.add_turn(turn(Some(Mood::Calm), &[]));
        s.add_turn(turn(None, &[]));
        let features = s.get_context_features();
        assert_eq!(features.dominant_mood, Some(Mood::Sad));
        assert!((features.mood_consistency - 2.0 / 3.0).abs() < 1e-9);

        // Tie goes to the most recent mood
        s.add_turn(turn(Some(Mood::Calm), &[]));
        assert_eq!(s.get_context_features().dominant_mood, Some(Mood::Calm));
    }

    #[test]
    fn test_recent_songs_dedup_and_order() {
        let mut s = session();
        s.mark_recommended([("a", StrategyKind::Emotion), ("b", StrategyKind::Content)]);
        s.record_feedback("a", FeedbackKind::Play, Some(0.5));
        let recent: Vec<&String> = s.recent_songs().collect();
        assert_eq!(recent, vec!["a", "b"]);
        assert_eq!(s.feedback_stats().plays, 1);
        // Tie between strategies goes to the earlier one
        assert_eq!(s.dominant_strategy(), Some(StrategyKind::Emotion));
    }

    #[test]
    fn test_settle_reward_once() {
        let mut s = session();
        assert!(s.settle_reward());
        assert!(!s.settle_reward());
    }

    #[test]
    fn test_expiry() {
        let mut s = session();
        s.set_last_activity(Utc::now() - Duration::minutes(45));
        assert!(s.is_expired(Utc::now(), Duration::minutes(30)));
    }
}
