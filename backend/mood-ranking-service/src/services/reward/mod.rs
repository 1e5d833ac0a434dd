// ============================================
// Session Reward Calculator
// ============================================
//
// reward = 0.4 * engagement + 0.3 * satisfaction + 0.3 * emotional_improvement
//
// engagement            = 0.5 * min(plays / 10, 1) + 0.5 * avg_listen_fraction
// satisfaction          = clamp((likes - 0.25 * skips) / interactions) mapped [-0.25, 1] -> [0, 1]
// emotional_improvement = (end_valence - start_valence + 1) / 2

use crate::config::RewardConfig;
use crate::services::context::SessionFeedbackStats;
use serde::{Deserialize, Serialize};

const NEUTRAL: f64 = 0.5;
const SKIP_PENALTY: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionReward {
    pub engagement: f64,
    pub satisfaction: f64,
    pub emotional_improvement: f64,
    pub total: f64,
}

pub struct SessionRewardCalculator {
    config: RewardConfig,
}

impl SessionRewardCalculator {
    pub fn new(config: RewardConfig) -> Self {
        Self { config }
    }

    pub fn engagement(&self, stats: &SessionFeedbackStats) -> f64 {
        let saturation = self.config.play_saturation.max(1) as f64;
        let plays = (stats.plays as f64 / saturation).min(1.0);
        0.5 * plays + 0.5 * stats.avg_listen_fraction().clamp(0.0, 1.0)
    }

    pub fn satisfaction(&self, stats: &SessionFeedbackStats) -> f64 {
        if stats.total_interactions == 0 {
            return NEUTRAL;
        }
        let raw = (stats.likes as f64 - SKIP_PENALTY * stats.skips as f64)
            / stats.total_interactions as f64;
        (raw.clamp(-SKIP_PENALTY, 1.0) + SKIP_PENALTY) / (1.0 + SKIP_PENALTY)
    }

    /// `span` is (start valence, end valence)
    pub fn emotional_improvement(&self, span: Option<(f64, f64)>) -> f64 {
        match span {
            Some((start, end)) => ((end - start + 1.0) / 2.0).clamp(0.0, 1.0),
            None => NEUTRAL,
        }
    }

    pub fn calculate(&self, stats: &SessionFeedbackStats, span: Option<(f64, f64)>) -> SessionReward {
        let engagement = self.engagement(stats);
        let satisfaction = self.satisfaction(stats);
        let emotional_improvement = self.emotional_improvement(span);

        let total = self.config.engagement_weight * engagement
            + self.config.satisfaction_weight * satisfaction
            + self.config.emotion_weight * emotional_improvement;

        SessionReward {
            engagement,
            satisfaction,
            emotional_improvement,
            total: total.clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeedbackKind;

    fn calculator() -> SessionRewardCalculator {
        SessionRewardCalculator::new(RewardConfig::default())
    }

    #[test]
    fn test_empty_session_is_neutral_except_engagement() {
        let reward = calculator().calculate(&SessionFeedbackStats::default(), None);
        assert_eq!(reward.engagement, 0.0);
        assert_eq!(reward.satisfaction, 0.5);
        assert_eq!(reward.emotional_improvement, 0.5);
        assert!((reward.total - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_satisfaction_mapping() {
        let calc = calculator();
        let mut all_skips = SessionFeedbackStats::default();
        for _ in 0..4 {
            all_skips.record(FeedbackKind::Skip, None);
        }
        assert_eq!(calc.satisfaction(&all_skips), 0.0);

        let mut all_likes = SessionFeedbackStats::default();
        all_likes.record(FeedbackKind::Like, None);
        all_likes.record(FeedbackKind::Love, None);
        assert!((calc.satisfaction(&all_likes) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_engaged_improving_session() {
        let calc = calculator();
        let mut stats = SessionFeedbackStats::default();
        for _ in 0..10 {
            stats.record(FeedbackKind::Play, Some(1.0));
        }
        let reward = calc.calculate(&stats, Some((-0.5, 0.5)));
        assert!((reward.engagement - 1.0).abs() < 1e-9);
        assert_eq!(reward.emotional_improvement, 1.0);
        // satisfaction: 0 likes over 10 interactions -> 0.25 / 1.25
        assert!((reward.satisfaction - 0.2).abs() < 1e-9);
        assert!((reward.total - (0.4 + 0.06 + 0.3)).abs() < 1e-9);
    }
}
