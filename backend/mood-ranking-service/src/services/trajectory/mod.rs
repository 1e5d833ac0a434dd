// ============================================
// Emotional Trajectory Tracker
// ============================================
//
// Bounded window of emotional states for one conversation session.
// Trend = least-squares slope of valence over turn index.

use crate::config::TrajectoryConfig;
use crate::models::Mood;
use crate::utils::least_squares_slope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Consecutive declining pairs needed before the uplift modifier engages
const INTERVENTION_PAIRS: usize = 3;

/// Number of trailing states used for momentum
const MOMENTUM_SPAN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrajectoryTrend {
    Improving,
    Declining,
    Stable,
}

impl TrajectoryTrend {
    pub fn from_slope(slope: f64, threshold: f64) -> Self {
        if slope > threshold {
            TrajectoryTrend::Improving
        } else if slope < -threshold {
            TrajectoryTrend::Declining
        } else {
            TrajectoryTrend::Stable
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionalState {
    pub valence: f64,
    pub arousal: f64,
    pub mood: Mood,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// Read-only view returned with responses and session status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectorySummary {
    pub trend: TrajectoryTrend,
    pub slope: f64,
    pub momentum: f64,
    pub should_intervene: bool,
    pub points: usize,
}

#[derive(Debug, Clone)]
pub struct EmotionalTrajectoryTracker {
    window: usize,
    slope_threshold: f64,
    states: VecDeque<EmotionalState>,
    /// Valence of the first state ever added, kept after it leaves the window
    first_valence: Option<f64>,
}

impl EmotionalTrajectoryTracker {
    pub fn new(config: &TrajectoryConfig) -> Self {
        Self {
            window: config.window.max(1),
            slope_threshold: config.slope_threshold,
            states: VecDeque::with_capacity(config.window.max(1)),
            first_valence: None,
        }
    }

    pub fn add_state(&mut self, state: EmotionalState) {
        if self.first_valence.is_none() {
            self.first_valence = Some(state.valence);
        }
        if self.states.len() == self.window {
            self.states.pop_front();
        }
        self.states.push_back(state);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn latest(&self) -> Option<&EmotionalState> {
        self.states.back()
    }

    fn valences(&self) -> Vec<f64> {
        self.states.iter().map(|s| s.valence).collect()
    }

    pub fn slope(&self) -> f64 {
        least_squares_slope(&self.valences())
    }

    pub fn get_trajectory(&self) -> TrajectoryTrend {
        if self.states.len() < 2 {
            return TrajectoryTrend::Stable;
        }
        TrajectoryTrend::from_slope(self.slope(), self.slope_threshold)
    }

    /// Valence change across the last three states divided by their count
    pub fn get_emotional_momentum(&self) -> f64 {
        let n = self.states.len().min(MOMENTUM_SPAN);
        if n < 2 {
            return 0.0;
        }
        let tail: Vec<f64> = self.states.iter().skip(self.states.len() - n).map(|s| s.valence).collect();
        (tail[n - 1] - tail[0]) / n as f64
    }

    /// True only when each of the last three consecutive pairs is declining
    pub fn should_intervene(&self) -> bool {
        if self.states.len() < INTERVENTION_PAIRS + 1 {
            return false;
        }
        let valences = self.valences();
        valences
            .windows(2)
            .rev()
            .take(INTERVENTION_PAIRS)
            .all(|pair| {
                TrajectoryTrend::from_slope(least_squares_slope(pair), self.slope_threshold)
                    == TrajectoryTrend::Declining
            })
    }

    /// (first valence seen, latest valence); `None` without any state
    pub fn valence_span(&self) -> Option<(f64, f64)> {
        match (self.first_valence, self.states.back()) {
            (Some(first), Some(last)) => Some((first, last.valence)),
            _ => None,
        }
    }

    pub fn summary(&self) -> TrajectorySummary {
        TrajectorySummary {
            trend: self.get_trajectory(),
            slope: self.slope(),
            momentum: self.get_emotional_momentum(),
            should_intervene: self.should_intervene(),
            points: self.states.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with(valences: &[f64]) -> EmotionalTrajectoryTracker {
        let mut tracker = EmotionalTrajectoryTracker::new(&TrajectoryConfig::default());
        for v in valences {
            tracker.add_state(EmotionalState {
                valence: *v,
                arousal: 0.0,
                mood: if *v >= 0.0 { Mood::Happy } else { Mood::Sad },
                confidence: 0.8,
                timestamp: Utc::now(),
            });
        }
        tracker
    }

    #[test]
    fn test_trajectory_classification() {
        assert_eq!(tracker_with(&[0.0, 0.0]).get_trajectory(), TrajectoryTrend::Stable);
        assert_eq!(
            tracker_with(&[-0.5, -0.3, -0.1]).get_trajectory(),
            TrajectoryTrend::Improving
        );
        assert_eq!(
            tracker_with(&[0.5, 0.1, -0.4]).get_trajectory(),
            TrajectoryTrend::Declining
        );
        assert_eq!(tracker_with(&[0.9]).get_trajectory(), TrajectoryTrend::Stable);
    }

    #[test]
    fn test_window_is_bounded() {
        let tracker = tracker_with(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7]);
        assert_eq!(tracker.len(), 5);
        // First valence survives eviction
        assert_eq!(tracker.valence_span(), Some((0.1, 0.7)));
    }

    #[test]
    fn test_momentum() {
        assert_eq!(tracker_with(&[0.3]).get_emotional_momentum(), 0.0);
        let tracker = tracker_with(&[0.9, 0.0, 0.3, 0.6]);
        // (0.6 - 0.0) / 3
        assert!((tracker.get_emotional_momentum() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_should_intervene_needs_three_declining_pairs() {
        assert!(!tracker_with(&[0.5, 0.3, 0.1]).should_intervene());
        assert!(tracker_with(&[0.5, 0.3, 0.1, -0.2]).should_intervene());
        // One flat pair breaks the run
        assert!(!tracker_with(&[0.5, 0.3, 0.3, -0.2]).should_intervene());
    }
}
