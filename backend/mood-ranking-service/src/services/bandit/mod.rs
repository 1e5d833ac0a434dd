// ============================================
// Bandit Strategy Selector (Thompson Sampling)
// ============================================
//
// One Beta(α, β) posterior per (user, strategy). Each request draws a sample
// per arm and turns the draws into a blend with a temperature softmax, so no
// strategy is ever fully excluded.
//
// Update with reward r ∈ [0, 1]:
//   α += r
//   β += 1 - r
//
// Every N updates the posteriors shrink toward Beta(1, 1):
//   α <- 1 + (α - 1) * retention

use crate::config::BanditConfig;
use crate::models::StrategyKind;
use crate::services::strategies::StrategyBlend;
use crate::utils::softmax;
use rand::Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmPosterior {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for ArmPosterior {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }
}

impl ArmPosterior {
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Posterior draw; falls back to the mean if the parameters are rejected
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match Beta::new(self.alpha, self.beta) {
            Ok(dist) => dist.sample(rng),
            Err(e) => {
                warn!(alpha = self.alpha, beta = self.beta, error = %e, "Invalid Beta parameters");
                self.mean()
            }
        }
    }
}

/// Per-user arm set, created lazily on first bandit use
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BanditArms {
    arms: [ArmPosterior; 5],
    updates: u64,
}

impl BanditArms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, strategy: StrategyKind) -> ArmPosterior {
        self.arms[strategy.index()]
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn to_map(&self) -> BTreeMap<String, ArmPosterior> {
        StrategyKind::ALL
            .iter()
            .map(|k| (k.as_str().to_string(), self.get(*k)))
            .collect()
    }
}

/// Result of one posterior update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmUpdate {
    pub strategy: StrategyKind,
    pub alpha_delta: f64,
    pub beta_delta: f64,
    pub prior_reset: bool,
}

pub struct BanditStrategySelector {
    config: BanditConfig,
    /// Number of blend selections served, across all users
    selections: AtomicU64,
}

impl BanditStrategySelector {
    pub fn new(config: BanditConfig) -> Self {
        Self {
            config,
            selections: AtomicU64::new(0),
        }
    }

    pub fn selections(&self) -> u64 {
        self.selections.load(Ordering::Relaxed)
    }

    /// Sample every arm and softmax the draws into a blend
    pub fn select_blend<R: Rng + ?Sized>(&self, arms: &BanditArms, rng: &mut R) -> StrategyBlend {
        self.selections.fetch_add(1, Ordering::Relaxed);

        let draws: Vec<f64> = StrategyKind::ALL
            .iter()
            .map(|k| arms.get(*k).sample(rng))
            .collect();
        let probs = softmax(&draws, self.config.softmax_temperature);

        let mut raw = [0.0; 5];
        for (kind, p) in StrategyKind::ALL.iter().zip(probs.iter()) {
            raw[kind.index()] = *p;
        }

        debug!(draws = ?draws, "Thompson draws");
        StrategyBlend::from_raw(raw)
    }

    /// Credit `reward` to `strategy`; the reward is clamped into [0, 1]
    pub fn update(&self, arms: &mut BanditArms, strategy: StrategyKind, reward: f64) -> ArmUpdate {
        let reward = if reward.is_finite() {
            reward.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let interval = self.config.prior_reset_interval;
        let prior_reset = interval > 0 && arms.updates > 0 && arms.updates % interval == 0;
        if prior_reset {
            let keep = self.config.prior_reset_retention.clamp(0.0, 1.0);
            for arm in arms.arms.iter_mut() {
                arm.alpha = 1.0 + (arm.alpha - 1.0) * keep;
                arm.beta = 1.0 + (arm.beta - 1.0) * keep;
            }
            debug!(updates = arms.updates, "Bandit prior reset");
        }

        let arm = &mut arms.arms[strategy.index()];
        arm.alpha += reward;
        arm.beta += 1.0 - reward;
        arms.updates += 1;

        ArmUpdate {
            strategy,
            alpha_delta: reward,
            beta_delta: 1.0 - reward,
            prior_reset,
        }
    }
}
