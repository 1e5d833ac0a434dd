// ============================================
// Maintenance Job
// ============================================
//
// Runs `RecommendationEngine::run_maintenance` on a fixed interval until the
// shutdown signal fires. Each pass is independent; a failed catalog refresh
// is logged and retried on the next tick.

use crate::config::Config;
use crate::engine::RecommendationEngine;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub interval: Duration,
    /// Exit after the first pass
    pub run_once: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            run_once: false,
        }
    }
}

impl MaintenanceConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: Duration::from_secs(config.service.maintenance_interval_secs.max(1)),
            run_once: false,
        }
    }
}

/// Totals across all passes of one job
#[derive(Debug, Clone, Default)]
pub struct MaintenanceStats {
    pub started_at: Option<DateTime<Utc>>,
    pub last_pass_at: Option<DateTime<Utc>>,
    pub passes: u64,
    pub sessions_expired: u64,
    pub rewards_settled: u64,
    pub users_decayed: u64,
    pub catalog_failures: u64,
    pub total_duration_ms: u64,
}

pub struct MaintenanceJob {
    config: MaintenanceConfig,
    engine: Arc<RecommendationEngine>,
}

impl MaintenanceJob {
    pub fn new(config: MaintenanceConfig, engine: Arc<RecommendationEngine>) -> Self {
        Self { config, engine }
    }

    /// Run one pass and fold it into `stats`
    pub async fn run_single_pass(&self, stats: &mut MaintenanceStats) {
        let start = Instant::now();
        let now = Utc::now();
        let report = self.engine.run_maintenance(now).await;

        stats.passes += 1;
        stats.last_pass_at = Some(now);
        stats.sessions_expired += report.expired_sessions as u64;
        stats.rewards_settled += report.rewards_settled as u64;
        stats.users_decayed += report.users_decayed as u64;
        if report.catalog_error.is_some() {
            stats.catalog_failures += 1;
        }
        stats.total_duration_ms += start.elapsed().as_millis() as u64;

        if report.expired_sessions > 0 || report.users_decayed > 0 {
            info!(
                expired_sessions = report.expired_sessions,
                rewards_settled = report.rewards_settled,
                users_decayed = report.users_decayed,
                catalog_songs = report.catalog_songs,
                "Maintenance pass completed"
            );
        }
        if let Some(err) = report.catalog_error {
            warn!(error = %err, "Catalog still unavailable");
        }
    }

    /// Loop until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> MaintenanceStats {
        let mut stats = MaintenanceStats {
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting maintenance job"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_single_pass(&mut stats).await;
                    if self.config.run_once {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(
            passes = stats.passes,
            sessions_expired = stats.sessions_expired,
            rewards_settled = stats.rewards_settled,
            "Maintenance job stopped"
        );
        stats
    }
}

/// Spawn the job on the runtime
pub fn spawn_maintenance(
    config: MaintenanceConfig,
    engine: Arc<RecommendationEngine>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<MaintenanceStats> {
    tokio::spawn(async move { MaintenanceJob::new(config, engine).run(shutdown).await })
}
