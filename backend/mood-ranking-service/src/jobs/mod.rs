// ============================================
// Background Jobs Module
// ============================================
//
// Periodic maintenance for the engine:
// 1. Expire idle sessions and settle their rewards
// 2. Decay personalization weights of idle users
// 3. Re-check the catalog size and refit the mood space when it drifted

pub mod maintenance;

pub use maintenance::{spawn_maintenance, MaintenanceConfig, MaintenanceJob, MaintenanceStats};
