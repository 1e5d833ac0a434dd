pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use catalog::{CatalogStore, InMemoryCatalog, LexiconMoodExtractor, MoodExtractor};
pub use config::Config;
pub use engine::{MaintenanceReport, RecommendationEngine};
pub use error::{EngineError, Result};
pub use models::{
    FeedbackAck, FeedbackRequest, Mood, RecommendationRequest, RecommendationResponse,
    SessionStatus,
};
