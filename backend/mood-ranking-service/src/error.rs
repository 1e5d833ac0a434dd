use crate::catalog::CatalogError;
use crate::services::learner::LearnerError;
use crate::services::mood_space::MoodSpaceError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the recommendation engine
///
/// Only `Validation`, `StoreUnavailable` (with no cached catalog) and
/// `Exhausted` ever reach a caller; the other variants are absorbed by
/// fallbacks and logged.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Computation error: {0}")]
    Computation(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("All strategies exhausted: {0}")]
    Exhausted(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the caller can fix the request and retry
    pub fn is_client_error(&self) -> bool {
        matches!(self, EngineError::Validation(_))
    }
}

impl From<CatalogError> for EngineError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Unavailable(msg) => EngineError::StoreUnavailable(msg),
            CatalogError::InvalidData(msg) => EngineError::Internal(msg),
        }
    }
}

impl From<MoodSpaceError> for EngineError {
    fn from(err: MoodSpaceError) -> Self {
        match err {
            MoodSpaceError::EmptyCatalog => {
                EngineError::InsufficientData("catalog has no songs".to_string())
            }
            MoodSpaceError::Computation(msg) => EngineError::Computation(msg),
        }
    }
}

impl From<LearnerError> for EngineError {
    fn from(err: LearnerError) -> Self {
        match err {
            LearnerError::UnknownUser(user) => {
                EngineError::InsufficientData(format!("no state for user {}", user))
            }
            LearnerError::WorkerUnavailable(msg) => EngineError::Internal(msg),
            busy @ LearnerError::StateBusy { .. } => EngineError::Internal(busy.to_string()),
        }
    }
}
