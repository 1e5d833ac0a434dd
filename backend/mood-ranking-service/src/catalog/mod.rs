// ============================================
// Catalog Collaborators
// ============================================
//
// The engine never owns catalog persistence. It reads tracks and their
// popularity counters through `CatalogStore`, and coarse mood bundles from
// free text through `MoodExtractor`.

pub mod extractor;

pub use extractor::{ExtractedMood, LexiconMoodExtractor, MoodExtractor};

use crate::models::TrackRecord;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid catalog data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// Read access to the song catalog
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Every track with its current popularity counters
    async fn fetch_tracks(&self) -> Result<Vec<TrackRecord>>;

    /// Cheap size check used to decide whether the mood space must be refit
    async fn track_count(&self) -> Result<usize>;

    /// Single track lookup, for songs added since the last fit
    async fn fetch_track(&self, id: &str) -> Result<Option<TrackRecord>>;
}

/// Catalog held in process memory, optionally loaded from a JSON snapshot
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    tracks: RwLock<Vec<TrackRecord>>,
}

impl InMemoryCatalog {
    pub fn new(tracks: Vec<TrackRecord>) -> Self {
        Self {
            tracks: RwLock::new(tracks),
        }
    }

    /// Parse a JSON array of tracks
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let tracks: Vec<TrackRecord> =
            serde_json::from_str(raw).map_err(|e| CatalogError::InvalidData(e.to_string()))?;
        validate_tracks(&tracks)?;
        Ok(Self::new(tracks))
    }

    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CatalogError::Unavailable(format!("{}: {}", path.display(), e)))?;
        let catalog = Self::from_json_str(&raw)?;
        info!(
            path = %path.display(),
            tracks = catalog.tracks.read().await.len(),
            "Loaded catalog snapshot"
        );
        Ok(catalog)
    }

    /// Add or replace tracks by id
    pub async fn upsert(&self, incoming: Vec<TrackRecord>) {
        let mut tracks = self.tracks.write().await;
        for track in incoming {
            match tracks.iter_mut().find(|t| t.id == track.id) {
                Some(existing) => *existing = track,
                None => tracks.push(track),
            }
        }
    }
}

fn validate_tracks(tracks: &[TrackRecord]) -> Result<()> {
    if let Some(bad) = tracks.iter().find(|t| t.id.trim().is_empty()) {
        return Err(CatalogError::InvalidData(format!(
            "track {:?} has an empty id",
            bad.title
        )));
    }
    Ok(())
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn fetch_tracks(&self) -> Result<Vec<TrackRecord>> {
        Ok(self.tracks.read().await.clone())
    }

    async fn track_count(&self) -> Result<usize> {
        Ok(self.tracks.read().await.len())
    }

    async fn fetch_track(&self, id: &str) -> Result<Option<TrackRecord>> {
        Ok(self.tracks.read().await.iter().find(|t| t.id == id).cloned())
    }
}
