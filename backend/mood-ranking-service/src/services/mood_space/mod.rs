// ============================================
// Mood Vector Space
// ============================================
//
// Audio features -> Valence-Arousal point -> per-mood Gaussian prototypes.
//
// Readers always see an immutable `MoodSpaceSnapshot`. A refit builds a new
// snapshot without holding any lock and swaps the `Arc` in one write.
// Refit is pull-based: callers pass the current catalog and the space decides
// whether the size drift exceeds the tolerance.

pub mod prototype;

pub use prototype::{intensity_bucket, GaussianPrototype, MoodClassification, PrototypeSet};

use crate::config::MoodSpaceConfig;
use crate::models::{AudioFeatures, Mood, Song, TrackRecord, VaPoint};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum MoodSpaceError {
    #[error("Catalog is empty")]
    EmptyCatalog,

    #[error("Mood space computation failed: {0}")]
    Computation(String),
}

pub type Result<T> = std::result::Result<T, MoodSpaceError>;

/// Project audio features onto the VA plane
pub fn project(features: &AudioFeatures) -> VaPoint {
    let [happiness, danceability, energy, tempo, loudness, acousticness] = features.to_vector();

    let valence = 2.0 * (0.7 * happiness + 0.3 * danceability) - 1.0;
    let arousal = 2.0
        * (0.4 * energy + 0.2 * tempo + 0.2 * loudness + 0.2 * danceability
            - 0.2 * acousticness)
        - 1.0;

    VaPoint::new(valence, arousal)
}

/// Weak label used only to select which songs fit which prototype
pub fn weak_label(features: &AudioFeatures, va: VaPoint) -> Mood {
    let loud = features.loudness_normalized();
    let fast = features.tempo_normalized();
    if loud >= 0.75 && fast >= 0.6 && features.energy >= 0.7 && va.valence < 0.1 {
        return Mood::Angry;
    }

    match (va.valence >= 0.0, va.arousal) {
        (true, a) if a >= 0.5 => Mood::Energetic,
        (true, a) if a >= 0.0 => Mood::Happy,
        (true, _) => Mood::Calm,
        (false, a) if a >= 0.0 => Mood::Tense,
        (false, _) => Mood::Sad,
    }
}

/// Lowercase first alphanumeric word of a genre string ("Indie Rock" -> "indie")
pub fn genre_token(genre: &str) -> Option<String> {
    genre
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

/// Fitted prototypes plus every catalog song classified against them
#[derive(Debug)]
pub struct MoodSpaceSnapshot {
    pub prototypes: PrototypeSet,
    pub songs: Vec<Song>,
    pub catalog_size: usize,
    pub fitted_at: DateTime<Utc>,
    index: HashMap<String, usize>,
}

impl MoodSpaceSnapshot {
    fn unfitted(config: &MoodSpaceConfig) -> Self {
        Self {
            prototypes: PrototypeSet::defaults(
                config.default_variance,
                config.min_genre_members,
                config.intensity_threshold,
            ),
            songs: Vec::new(),
            catalog_size: 0,
            fitted_at: Utc::now(),
            index: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn song(&self, id: &str) -> Option<&Song> {
        self.index.get(id).map(|&i| &self.songs[i])
    }

    pub fn classify_point(&self, point: VaPoint) -> MoodClassification {
        self.prototypes.classify(point, None)
    }

    pub fn centroid(&self, mood: Mood) -> VaPoint {
        self.prototypes.centroid(mood)
    }

    /// Build a snapshot from raw tracks. Pure; does not touch any shared state.
    pub fn build(config: &MoodSpaceConfig, tracks: &[TrackRecord]) -> Result<Self> {
        if tracks.is_empty() {
            return Err(MoodSpaceError::EmptyCatalog);
        }

        let points: Vec<VaPoint> = tracks.iter().map(|t| project(&t.features)).collect();
        let labels: Vec<Mood> = tracks
            .iter()
            .zip(points.iter())
            .map(|(t, p)| weak_label(&t.features, *p))
            .collect();

        let mut by_mood: BTreeMap<Mood, Vec<VaPoint>> = BTreeMap::new();
        let mut by_genre: HashMap<(Mood, String), Vec<VaPoint>> = HashMap::new();
        for ((track, point), label) in tracks.iter().zip(points.iter()).zip(labels.iter()) {
            by_mood.entry(*label).or_default().push(*point);
            if let Some(token) = genre_token(&track.genre) {
                by_genre.entry((*label, token)).or_default().push(*point);
            }
        }

        let mut global = BTreeMap::new();
        for mood in Mood::ALL {
            let members = by_mood.get(&mood).map(Vec::as_slice).unwrap_or(&[]);
            let proto = match GaussianPrototype::fit(members, config.variance_floor) {
                Some(p) => p,
                None => {
                    debug!(mood = %mood, members = members.len(), "Using default prototype");
                    GaussianPrototype::default_for(mood, config.default_variance)
                }
            };
            global.insert(mood, proto);
        }

        let genre: HashMap<(Mood, String), GaussianPrototype> = by_genre
            .into_iter()
            .filter(|(_, pts)| pts.len() >= config.min_genre_members.max(2))
            .filter_map(|(key, pts)| {
                GaussianPrototype::fit(&pts, config.variance_floor).map(|p| (key, p))
            })
            .collect();

        let prototypes = PrototypeSet::with_prototypes(
            global,
            genre,
            config.default_variance,
            config.min_genre_members,
            config.intensity_threshold,
        );

        let mut songs = Vec::with_capacity(tracks.len());
        let mut index = HashMap::with_capacity(tracks.len());
        for (track, point) in tracks.iter().zip(points.into_iter()) {
            let token = genre_token(&track.genre);
            let classification = prototypes.classify(point, token.as_deref());
            if !classification.confidence.is_finite() {
                return Err(MoodSpaceError::Computation(format!(
                    "non-finite confidence for track {}",
                    track.id
                )));
            }

            if let Some(&existing) = index.get(&track.id) {
                warn!(song_id = %track.id, "Duplicate track id in catalog, keeping last");
                songs[existing] = to_song(track, point, &classification);
                continue;
            }
            index.insert(track.id.clone(), songs.len());
            songs.push(to_song(track, point, &classification));
        }

        Ok(Self {
            prototypes,
            catalog_size: tracks.len(),
            songs,
            fitted_at: Utc::now(),
            index,
        })
    }
}

fn to_song(track: &TrackRecord, va: VaPoint, c: &MoodClassification) -> Song {
    Song {
        id: track.id.clone(),
        title: track.title.clone(),
        artist: track.artist.clone(),
        genre: track.genre.clone(),
        features: track.features.clone(),
        popularity: track.popularity.clone(),
        va,
        mood: c.mood,
        intensity: c.intensity,
        confidence: c.confidence,
    }
}

/// Owner of the current snapshot
pub struct MoodVectorSpace {
    config: MoodSpaceConfig,
    current: RwLock<Arc<MoodSpaceSnapshot>>,
    fitted: AtomicBool,
    refitting: AtomicBool,
}

impl MoodVectorSpace {
    pub fn new(config: MoodSpaceConfig) -> Self {
        let empty = MoodSpaceSnapshot::unfitted(&config);
        Self {
            config,
            current: RwLock::new(Arc::new(empty)),
            fitted: AtomicBool::new(false),
            refitting: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> Arc<MoodSpaceSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.load(Ordering::Acquire)
    }

    /// Unconditionally fit and publish a new snapshot
    pub fn fit(&self, tracks: &[TrackRecord]) -> Result<Arc<MoodSpaceSnapshot>> {
        let snapshot = Arc::new(MoodSpaceSnapshot::build(&self.config, tracks)?);

        match self.current.write() {
            Ok(mut guard) => *guard = Arc::clone(&snapshot),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&snapshot),
        }
        self.fitted.store(true, Ordering::Release);

        info!(
            songs = snapshot.songs.len(),
            genre_prototypes = snapshot.prototypes.genre.len(),
            "Mood space fitted"
        );
        Ok(snapshot)
    }

    /// Whether a catalog of `catalog_size` tracks has drifted past the tolerance
    pub fn needs_refit(&self, catalog_size: usize) -> bool {
        if !self.is_fitted() {
            return catalog_size > 0;
        }
        let last = self.snapshot().catalog_size;
        if last == 0 {
            return catalog_size > 0;
        }
        let drift = (catalog_size as f64 - last as f64).abs() / last as f64;
        drift > self.config.refit_tolerance
    }

    /// Refit if needed, otherwise return the current snapshot.
    ///
    /// Only one caller refits at a time; concurrent callers keep reading the
    /// previous snapshot.
    pub fn ensure_fresh(&self, tracks: &[TrackRecord]) -> Result<Arc<MoodSpaceSnapshot>> {
        if !self.needs_refit(tracks.len()) {
            return Ok(self.snapshot());
        }

        if self
            .refitting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Refit already in progress, serving current snapshot");
            return Ok(self.snapshot());
        }

        let result = self.fit(tracks);
        self.refitting.store(false, Ordering::Release);
        result
    }

    /// Classify raw features against the current prototypes
    pub fn classify(&self, features: &AudioFeatures, genre: &str) -> MoodClassification {
        let token = genre_token(genre);
        self.snapshot()
            .prototypes
            .classify(project(features), token.as_deref())
    }

    pub fn classify_point(&self, point: VaPoint) -> MoodClassification {
        self.snapshot().classify_point(point)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::PopularityStats;

    pub(crate) fn track(id: &str, artist: &str, genre: &str, h: f64, e: f64, a: f64) -> TrackRecord {
        TrackRecord {
            id: id.to_string(),
            title: format!("Title {}", id),
            artist: artist.to_string(),
            genre: genre.to_string(),
            features: AudioFeatures {
                happiness: h,
                danceability: h,
                energy: e,
                tempo: 60.0 + 140.0 * e,
                loudness: -60.0 + 60.0 * e,
                acousticness: a,
            },
            popularity: PopularityStats::default(),
        }
    }

    fn sample_catalog() -> Vec<TrackRecord> {
        vec![
            track("s1", "a1", "pop", 0.9, 0.9, 0.1),
            track("s2", "a2", "pop", 0.85, 0.8, 0.1),
            track("s3", "a3", "folk", 0.1, 0.1, 0.9),
            track("s4", "a4", "folk", 0.15, 0.15, 0.8),
            track("s5", "a5", "jazz", 0.8, 0.2, 0.9),
            track("s6", "a6", "jazz", 0.75, 0.25, 0.8),
            track("s7", "a7", "metal", 0.1, 1.0, 0.0),
            track("s8", "a8", "metal", 0.05, 0.95, 0.0),
        ]
    }

    #[test]
    fn test_projection_stays_in_bounds() {
        for t in sample_catalog() {
            let p = project(&t.features);
            assert!((-1.0..=1.0).contains(&p.valence));
            assert!((-1.0..=1.0).contains(&p.arousal));
        }
    }

    #[test]
    fn test_weak_labels() {
        let loud_fast_dark = track("x", "a", "metal", 0.05, 1.0, 0.0);
        let va = project(&loud_fast_dark.features);
        assert_eq!(weak_label(&loud_fast_dark.features, va), Mood::Angry);

        let quiet_sad = track("y", "a", "folk", 0.1, 0.1, 0.9);
        let va = project(&quiet_sad.features);
        assert_eq!(weak_label(&quiet_sad.features, va), Mood::Sad);
    }

    #[test]
    fn test_genre_token() {
        assert_eq!(genre_token("Indie Rock").as_deref(), Some("indie"));
        assert_eq!(genre_token("  hip-hop").as_deref(), Some("hip"));
        assert_eq!(genre_token("---"), None);
    }

    #[test]
    fn test_fit_classifies_every_song() {
        let space = MoodVectorSpace::new(MoodSpaceConfig::default());
        let snapshot = space.fit(&sample_catalog()).unwrap();

        assert_eq!(snapshot.songs.len(), 8);
        for song in &snapshot.songs {
            assert!((-1.0..=1.0).contains(&song.va.valence));
            assert!(song.confidence > 0.0 && song.confidence <= 1.0);
        }
        assert_eq!(snapshot.song("s3").map(|s| s.mood), Some(Mood::Sad));
    }

    #[test]
    fn test_classify_matches_fitted_songs() {
        let space = MoodVectorSpace::new(MoodSpaceConfig::default());
        let snapshot = space.fit(&sample_catalog()).unwrap();

        let late = track("s9", "a9", "folk", 0.1, 0.1, 0.9);
        let classification = space.classify(&late.features, &late.genre);
        assert_eq!(Some(classification.mood), snapshot.song("s3").map(|s| s.mood));
        assert_eq!(classification.mood, Mood::Sad);
        let total: f64 = classification.probabilities.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_catalog_is_an_error() {
        let space = MoodVectorSpace::new(MoodSpaceConfig::default());
        assert!(matches!(space.fit(&[]), Err(MoodSpaceError::EmptyCatalog)));
        assert!(!space.is_fitted());
    }

    #[test]
    fn test_refit_tolerance() {
        let space = MoodVectorSpace::new(MoodSpaceConfig::default());
        let mut catalog = sample_catalog();
        assert!(space.needs_refit(catalog.len()));
        space.ensure_fresh(&catalog).unwrap();
        assert!(!space.needs_refit(catalog.len()));

        // 1/8 = 12.5% growth crosses the 10% tolerance
        catalog.push(track("s9", "a9", "pop", 0.7, 0.6, 0.2));
        assert!(space.needs_refit(catalog.len()));
        let refreshed = space.ensure_fresh(&catalog).unwrap();
        assert_eq!(refreshed.catalog_size, 9);
    }

    #[test]
    fn test_old_snapshot_survives_refit() {
        let space = MoodVectorSpace::new(MoodSpaceConfig::default());
        let catalog = sample_catalog();
        let before = space.fit(&catalog[..4]).unwrap();
        space.fit(&catalog).unwrap();

        assert_eq!(before.songs.len(), 4);
        assert_eq!(space.snapshot().songs.len(), 8);
    }
}
