pub mod api;

pub use api::{
    FeedbackAck, FeedbackRequest, RecommendationOptions, RecommendationRequest,
    RecommendationResponse, RecommendedSong, SessionStatus,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Coarse emotional category shared by songs, conversation turns and targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Happy,
    Energetic,
    Calm,
    Sad,
    Tense,
    Angry,
}

impl Mood {
    pub const ALL: [Mood; 6] = [
        Mood::Happy,
        Mood::Energetic,
        Mood::Calm,
        Mood::Sad,
        Mood::Tense,
        Mood::Angry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Happy => "happy",
            Mood::Energetic => "energetic",
            Mood::Calm => "calm",
            Mood::Sad => "sad",
            Mood::Tense => "tense",
            Mood::Angry => "angry",
        }
    }

    /// Moods that count as an "uplift" destination
    pub fn is_positive(&self) -> bool {
        matches!(self, Mood::Happy | Mood::Energetic | Mood::Calm)
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mood {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "happy" | "joyful" | "cheerful" | "upbeat" => Ok(Mood::Happy),
            "energetic" | "excited" | "hyped" | "pumped" => Ok(Mood::Energetic),
            "calm" | "relaxed" | "chill" | "peaceful" => Ok(Mood::Calm),
            "sad" | "down" | "melancholy" | "blue" => Ok(Mood::Sad),
            "tense" | "anxious" | "stressed" | "nervous" => Ok(Mood::Tense),
            "angry" | "mad" | "furious" => Ok(Mood::Angry),
            other => Err(format!("unknown mood: {}", other)),
        }
    }
}

/// Point in Valence-Arousal space, always inside [-1, 1]²
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VaPoint {
    pub valence: f64,
    pub arousal: f64,
}

impl VaPoint {
    pub fn new(valence: f64, arousal: f64) -> Self {
        Self {
            valence: clamp_axis(valence),
            arousal: clamp_axis(arousal),
        }
    }

    pub fn distance(&self, other: &VaPoint) -> f64 {
        let dv = self.valence - other.valence;
        let da = self.arousal - other.arousal;
        (dv * dv + da * da).sqrt()
    }
}

fn clamp_axis(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Intensity bucket (1-3) derived from arousal magnitude
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Intensity {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Intensity {
    pub fn level(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intensity::Low => "gentle",
            Intensity::Medium => "steady",
            Intensity::High => "intense",
        }
    }
}

/// Raw audio descriptors as delivered by the catalog
///
/// `tempo` is in BPM and `loudness` in dBFS; every other field is in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub happiness: f64,
    pub danceability: f64,
    pub energy: f64,
    pub tempo: f64,
    pub loudness: f64,
    pub acousticness: f64,
}

impl AudioFeatures {
    pub const VECTOR_LEN: usize = 6;

    /// (bpm - 60) / 140, clamped to [0, 1]
    pub fn tempo_normalized(&self) -> f64 {
        unit((self.tempo - 60.0) / 140.0)
    }

    /// (dB + 60) / 60, clamped to [0, 1]
    pub fn loudness_normalized(&self) -> f64 {
        unit((self.loudness + 60.0) / 60.0)
    }

    /// Fixed feature order: happiness, danceability, energy, tempo, loudness, acousticness
    pub fn to_vector(&self) -> [f64; Self::VECTOR_LEN] {
        [
            unit(self.happiness),
            unit(self.danceability),
            unit(self.energy),
            self.tempo_normalized(),
            self.loudness_normalized(),
            unit(self.acousticness),
        ]
    }
}

fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Aggregate feedback counters kept by the catalog for each track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PopularityStats {
    pub likes: u32,
    pub dislikes: u32,
    pub plays: u64,
    pub last_liked_at: Option<DateTime<Utc>>,
}

/// Catalog row before classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRecord {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub genre: String,
    pub features: AudioFeatures,
    #[serde(default)]
    pub popularity: PopularityStats,
}

/// Classified song; recomputed only when the mood space is refit
#[derive(Debug, Clone, Serialize)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub genre: String,
    pub features: AudioFeatures,
    pub popularity: PopularityStats,
    pub va: VaPoint,
    pub mood: Mood,
    pub intensity: Intensity,
    pub confidence: f64,
}

impl Song {
    pub fn feature_vector(&self) -> [f64; AudioFeatures::VECTOR_LEN] {
        self.features.to_vector()
    }
}

/// Candidate scoring strategies; each one is also a bandit arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Emotion,
    Content,
    Collaborative,
    Diversity,
    Exploration,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::Emotion,
        StrategyKind::Content,
        StrategyKind::Collaborative,
        StrategyKind::Diversity,
        StrategyKind::Exploration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Emotion => "emotion",
            StrategyKind::Content => "content",
            StrategyKind::Collaborative => "collaborative",
            StrategyKind::Diversity => "diversity",
            StrategyKind::Exploration => "exploration",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            StrategyKind::Emotion => 0,
            StrategyKind::Content => 1,
            StrategyKind::Collaborative => 2,
            StrategyKind::Diversity => 3,
            StrategyKind::Exploration => 4,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of user feedback on a song
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Like,
    Love,
    Dislike,
    Skip,
    Play,
    Complete,
    Revisit,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackKind::Like => "like",
            FeedbackKind::Love => "love",
            FeedbackKind::Dislike => "dislike",
            FeedbackKind::Skip => "skip",
            FeedbackKind::Play => "play",
            FeedbackKind::Complete => "complete",
            FeedbackKind::Revisit => "revisit",
        }
    }

    /// Explicit approval (counts as a "like" for taste profiles and rewards)
    pub fn is_approval(&self) -> bool {
        matches!(self, FeedbackKind::Like | FeedbackKind::Love)
    }

    /// Any kind that implies the song was actually listened to
    pub fn is_listen(&self) -> bool {
        matches!(
            self,
            FeedbackKind::Play | FeedbackKind::Complete | FeedbackKind::Revisit
        )
    }
}

impl FromStr for FeedbackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "play-duration", "play duration" and "play_duration" are one kind
        let normalized = s
            .trim()
            .to_lowercase()
            .replace(|c: char| c == '-' || c == ' ', "_");
        match normalized.as_str() {
            "like" => Ok(FeedbackKind::Like),
            "love" | "loved" => Ok(FeedbackKind::Love),
            "dislike" => Ok(FeedbackKind::Dislike),
            "skip" => Ok(FeedbackKind::Skip),
            "play" | "play_duration" => Ok(FeedbackKind::Play),
            "complete" | "complete_listen" => Ok(FeedbackKind::Complete),
            "revisit" => Ok(FeedbackKind::Revisit),
            other => Err(format!("unknown feedback kind: {}", other)),
        }
    }
}

/// What produced a served song, frozen at recommendation time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Strategy credited with the recommendation (the bandit arm to update)
    pub strategy: StrategyKind,
    pub mood: Option<Mood>,
    /// Personalization feature name -> contribution in [0, 1]
    pub contributions: BTreeMap<String, f64>,
}

impl ContextSnapshot {
    /// Snapshot for feedback on a song that was never served by the engine
    pub fn unattributed(mood: Option<Mood>) -> Self {
        Self {
            strategy: StrategyKind::Emotion,
            mood,
            contributions: BTreeMap::new(),
        }
    }
}

/// Immutable feedback event; consumed once by the online learner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub user_id: String,
    pub song_id: String,
    pub session_id: Option<String>,
    pub kind: FeedbackKind,
    /// play_duration / song_duration when both were supplied
    pub listen_fraction: Option<f64>,
    pub context: ContextSnapshot,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_va_point_is_clamped() {
        let p = VaPoint::new(1.7, -3.0);
        assert_eq!(p.valence, 1.0);
        assert_eq!(p.arousal, -1.0);

        let nan = VaPoint::new(f64::NAN, 0.2);
        assert_eq!(nan.valence, 0.0);
    }

    #[test]
    fn test_mood_synonyms() {
        assert_eq!("Chill".parse::<Mood>().unwrap(), Mood::Calm);
        assert_eq!(" sad ".parse::<Mood>().unwrap(), Mood::Sad);
        assert!("purple".parse::<Mood>().is_err());
    }

    #[test]
    fn test_feature_vector_normalization() {
        let features = AudioFeatures {
            happiness: 0.5,
            danceability: 1.4,
            energy: 0.2,
            tempo: 200.0,
            loudness: -30.0,
            acousticness: 0.0,
        };
        let v = features.to_vector();
        assert_eq!(v[1], 1.0);
        assert!((v[3] - 1.0).abs() < 1e-9);
        assert!((v[4] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_feedback_kind_parse() {
        assert_eq!("LOVE".parse::<FeedbackKind>().unwrap(), FeedbackKind::Love);
        assert!(FeedbackKind::Love.is_approval());
        assert!(FeedbackKind::Revisit.is_listen());
        assert!("meh".parse::<FeedbackKind>().is_err());
        for spelling in ["play-duration", "play_duration", "Play Duration"] {
            assert_eq!(spelling.parse::<FeedbackKind>().unwrap(), FeedbackKind::Play);
        }
    }
}
