use crate::models::{Intensity, Mood};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Coarse bundle extracted from one conversation message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMood {
    pub mood: Option<Mood>,
    pub intensity: Option<Intensity>,
    pub entities: Vec<String>,
}

/// Text -> {mood, intensity, entities}
pub trait MoodExtractor: Send + Sync {
    fn extract(&self, text: &str) -> ExtractedMood;
}

const NEGATIONS: &[&str] = &["not", "no", "never", "dont", "don't", "isnt", "isn't"];
const AMPLIFIERS: &[&str] = &["very", "really", "so", "extremely", "super", "totally"];
const SOFTENERS: &[&str] = &["bit", "slightly", "little", "kinda", "somewhat"];

const ENTITY_WORDS: &[&str] = &[
    "rock", "pop", "jazz", "folk", "metal", "classical", "hiphop", "rap", "electronic",
    "house", "techno", "indie", "blues", "soul", "country", "ambient", "workout", "study",
    "sleep", "party", "driving", "running", "focus", "morning", "night", "rain",
];

/// Keyword lexicon extractor. No parsing beyond word matching and one-word negation.
#[derive(Debug, Clone, Default)]
pub struct LexiconMoodExtractor;

impl LexiconMoodExtractor {
    pub fn new() -> Self {
        Self
    }

    fn mood_of(word: &str) -> Option<Mood> {
        if let Ok(mood) = word.parse::<Mood>() {
            return Some(mood);
        }
        match word {
            "great" | "good" | "glad" | "awesome" | "amazing" => Some(Mood::Happy),
            "energized" | "motivated" | "dance" | "dancing" => Some(Mood::Energetic),
            "tired" | "sleepy" | "mellow" | "quiet" => Some(Mood::Calm),
            "lonely" | "depressed" | "heartbroken" | "crying" | "unhappy" => Some(Mood::Sad),
            "worried" | "overwhelmed" | "restless" | "panicking" => Some(Mood::Tense),
            "annoyed" | "frustrated" | "pissed" | "rage" => Some(Mood::Angry),
            _ => None,
        }
    }
}

impl MoodExtractor for LexiconMoodExtractor {
    fn extract(&self, text: &str) -> ExtractedMood {
        let words: Vec<String> = text
            .split(|c: char| !(c.is_alphanumeric() || c == '\''))
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();

        let mut tally: BTreeMap<Mood, usize> = BTreeMap::new();
        let mut amplified = false;
        let mut softened = false;
        let mut entities = Vec::new();

        for (i, word) in words.iter().enumerate() {
            let negated = i > 0 && NEGATIONS.contains(&words[i - 1].as_str());

            if let Some(mood) = Self::mood_of(word) {
                if !negated {
                    *tally.entry(mood).or_default() += 1;
                }
                continue;
            }
            if AMPLIFIERS.contains(&word.as_str()) {
                amplified = true;
            } else if SOFTENERS.contains(&word.as_str()) {
                softened = true;
            } else if ENTITY_WORDS.contains(&word.as_str()) && !entities.contains(word) {
                entities.push(word.clone());
            }
        }

        // Highest count wins; BTreeMap order breaks ties deterministically
        let mood = tally
            .iter()
            .fold(None, |best: Option<(Mood, usize)>, (m, c)| match best {
                Some((_, bc)) if bc >= *c => best,
                _ => Some((*m, *c)),
            })
            .map(|(m, _)| m);

        let intensity = mood.map(|_| {
            if amplified {
                Intensity::High
            } else if softened {
                Intensity::Low
            } else {
                Intensity::Medium
            }
        });

        ExtractedMood {
            mood,
            intensity,
            entities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_mood_and_intensity() {
        let extractor = LexiconMoodExtractor::new();
        let out = extractor.extract("I'm feeling really down today, maybe some jazz?");
        assert_eq!(out.mood, Some(Mood::Sad));
        assert_eq!(out.intensity, Some(Intensity::High));
        assert_eq!(out.entities, vec!["jazz".to_string()]);
    }

    #[test]
    fn test_negation_is_ignored() {
        let extractor = LexiconMoodExtractor::new();
        let out = extractor.extract("not happy, a bit anxious");
        assert_eq!(out.mood, Some(Mood::Tense));
        assert_eq!(out.intensity, Some(Intensity::Low));
    }

    #[test]
    fn test_no_mood_words() {
        let extractor = LexiconMoodExtractor::new();
        let out = extractor.extract("play something for my workout");
        assert_eq!(out.mood, None);
        assert_eq!(out.intensity, None);
        assert_eq!(out.entities, vec!["workout".to_string()]);
    }
}
