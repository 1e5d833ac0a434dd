// Explanation templates, keyed by the listener's mood and the credited strategy

use crate::models::{Mood, Song};

pub const POPULARITY_LABEL: &str = "popularity";
pub const MOOD_CLUSTER_LABEL: &str = "mood_cluster";

fn mood_phrase(mood: Mood) -> &'static str {
    match mood {
        Mood::Happy => "keeps the good mood going",
        Mood::Energetic => "matches your energy",
        Mood::Calm => "keeps things calm",
        Mood::Sad => "sits with you in a low moment",
        Mood::Tense => "fits the tension you're feeling",
        Mood::Angry => "lets you blow off some steam",
    }
}

pub fn explain(label: &str, mood: Option<Mood>, song: &Song, uplift: bool) -> String {
    let intensity = song.intensity.as_str();

    match (label, mood) {
        ("emotion", Some(_)) if uplift && song.mood.is_positive() => format!(
            "A {} {} track to gently lift your mood",
            intensity, song.mood
        ),
        ("emotion", Some(m)) if song.mood == m => {
            format!("A {} {} track that {}", intensity, song.mood, mood_phrase(m))
        }
        ("emotion", Some(m)) => format!(
            "Close to how you feel right now ({} rather than {})",
            song.mood, m
        ),
        ("emotion", None) => format!("A {} {} track", intensity, song.mood),
        ("content", _) => format!("Sounds like songs you've liked, by {}", song.artist),
        ("collaborative", Some(m)) => format!(
            "Liked by listeners with similar taste when they felt {}",
            m
        ),
        ("collaborative", None) => "Liked by listeners with similar taste".to_string(),
        ("diversity", _) => format!("Something different: {} from {}", song.genre, song.artist),
        ("exploration", _) => format!("A fresh {} pick you may not have heard", song.genre),
        (MOOD_CLUSTER_LABEL, Some(m)) => {
            format!("A well-loved {} track for a {} mood", intensity, m)
        }
        (POPULARITY_LABEL, Some(m)) => {
            format!("Popular with listeners right now, and {}", mood_phrase(m))
        }
        _ => "Popular with listeners right now".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::strategies::tests::song;

    #[test]
    fn test_templates_depend_on_mood_and_strategy() {
        let sad = song("s", Mood::Sad, (-0.6, -0.5));
        let text = explain("emotion", Some(Mood::Sad), &sad, false);
        assert!(text.contains("low moment"));

        let calm = song("c", Mood::Calm, (0.4, -0.4));
        let lifted = explain("emotion", Some(Mood::Sad), &calm, true);
        assert!(lifted.contains("lift"));

        assert_eq!(
            explain(POPULARITY_LABEL, None, &sad, false),
            "Popular with listeners right now"
        );
    }
}
