use mood_ranking_service::models::{AudioFeatures, PopularityStats, TrackRecord};
use mood_ranking_service::services::ranking::{MOOD_CLUSTER_LABEL, POPULARITY_LABEL};
use mood_ranking_service::services::trajectory::TrajectoryTrend;
use mood_ranking_service::{
    Config, FeedbackRequest, InMemoryCatalog, Mood, RecommendationEngine, RecommendationRequest,
};
use std::sync::Arc;

const GENRES: [&str; 4] = ["pop", "rock", "jazz", "folk"];

fn track(id: &str, artist: &str, genre: &str, h: f64, e: f64, a: f64, likes: u32) -> TrackRecord {
    TrackRecord {
        id: id.to_string(),
        title: format!("Song {}", id),
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
        popularity: PopularityStats {
            likes,
            ..Default::default()
        },
    }
}

/// 24 tracks over 6 artists and 4 genres spread across the VA plane
fn catalog() -> Vec<TrackRecord> {
    (0..24)
        .map(|i| {
            let h = 0.05 + 0.9 * (i % 6) as f64 / 5.0;
            let e = ((i * 7) % 10) as f64 / 10.0;
            let a = ((i * 3) % 10) as f64 / 10.0;
            track(
                &format!("s{:02}", i),
                &format!("artist-{}", i % 6),
                GENRES[i % 4],
                h,
                e,
                a,
                ((i * 5) % 17) as u32,
            )
        })
        .collect()
}

/// One track per weak label, so every mood keeps its default prototype
fn sparse_catalog() -> Vec<TrackRecord> {
    vec![
        track("energetic", "a1", "pop", 0.9, 0.9, 0.1, 3),
        track("happy", "a2", "rock", 0.8, 0.6, 0.2, 2),
        track("calm", "a3", "jazz", 0.7, 0.1, 0.9, 1),
        track("sad", "a4", "folk", 0.1, 0.1, 0.9, 4),
        track("tense", "a5", "metal", 0.2, 0.6, 0.1, 0),
    ]
}

/// Tight clusters per mood; high play counts keep the exploration score low
fn mood_clusters() -> Vec<TrackRecord> {
    let mut tracks = Vec::new();
    for i in 0..6 {
        let f = i as f64 * 0.01;
        tracks.push(track(&format!("happy{}", i), &format!("h{}", i), GENRES[i % 4], 0.78 + f, 0.58 + f, 0.2, 2));
    }
    for i in 0..4 {
        let f = i as f64 * 0.01;
        tracks.push(track(&format!("energetic{}", i), &format!("e{}", i), GENRES[i], 0.9 - f, 0.95 - f, 0.05, 2));
        tracks.push(track(&format!("calm{}", i), &format!("c{}", i), GENRES[i], 0.7 + f, 0.1 + f, 0.9, 2));
        tracks.push(track(&format!("sad{}", i), &format!("s{}", i), GENRES[i], 0.1 + f, 0.1 + f, 0.9, 2));
    }
    for t in &mut tracks {
        t.popularity.plays = 1_000;
    }
    tracks
}

fn engine_with(tracks: Vec<TrackRecord>) -> RecommendationEngine {
    RecommendationEngine::new(Config::default(), Arc::new(InMemoryCatalog::new(tracks)))
}

#[tokio::test]
async fn test_cold_start_sad_user() {
    let engine = engine_with(catalog());
    let response = engine
        .recommend(
            RecommendationRequest::new("new-user")
                .with_mood("sad")
                .with_limit(5)
                .with_seed(7),
        )
        .await
        .unwrap();

    assert!(response.cold_start_active);
    assert_eq!(response.personalization_weight, 0.0);
    assert_eq!(response.recommendations.len(), 5);
    assert!(response
        .recommendations
        .iter()
        .all(|r| r.strategy_label == MOOD_CLUSTER_LABEL || r.strategy_label == POPULARITY_LABEL));
    assert!(response
        .recommendations
        .iter()
        .any(|r| r.strategy_label == MOOD_CLUSTER_LABEL));
    for share in response.strategy_blend_used.values() {
        assert!((share - 0.2).abs() < 1e-9);
    }

    // The bandit is never consulted while cold
    assert_eq!(engine.bandit_selections(), 0);
    let no_arms = engine
        .store()
        .read("new-user", |s| s.arms.is_none())
        .await;
    assert_eq!(no_arms, Some(true));
}

#[tokio::test]
async fn test_happy_likes_credit_emotion_arm() {
    let engine = engine_with(mood_clusters());
    let response = engine
        .recommend(RecommendationRequest::new("u1").with_mood("happy").with_limit(12))
        .await
        .unwrap();

    let snapshot = engine.mood_space().snapshot();
    let happy: Vec<String> = response
        .recommendations
        .iter()
        .filter(|r| snapshot.song(&r.song_id).map(|s| s.mood) == Some(Mood::Happy))
        .map(|r| r.song_id.clone())
        .take(3)
        .collect();
    assert_eq!(happy.len(), 3);

    let before = engine.session_status("u1", None).await.unwrap();
    let emotion_before = before
        .bandit_posteriors
        .get("emotion")
        .copied()
        .unwrap_or_default();
    let mut mood_match = before.weights["mood_match"];

    for song_id in &happy {
        let ack = engine
            .submit_feedback(FeedbackRequest::new("u1", song_id, "like"))
            .await
            .unwrap();
        assert!(ack.accepted);
        assert_eq!(ack.reward_applied, Some(1.0));
        engine.flush_feedback("u1").await.unwrap();

        let status = engine.session_status("u1", None).await.unwrap();
        let weight = status.weights["mood_match"];
        assert!(weight >= mood_match, "mood_match fell to {}", weight);
        mood_match = weight;
    }

    let after = engine.session_status("u1", None).await.unwrap();
    assert_eq!(after.feedback_count, 3);
    let emotion_after = after.bandit_posteriors["emotion"];
    assert!(emotion_after.alpha > emotion_before.alpha);
    assert_eq!(emotion_after.beta, emotion_before.beta);
    assert!(mood_match > 1.0);
}

#[tokio::test]
async fn test_top_window_spreads_artists() {
    let engine = engine_with(catalog());
    for mood in ["happy", "sad", "calm", "energetic"] {
        let response = engine
            .recommend(RecommendationRequest::new("u2").with_mood(mood).with_limit(10))
            .await
            .unwrap();
        let top: Vec<&str> = response
            .recommendations
            .iter()
            .take(5)
            .map(|r| r.artist.as_str())
            .collect();
        for pair in top.windows(2) {
            assert_ne!(pair[0], pair[1], "adjacent artists for mood {}", mood);
        }
    }
}

#[tokio::test]
async fn test_declining_mood_triggers_uplift() {
    let engine = engine_with(sparse_catalog());
    let mut last = None;
    for mood in ["happy", "calm", "tense", "sad"] {
        let response = engine
            .recommend(
                RecommendationRequest::new("u3")
                    .with_session("evening")
                    .with_mood(mood)
                    .with_limit(3),
            )
            .await
            .unwrap();
        last = response.emotional_trajectory;
    }

    let trajectory = last.unwrap();
    assert_eq!(trajectory.points, 4);
    assert_eq!(trajectory.trend, TrajectoryTrend::Declining);
    assert!(trajectory.should_intervene);
}

#[tokio::test]
async fn test_improving_mood_does_not_intervene() {
    let engine = engine_with(sparse_catalog());
    let mut last = None;
    for mood in ["sad", "tense", "calm", "happy"] {
        let response = engine
            .recommend(
                RecommendationRequest::new("u4")
                    .with_session("morning")
                    .with_mood(mood)
                    .with_limit(3),
            )
            .await
            .unwrap();
        last = response.emotional_trajectory;
    }

    let trajectory = last.unwrap();
    assert_eq!(trajectory.trend, TrajectoryTrend::Improving);
    assert!(!trajectory.should_intervene);
}

#[tokio::test]
async fn test_trajectory_can_be_disabled() {
    let engine = engine_with(sparse_catalog());
    let mut request = RecommendationRequest::new("u5").with_mood("sad").with_limit(2);
    request.options.use_trajectory = false;
    let response = engine.recommend(request).await.unwrap();
    assert!(response.emotional_trajectory.is_none());
}

#[tokio::test]
async fn test_personalization_ramps_with_feedback() {
    let engine = engine_with(catalog());
    for i in 0..15 {
        engine
            .submit_feedback(FeedbackRequest::new("u6", format!("s{:02}", i % 24), "play"))
            .await
            .unwrap();
    }
    engine.flush_feedback("u6").await.unwrap();

    let response = engine
        .recommend(RecommendationRequest::new("u6").with_mood("happy").with_seed(3))
        .await
        .unwrap();
    assert!(!response.cold_start_active);
    assert!((response.personalization_weight - 0.5).abs() < 1e-9);
    assert_eq!(engine.bandit_selections(), 1);
    let total: f64 = response.strategy_blend_used.values().sum();
    assert!((total - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_weights_stay_bounded() {
    let engine = engine_with(catalog());
    let response = engine
        .recommend(RecommendationRequest::new("u7").with_mood("energetic").with_limit(4))
        .await
        .unwrap();

    for round in 0..40 {
        for (i, rec) in response.recommendations.iter().enumerate() {
            let kind = if (round + i) % 2 == 0 { "love" } else { "dislike" };
            engine
                .submit_feedback(FeedbackRequest::new("u7", &rec.song_id, kind))
                .await
                .unwrap();
        }
    }
    engine.flush_feedback("u7").await.unwrap();

    let status = engine.session_status("u7", None).await.unwrap();
    for (name, value) in &status.weights {
        assert!((0.1..=2.0).contains(value), "{} = {}", name, value);
    }
}

#[tokio::test]
async fn test_close_session_settles_once() {
    let engine = engine_with(catalog());
    let response = engine
        .recommend(RecommendationRequest::new("u8").with_session("sess").with_mood("calm"))
        .await
        .unwrap();
    let first = &response.recommendations[0].song_id;
    engine
        .submit_feedback(
            FeedbackRequest::new("u8", first, "play")
                .with_session("sess")
                .with_durations(180.0, 200.0),
        )
        .await
        .unwrap();
    engine
        .submit_feedback(FeedbackRequest::new("u8", first, "like").with_session("sess"))
        .await
        .unwrap();

    let reward = engine
        .close_session("u8", Some("sess"))
        .await
        .unwrap()
        .unwrap();
    assert!((0.0..=1.0).contains(&reward.total));
    assert!(reward.satisfaction > 0.5);

    assert!(engine.close_session("u8", Some("sess")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_explanations_follow_request_option() {
    let engine = engine_with(catalog());
    let with = engine
        .recommend(RecommendationRequest::new("u9").with_mood("sad").with_limit(3))
        .await
        .unwrap();
    assert!(with.recommendations.iter().all(|r| r.explanation.is_some()));

    let mut request = RecommendationRequest::new("u9").with_mood("sad").with_limit(3);
    request.options.explain = false;
    let without = engine.recommend(request).await.unwrap();
    assert!(without.recommendations.iter().all(|r| r.explanation.is_none()));
}

#[tokio::test]
async fn test_message_text_sets_mood() {
    let engine = engine_with(catalog());
    engine
        .recommend(
            RecommendationRequest::new("u10")
                .with_message("I feel really sad tonight")
                .with_limit(3),
        )
        .await
        .unwrap();

    let status = engine.session_status("u10", None).await.unwrap();
    let context = status.context.unwrap();
    assert_eq!(context.turn_count, 1);
    assert_eq!(
        context.dominant_mood,
        Some(Mood::Sad)
    );
}
