// ============================================
// Cold Start Gate
// ============================================
//
// Users with fewer than `threshold` lifetime feedback events bypass the
// bandit. Their candidates are ranked by fallbacks instead:
//
// - PopularityBaseline: (likes - 0.5 * dislikes) * exp(-days_since_last_like / decay_days)
// - MoodClusterBootstrap: songs within a VA radius of the target centroid,
//   ordered by greedy maximin so the first picks spread across the cluster
// - HybridFallback: interleave of the two at `hybrid_cluster_ratio`
//
// Personalization ramps in linearly: pw = min(1, feedback_count / full_at)

use crate::config::ColdStartConfig;
use crate::models::{PopularityStats, Song, VaPoint};
use crate::utils::exponential_decay;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Which fallback placed a song in the hybrid list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackSource {
    MoodCluster,
    Popularity,
}

impl FallbackSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackSource::MoodCluster => "mood_cluster",
            FallbackSource::Popularity => "popularity",
        }
    }
}

/// Ordered fallback list with per-song position scores
#[derive(Debug, Clone, Default)]
pub struct FallbackRanking {
    order: Vec<(String, FallbackSource)>,
    positions: HashMap<String, usize>,
}

impl FallbackRanking {
    fn from_order(order: Vec<(String, FallbackSource)>) -> Self {
        let positions = order
            .iter()
            .enumerate()
            .map(|(i, (id, _))| (id.clone(), i))
            .collect();
        Self { order, positions }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|(id, _)| id.as_str())
    }

    /// `1 - rank / len`; songs missing from the list score 0
    pub fn score(&self, song_id: &str) -> f64 {
        match self.positions.get(song_id) {
            Some(&rank) => 1.0 - rank as f64 / self.order.len() as f64,
            None => 0.0,
        }
    }

    pub fn source(&self, song_id: &str) -> Option<FallbackSource> {
        self.positions.get(song_id).map(|&i| self.order[i].1)
    }
}

pub struct ColdStartGate {
    config: ColdStartConfig,
}

impl ColdStartGate {
    pub fn new(config: ColdStartConfig) -> Self {
        Self { config }
    }

    pub fn is_cold(&self, feedback_count: u64) -> bool {
        feedback_count < self.config.threshold
    }

    pub fn personalization_weight(&self, feedback_count: u64) -> f64 {
        let full = self.config.full_personalization_at.max(1) as f64;
        (feedback_count as f64 / full).min(1.0)
    }

    pub fn popularity_score(&self, stats: &PopularityStats, now: DateTime<Utc>) -> f64 {
        let base = stats.likes as f64 - 0.5 * stats.dislikes as f64;
        let decay_days = self.config.popularity_decay_days;
        let recency = match stats.last_liked_at {
            Some(at) => {
                let days = (now - at).num_seconds() as f64 / 86_400.0;
                exponential_decay(days, decay_days)
            }
            // Likes with no timestamp are treated as one decay period old
            None if stats.likes > 0 => (-1.0f64).exp(),
            None => 1.0,
        };
        base * recency
    }

    /// Popularity descending, then id ascending
    pub fn popularity_ranking<'a>(&self, songs: &'a [Song], now: DateTime<Utc>) -> Vec<&'a Song> {
        let mut scored: Vec<(&Song, f64)> = songs
            .iter()
            .map(|s| (s, self.popularity_score(&s.popularity, now)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
        scored.into_iter().map(|(s, _)| s).collect()
    }

    /// Songs within the radius of `centroid`, in greedy maximin order.
    ///
    /// The first pick is the song closest to the centroid; each next pick
    /// maximizes its minimum VA distance to the songs already picked.
    pub fn cluster_bootstrap<'a>(&self, songs: &'a [Song], centroid: VaPoint, cap: usize) -> Vec<&'a Song> {
        let mut pool: Vec<&Song> = songs
            .iter()
            .filter(|s| s.va.distance(&centroid) <= self.config.cluster_radius)
            .collect();
        if pool.is_empty() || cap == 0 {
            return Vec::new();
        }
        pool.sort_by(|a, b| {
            a.va.distance(&centroid)
                .total_cmp(&b.va.distance(&centroid))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut picked = vec![pool.remove(0)];
        let mut min_dist: Vec<f64> = pool.iter().map(|s| s.va.distance(&picked[0].va)).collect();

        while picked.len() < cap && !pool.is_empty() {
            let mut best = 0;
            for i in 1..pool.len() {
                let better = min_dist[i] > min_dist[best]
                    || (min_dist[i] == min_dist[best] && pool[i].id < pool[best].id);
                if better {
                    best = i;
                }
            }
            let next = pool.remove(best);
            min_dist.remove(best);
            for (i, s) in pool.iter().enumerate() {
                min_dist[i] = min_dist[i].min(s.va.distance(&next.va));
            }
            picked.push(next);
        }
        picked
    }

    /// Interleave cluster bootstrap with popularity, then append the rest.
    /// Without a target centroid the list is popularity only.
    pub fn hybrid_fallback(
        &self,
        songs: &[Song],
        centroid: Option<VaPoint>,
        cluster_cap: usize,
        now: DateTime<Utc>,
    ) -> FallbackRanking {
        let popular = self.popularity_ranking(songs, now);

        let cluster = match centroid {
            Some(c) => self.cluster_bootstrap(songs, c, cluster_cap),
            None => Vec::new(),
        };
        if cluster.is_empty() {
            return FallbackRanking::from_order(
                popular
                    .into_iter()
                    .map(|s| (s.id.clone(), FallbackSource::Popularity))
                    .collect(),
            );
        }

        let ratio = self.config.hybrid_cluster_ratio;
        let mut order = Vec::with_capacity(songs.len());
        let mut seen: HashSet<&str> = HashSet::with_capacity(songs.len());
        let mut cluster_iter = cluster.into_iter().peekable();
        let mut popular_iter = popular.into_iter().peekable();
        let mut from_cluster = 0usize;

        loop {
            // Skip songs already placed by the other list
            while cluster_iter.peek().map_or(false, |s| seen.contains(s.id.as_str())) {
                cluster_iter.next();
            }
            while popular_iter.peek().map_or(false, |s| seen.contains(s.id.as_str())) {
                popular_iter.next();
            }

            let want_cluster = (from_cluster as f64) < ratio * (order.len() + 1) as f64;
            let pick = match (want_cluster, cluster_iter.peek().is_some(), popular_iter.peek().is_some()) {
                (_, false, false) => break,
                (true, true, _) | (false, true, false) => {
                    from_cluster += 1;
                    cluster_iter.next().map(|s| (s, FallbackSource::MoodCluster))
                }
                _ => popular_iter.next().map(|s| (s, FallbackSource::Popularity)),
            };

            if let Some((song, source)) = pick {
                seen.insert(song.id.as_str());
                order.push((song.id.clone(), source));
            }
        }

        debug!(
            total = order.len(),
            from_cluster = from_cluster,
            "Hybrid fallback assembled"
        );
        FallbackRanking::from_order(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Mood;
    use crate::services::strategies::tests::song;
    use chrono::Duration;

    fn gate() -> ColdStartGate {
        ColdStartGate::new(ColdStartConfig::default())
    }

    fn popular(id: &str, likes: u32, dislikes: u32, va: (f64, f64)) -> Song {
        let mut s = song(id, Mood::Happy, va);
        s.popularity.likes = likes;
        s.popularity.dislikes = dislikes;
        s.popularity.last_liked_at = Some(Utc::now());
        s
    }

    #[test]
    fn test_threshold_and_ramp() {
        let g = gate();
        assert!(g.is_cold(0));
        assert!(g.is_cold(9));
        assert!(!g.is_cold(10));

        let mut last = -1.0;
        for count in 0..60 {
            let pw = g.personalization_weight(count);
            assert!(pw >= last);
            last = pw;
        }
        assert_eq!(g.personalization_weight(30), 1.0);
        assert_eq!(g.personalization_weight(45), 1.0);
        assert!((g.personalization_weight(15) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_popularity_decay() {
        let g = gate();
        let fresh = PopularityStats {
            likes: 10,
            dislikes: 4,
            plays: 0,
            last_liked_at: Some(Utc::now()),
        };
        let now = Utc::now();
        assert!((g.popularity_score(&fresh, now) - 8.0).abs() < 1e-3);

        let stale = PopularityStats {
            last_liked_at: Some(now - Duration::days(30)),
            ..fresh
        };
        assert!((g.popularity_score(&stale, now) - 8.0 * (-1.0f64).exp()).abs() < 1e-3);
    }

    #[test]
    fn test_popularity_ties_break_by_id() {
        let g = gate();
        let songs = vec![popular("b", 1, 0, (0.0, 0.0)), popular("a", 1, 0, (0.0, 0.0))];
        let ranked: Vec<&str> = g
            .popularity_ranking(&songs, Utc::now())
            .into_iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ranked, vec!["a", "b"]);
    }

    #[test]
    fn test_cluster_bootstrap_spreads_picks() {
        let g = gate();
        let songs = vec![
            song("center", Mood::Sad, (-0.6, -0.5)),
            song("near", Mood::Sad, (-0.55, -0.5)),
            song("far", Mood::Sad, (-0.2, -0.2)),
            song("outside", Mood::Happy, (0.8, 0.8)),
        ];
        let picks: Vec<&str> = g
            .cluster_bootstrap(&songs, VaPoint::new(-0.6, -0.5), 10)
            .into_iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(picks, vec!["center", "far", "near"]);
    }

    #[test]
    fn test_hybrid_interleave_ratio() {
        let g = gate();
        let mut songs = Vec::new();
        for i in 0..5 {
            songs.push(song(&format!("sad{}", i), Mood::Sad, (-0.6 + 0.01 * i as f64, -0.5)));
        }
        for i in 0..5 {
            songs.push(popular(&format!("hit{}", i), 50 - i, 0, (0.9, 0.9)));
        }

        let ranking = g.hybrid_fallback(&songs, Some(VaPoint::new(-0.6, -0.5)), 20, Utc::now());
        assert_eq!(ranking.len(), 10);

        let first_five: Vec<FallbackSource> = ranking
            .ids()
            .take(5)
            .filter_map(|id| ranking.source(id))
            .collect();
        let cluster = first_five
            .iter()
            .filter(|s| **s == FallbackSource::MoodCluster)
            .count();
        assert_eq!(cluster, 3);
        assert_eq!(ranking.score(ranking.ids().next().unwrap_or_default()), 1.0);
    }

    #[test]
    fn test_no_mood_means_popularity_only() {
        let g = gate();
        let songs = vec![popular("x", 3, 0, (0.0, 0.0)), popular("y", 9, 0, (0.0, 0.0))];
        let ranking = g.hybrid_fallback(&songs, None, 20, Utc::now());
        assert_eq!(ranking.ids().collect::<Vec<_>>(), vec!["y", "x"]);
        assert_eq!(ranking.source("x"), Some(FallbackSource::Popularity));
    }
}
