// ============================================
// Ranking Aggregator
// ============================================
//
// final = (pw * strategy_score + (1 - pw) * fallback_score) * recency
// recency = 1 - exp(-λ * days_since_played), 1 for never-played songs
//
// Ordering: score desc, song id asc. The top window is then arranged so
// that adjacent entries never share an artist (when enough artists exist)
// and at least `min_genres_in_top` genres appear (when enough genres exist).
// The arrangement is the lexicographically best one in score order, found
// by bounded depth-first search over one song per (artist, genre) key; when
// the budget runs out the genre rule is dropped, then a greedy pass is used.

pub mod explain;

pub use explain::{explain, MOOD_CLUSTER_LABEL, POPULARITY_LABEL};

use crate::config::RankingConfig;
use crate::models::StrategyKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
pub struct RankedCandidate {
    pub song_id: String,
    pub artist: String,
    pub genre: String,
    pub score: f64,
    /// Bandit arm credited with this song
    pub strategy: StrategyKind,
    /// Dominant factor shown to the caller
    pub label: String,
    pub contributions: BTreeMap<String, f64>,
    pub explanation: Option<String>,
}

pub struct RankingAggregator {
    config: RankingConfig,
}

impl RankingAggregator {
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    pub fn max_limit(&self) -> usize {
        self.config.max_limit
    }

    pub fn recency_factor(&self, last_played: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        match last_played {
            Some(at) => {
                let days = ((now - at).num_seconds() as f64 / 86_400.0).max(0.0);
                1.0 - (-self.config.recency_lambda * days).exp()
            }
            None => 1.0,
        }
    }

    /// Linear cold-start transition between strategy and fallback scores
    pub fn blend_cold_start(strategy_score: f64, fallback_score: f64, pw: f64) -> f64 {
        let pw = pw.clamp(0.0, 1.0);
        pw * strategy_score + (1.0 - pw) * fallback_score
    }

    /// Score desc, then song id asc
    pub fn order(candidates: &mut [RankedCandidate]) {
        candidates.sort_by(compare);
    }

    /// Order, apply placement constraints and truncate to `limit`
    pub fn arrange(&self, mut candidates: Vec<RankedCandidate>, limit: usize) -> Vec<RankedCandidate> {
        Self::order(&mut candidates);
        let limit = limit.min(candidates.len());
        if limit == 0 {
            return Vec::new();
        }

        let distinct_artists = candidates.iter().map(|c| c.artist.as_str()).collect::<HashSet<_>>().len();
        let distinct_genres = candidates.iter().map(|c| c.genre.as_str()).collect::<HashSet<_>>().len();
        let artist_rule = distinct_artists >= self.config.min_artists_for_constraint;
        let window = self.config.top_window.min(limit);
        let genre_target = if distinct_genres >= self.config.min_genres_in_top {
            self.config.min_genres_in_top.min(window)
        } else {
            0
        };

        let top = self
            .search(&candidates, window, artist_rule, genre_target)
            .or_else(|| {
                if genre_target > 0 {
                    warn!(window = window, "Genre constraint unsatisfied, relaxing");
                    self.search(&candidates, window, artist_rule, 0)
                } else {
                    None
                }
            })
            .unwrap_or_else(|| {
                warn!(window = window, "Arrangement search exhausted, using greedy order");
                greedy(&candidates, &[], window, artist_rule)
            });

        let mut picked = top;
        let rest = greedy(&candidates, &picked, limit - picked.len(), artist_rule);
        picked.extend(rest);

        debug!(
            candidates = candidates.len(),
            returned = picked.len(),
            artist_rule = artist_rule,
            genre_target = genre_target,
            "Ranking arranged"
        );

        let mut slots: Vec<Option<RankedCandidate>> = candidates.into_iter().map(Some).collect();
        picked
            .into_iter()
            .filter_map(|i| slots.get_mut(i).and_then(Option::take))
            .collect()
    }

    fn search(
        &self,
        sorted: &[RankedCandidate],
        window: usize,
        artist_rule: bool,
        genre_target: usize,
    ) -> Option<Vec<usize>> {
        let mut state = SearchState {
            sorted,
            window,
            artist_rule,
            genre_target,
            chosen: Vec::with_capacity(window),
            used: vec![false; sorted.len()],
            genres: HashMap::new(),
            budget: self.config.arrangement_budget,
        };
        if state.descend() {
            Some(state.chosen)
        } else {
            None
        }
    }
}

fn compare(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.song_id.cmp(&b.song_id))
}

struct SearchState<'a> {
    sorted: &'a [RankedCandidate],
    window: usize,
    artist_rule: bool,
    genre_target: usize,
    chosen: Vec<usize>,
    used: Vec<bool>,
    genres: HashMap<&'a str, usize>,
    budget: usize,
}

impl<'a> SearchState<'a> {
    /// Best unused song per (artist, genre), in score order. Songs sharing a
    /// key are interchangeable at one depth, so only the first is branched on.
    fn representatives(&self) -> Vec<usize> {
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        self.sorted
            .iter()
            .enumerate()
            .filter(|&(i, c)| !self.used[i] && seen.insert((c.artist.as_str(), c.genre.as_str())))
            .map(|(i, _)| i)
            .collect()
    }

    fn descend(&mut self) -> bool {
        if self.chosen.len() == self.window {
            return self.genres.len() >= self.genre_target;
        }

        let sorted = self.sorted;
        for i in self.representatives() {
            let candidate = &sorted[i];
            if self.artist_rule {
                if let Some(&prev) = self.chosen.last() {
                    if sorted[prev].artist == candidate.artist {
                        continue;
                    }
                }
            }

            let new_genre = !self.genres.contains_key(candidate.genre.as_str());
            let reachable = self.genres.len()
                + usize::from(new_genre)
                + (self.window - self.chosen.len() - 1);
            if reachable < self.genre_target {
                continue;
            }

            if self.budget == 0 {
                return false;
            }
            self.budget -= 1;

            self.used[i] = true;
            self.chosen.push(i);
            *self.genres.entry(candidate.genre.as_str()).or_insert(0) += 1;

            if self.descend() {
                return true;
            }

            self.chosen.pop();
            self.used[i] = false;
            if let Some(count) = self.genres.get_mut(candidate.genre.as_str()) {
                *count -= 1;
                if *count == 0 {
                    self.genres.remove(candidate.genre.as_str());
                }
            }
        }
        false
    }
}

/// Fill `slots` positions in score order, avoiding an artist repeat with the
/// previous pick whenever some other candidate is available.
fn greedy(sorted: &[RankedCandidate], already: &[usize], slots: usize, artist_rule: bool) -> Vec<usize> {
    let mut used: HashSet<usize> = already.iter().copied().collect();
    let mut last_artist = already.last().map(|&i| sorted[i].artist.as_str());
    let mut out = Vec::with_capacity(slots);

    while out.len() < slots {
        let mut free = (0..sorted.len()).filter(|i| !used.contains(i));
        let first = match free.next() {
            Some(i) => i,
            None => break,
        };
        let pick = if artist_rule && last_artist == Some(sorted[first].artist.as_str()) {
            std::iter::once(first)
                .chain(free)
                .find(|&i| Some(sorted[i].artist.as_str()) != last_artist)
                .unwrap_or(first)
        } else {
            first
        };

        used.insert(pick);
        last_artist = Some(sorted[pick].artist.as_str());
        out.push(pick);
    }
    out
}
