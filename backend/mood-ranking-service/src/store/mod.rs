// ============================================
// Per-User State Store
// ============================================
//
// Sharded concurrent map keyed by user id, one async lock per user.
// Requests for different users never share a lock. The store is passed to
// constructors as a handle so it can be replaced by an external backend.

use crate::config::LearnerConfig;
use crate::models::{AudioFeatures, ContextSnapshot};
use crate::services::bandit::BanditArms;
use crate::services::learner::weights::PersonalizationWeights;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Running average of liked-song feature vectors plus the liked id set
#[derive(Debug, Clone, Default)]
pub struct TasteProfile {
    liked: BTreeSet<String>,
    centroid: Option<[f64; AudioFeatures::VECTOR_LEN]>,
}

impl TasteProfile {
    pub fn liked(&self) -> &BTreeSet<String> {
        &self.liked
    }

    pub fn centroid(&self) -> Option<Vec<f64>> {
        self.centroid.map(|c| c.to_vec())
    }

    /// Add a liked song; repeated likes of the same song are ignored
    pub fn add(&mut self, song_id: &str, vector: Option<[f64; AudioFeatures::VECTOR_LEN]>) {
        if !self.liked.insert(song_id.to_string()) {
            return;
        }
        if let Some(v) = vector {
            let n = self.liked.len() as f64;
            self.centroid = Some(match self.centroid {
                Some(c) => {
                    let mut next = c;
                    for (slot, x) in next.iter_mut().zip(v.iter()) {
                        *slot += (x - *slot) / n;
                    }
                    next
                }
                None => v,
            });
        }
    }

    /// Remove a previously liked song
    pub fn remove(&mut self, song_id: &str, vector: Option<[f64; AudioFeatures::VECTOR_LEN]>) {
        if !self.liked.remove(song_id) {
            return;
        }
        let remaining = self.liked.len() as f64;
        match (self.centroid, vector) {
            (_, _) if remaining == 0.0 => self.centroid = None,
            (Some(c), Some(v)) => {
                let mut next = c;
                for (slot, x) in next.iter_mut().zip(v.iter()) {
                    *slot = (*slot * (remaining + 1.0) - x) / remaining;
                }
                self.centroid = Some(next);
            }
            _ => {}
        }
    }
}

/// Bounded record of what produced each served song
#[derive(Debug, Clone, Default)]
pub struct ServedLedger {
    order: VecDeque<String>,
    entries: HashMap<String, ContextSnapshot>,
    capacity: usize,
}

impl ServedLedger {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            entries: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, song_id: &str, snapshot: ContextSnapshot) {
        if self.entries.insert(song_id.to_string(), snapshot).is_some() {
            self.order.retain(|id| id != song_id);
        }
        self.order.push_back(song_id.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn lookup(&self, song_id: &str) -> Option<&ContextSnapshot> {
        self.entries.get(song_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct UserState {
    pub user_id: String,
    /// Created on the first bandit selection or bandit update
    pub arms: Option<BanditArms>,
    pub weights: PersonalizationWeights,
    pub feedback_count: u64,
    pub taste: TasteProfile,
    /// Song id -> last time it was played
    pub play_history: HashMap<String, DateTime<Utc>>,
    pub served: ServedLedger,
    pub created_at: DateTime<Utc>,
}

impl UserState {
    pub fn new(user_id: &str, config: &LearnerConfig) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            arms: None,
            weights: PersonalizationWeights::new(config.weight_min, config.weight_max, now),
            feedback_count: 0,
            taste: TasteProfile::default(),
            play_history: HashMap::new(),
            served: ServedLedger::with_capacity(config.served_ledger_capacity),
            created_at: now,
        }
    }

    pub fn arms_mut(&mut self) -> &mut BanditArms {
        self.arms.get_or_insert_with(BanditArms::new)
    }
}

pub type UserHandle = Arc<RwLock<UserState>>;

pub struct UserStore {
    users: DashMap<String, UserHandle>,
    config: LearnerConfig,
}

impl UserStore {
    pub fn new(config: LearnerConfig) -> Self {
        Self {
            users: DashMap::new(),
            config,
        }
    }

    pub fn get(&self, user_id: &str) -> Option<UserHandle> {
        self.users.get(user_id).map(|u| Arc::clone(u.value()))
    }

    fn handle(&self, user_id: &str) -> UserHandle {
        // Clone out of the shard guard before any await
        let entry = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(UserState::new(user_id, &self.config))));
        Arc::clone(entry.value())
    }

    /// Read a user's state without creating it
    pub async fn read<R>(&self, user_id: &str, f: impl FnOnce(&UserState) -> R) -> Option<R> {
        let handle = self.get(user_id)?;
        let guard = handle.read().await;
        Some(f(&guard))
    }

    /// Mutate a user's state, creating it on first use
    pub async fn update<R>(&self, user_id: &str, f: impl FnOnce(&mut UserState) -> R) -> R {
        let handle = self.handle(user_id);
        let mut guard = handle.write().await;
        f(&mut guard)
    }

    /// Like `update`, but gives up when the lock is not acquired within `wait`
    pub async fn update_within<R>(
        &self,
        user_id: &str,
        wait: Duration,
        f: impl FnOnce(&mut UserState) -> R,
    ) -> Option<R> {
        let handle = self.handle(user_id);
        let mut guard = tokio::time::timeout(wait, handle.write()).await.ok()?;
        Some(f(&mut guard))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Liked-song centroids of users whose liked sets overlap `liked` by at
    /// least `min_overlap` (Jaccard). Users locked for writing are skipped.
    pub fn neighbor_centroids(
        &self,
        user_id: &str,
        liked: &BTreeSet<String>,
        min_overlap: f64,
        max_neighbors: usize,
    ) -> Vec<Vec<f64>> {
        if liked.is_empty() || max_neighbors == 0 {
            return Vec::new();
        }

        let mut neighbours: Vec<(f64, String, Vec<f64>)> = self
            .users
            .iter()
            .filter(|entry| entry.key() != user_id)
            .filter_map(|entry| {
                let state = entry.value().try_read().ok()?;
                let centroid = state.taste.centroid()?;
                let overlap = jaccard(liked, state.taste.liked());
                (overlap >= min_overlap).then(|| (overlap, entry.key().clone(), centroid))
            })
            .collect();

        neighbours.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        neighbours
            .into_iter()
            .take(max_neighbors)
            .map(|(_, _, c)| c)
            .collect()
    }

    /// Apply lazy weight decay to every user not currently locked.
    /// Returns how many users had a weight move.
    pub fn decay_idle(&self, now: DateTime<Utc>) -> usize {
        self.users
            .iter()
            .filter_map(|entry| {
                let mut state = entry.value().try_write().ok()?;
                let moved =
                    state
                        .weights
                        .apply_decay(now, self.config.decay_rate, self.config.decay_period_days);
                (moved > 0).then_some(())
            })
            .count()
    }
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}
