// ============================================
// Conversation Context Memory
// ============================================
//
// Session registry keyed by session id. Each session sits behind its own
// async lock so concurrent users never contend. Expiry is advisory: sessions
// only expose `last_activity` and the sweeper decides.

mod session;

pub use session::{
    ContextFeatures, ConversationSession, ConversationTurn, SessionFeedbackStats, SessionState,
};

use crate::config::{ContextConfig, TrajectoryConfig};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub type SessionHandle = Arc<RwLock<ConversationSession>>;

pub struct ConversationContextMemory {
    sessions: DashMap<String, SessionHandle>,
    context: ContextConfig,
    trajectory: TrajectoryConfig,
}

impl ConversationContextMemory {
    pub fn new(context: ContextConfig, trajectory: TrajectoryConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            context,
            trajectory,
        }
    }

    /// Session key used when a request carries no session id
    pub fn default_session_id(user_id: &str) -> String {
        format!("{}::default", user_id)
    }

    /// Existing open session for this user, or a fresh one.
    ///
    /// A closed session, or one owned by another user, is replaced; the
    /// trajectory window therefore restarts.
    pub async fn get_or_create(&self, session_id: &str, user_id: &str) -> SessionHandle {
        if let Some(existing) = self.get(session_id) {
            let reusable = {
                let guard = existing.read().await;
                !guard.is_closed() && guard.user_id == user_id
            };
            if reusable {
                return existing;
            }
            debug!(session_id = %session_id, "Replacing closed or foreign session");
        }

        let fresh = Arc::new(RwLock::new(ConversationSession::new(
            session_id,
            user_id,
            &self.context,
            &self.trajectory,
        )));
        self.sessions
            .insert(session_id.to_string(), Arc::clone(&fresh));
        fresh
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.get(session_id).map(|s| Arc::clone(s.value()))
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.remove(session_id).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove sessions idle for longer than `timeout`.
    ///
    /// Sessions locked by an in-flight request are skipped and picked up by a
    /// later sweep. Removed handles are returned so the caller can settle
    /// their rewards.
    pub fn sweep_expired(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<SessionHandle> {
        let candidates: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| match entry.value().try_read() {
                Ok(session) => session.is_expired(now, timeout),
                Err(_) => false,
            })
            .map(|entry| entry.key().clone())
            .collect();

        let removed: Vec<SessionHandle> = candidates
            .iter()
            .filter_map(|id| {
                self.sessions
                    .remove_if(id, |_, session| match session.try_read() {
                        Ok(s) => s.is_expired(now, timeout),
                        Err(_) => false,
                    })
                    .map(|(_, s)| s)
            })
            .collect();

        if !removed.is_empty() {
            info!(
                expired = removed.len(),
                remaining = self.sessions.len(),
                "Swept expired sessions"
            );
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> ConversationContextMemory {
        ConversationContextMemory::new(ContextConfig::default(), TrajectoryConfig::default())
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_open_session() {
        let memory = memory();
        let a = memory.get_or_create("s1", "u1").await;
        let b = memory.get_or_create("s1", "u1").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(memory.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_session_is_replaced() {
        let memory = memory();
        let a = memory.get_or_create("s1", "u1").await;
        a.write().await.close();
        let b = memory.get_or_create("s1", "u1").await;
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.read().await.state(), SessionState::Greeting);
    }

    #[tokio::test]
    async fn test_sweep_skips_locked_sessions() {
        let memory = memory();
        let idle = memory.get_or_create("idle", "u1").await;
        let busy = memory.get_or_create("busy", "u2").await;
        let stale = Utc::now() - Duration::hours(2);
        idle.write().await.set_last_activity(stale);
        busy.write().await.set_last_activity(stale);

        let _guard = busy.write().await;
        let removed = memory.sweep_expired(Utc::now(), Duration::minutes(30));

        assert_eq!(removed.len(), 1);
        assert!(memory.get("idle").is_none());
        assert!(memory.get("busy").is_some());
    }
}
