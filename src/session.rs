use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::context::ConversationContext;
use crate::error::DispatchError;
use crate::plan::Plan;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(skip)]
    pub context: ConversationContext,
    pub plan: Plan,
}

impl Session {
    pub fn new(user_id: impl Into<String>, system_prompt: &str, max_history: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            created_at: now,
            last_activity: now,
            context: ConversationContext::new(system_prompt, max_history),
            plan: Plan::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    fn idle_for(&self) -> Duration {
        (Utc::now() - self.last_activity).to_std().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

struct SessionSlot {
    seq: u64,
    info: SessionInfo,
    terminated: AtomicBool,
    session: Arc<Mutex<Session>>,
}

/// In-memory session map. The map lock is only held for lookups; each session
/// has its own mutex, held by a query for its whole duration.
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Arc<SessionSlot>>>,
    next_seq: AtomicU64,
    system_prompt: String,
    max_history: usize,
}

impl SessionStore {
    pub fn new(system_prompt: impl Into<String>, max_history: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            system_prompt: system_prompt.into(),
            max_history,
        }
    }

    pub async fn create(&self, user_id: &str) -> Uuid {
        let session = Session::new(user_id, &self.system_prompt, self.max_history);
        let id = session.id;
        let slot = SessionSlot {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            info: SessionInfo { session_id: id, user_id: session.user_id.clone(), created_at: session.created_at },
            terminated: AtomicBool::new(false),
            session: Arc::new(Mutex::new(session)),
        };
        self.sessions.write().await.insert(id, Arc::new(slot));
        tracing::info!(session = %id, user = %user_id, "session created");
        id
    }

    /// Waits for exclusive access to the session. Fails with `SessionNotFound`
    /// if the session is unknown or was ended while waiting.
    pub async fn lock(&self, id: Uuid) -> Result<OwnedMutexGuard<Session>, DispatchError> {
        let slot = self.sessions.read().await.get(&id).cloned().ok_or_else(|| DispatchError::SessionNotFound(id.to_string()))?;
        let guard = slot.session.clone().lock_owned().await;
        if slot.terminated.load(Ordering::Acquire) {
            return Err(DispatchError::SessionNotFound(id.to_string()));
        }
        Ok(guard)
    }

    /// Ends the session. Queries already waiting on it will fail.
    pub async fn end(&self, id: Uuid) -> Result<(), DispatchError> {
        let slot = self.sessions.write().await.remove(&id).ok_or_else(|| DispatchError::SessionNotFound(id.to_string()))?;
        slot.terminated.store(true, Ordering::Release);
        tracing::info!(session = %id, "session ended");
        Ok(())
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut slots: Vec<&Arc<SessionSlot>> = sessions.values().collect();
        slots.sort_by_key(|s| s.seq);
        slots.into_iter().map(|s| s.info.clone()).collect()
    }

    /// Drops sessions idle for at least `ttl`. Sessions with a query in flight
    /// are never evicted.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, slot| {
            let Ok(session) = slot.session.try_lock() else { return true };
            if session.idle_for() < ttl {
                return true;
            }
            slot.terminated.store(true, Ordering::Release);
            tracing::info!(session = %id, "evicting idle session");
            false
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            metrics::counter!("switchboard_sessions_evicted_total").increment(evicted as u64);
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
