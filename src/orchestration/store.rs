// In-memory session registry with idle expiry

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::session::Session;
use crate::core::errors::{SessionError, SessionResult};
use crate::core::types::{SessionConfig, SessionId};
use crate::utils::Metrics;

/// A session plus its last-activity timestamp.
///
/// Requests for one session serialize on the async mutex; the timestamp has
/// its own lock so the sweeper can read it without waiting on a request.
pub struct SessionSlot {
    session: tokio::sync::Mutex<Session>,
    last_active: Mutex<Instant>,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        Self {
            session: tokio::sync::Mutex::new(session),
            last_active: Mutex::new(Instant::now()),
        }
    }

    /// Lock the session for one request
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Session> {
        self.touch();
        let guard = self.session.lock().await;
        self.touch();
        guard
    }

    pub fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.lock().elapsed()
    }
}

pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<SessionSlot>>,
    idle_ttl: Duration,
    max_sessions: usize,
    metrics: Option<Arc<Metrics>>,
}

impl SessionStore {
    pub fn new(idle_ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_ttl,
            max_sessions,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn create(&self, config: SessionConfig) -> SessionResult<SessionId> {
        if self.sessions.len() >= self.max_sessions {
            // Make room from idle sessions before refusing
            self.sweep_expired();
            if self.sessions.len() >= self.max_sessions {
                return Err(SessionError::SessionLimit(self.max_sessions));
            }
        }

        let id = SessionId::new();
        let session = Session::new(id, config)?;
        self.sessions.insert(id, Arc::new(SessionSlot::new(session)));

        if let Some(metrics) = &self.metrics {
            metrics.record_session_created();
        }
        debug!("Created session {} ({} active)", id, self.sessions.len());
        Ok(id)
    }

    pub fn get(&self, id: &SessionId) -> SessionResult<Arc<SessionSlot>> {
        let slot = self
            .sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))?;
        slot.touch();
        Ok(slot)
    }

    pub fn remove(&self, id: &SessionId) -> SessionResult<()> {
        self.sessions
            .remove(id)
            .map(|_| debug!("Ended session {}", id))
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions idle longer than the TTL; returns how many were removed
    pub fn sweep_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, slot| slot.idle_for() < self.idle_ttl);
        let removed = before.saturating_sub(self.sessions.len());

        if removed > 0 {
            info!("Expired {} idle session(s), {} active", removed, self.sessions.len());
            if let Some(metrics) = &self.metrics {
                metrics.record_sessions_expired(removed);
            }
        }
        removed
    }

    /// Periodically expire idle sessions until the store is dropped
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.sweep_expired();
            }
        })
    }
}
