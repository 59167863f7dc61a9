//! Per-user notification sessions and broadcast to all of them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use growbot_core::ids::{SessionId, UserId};
use growbot_core::messages::{Envelope, Notification};

use crate::metrics::{NOTIFICATIONS_DROPPED_TOTAL, NOTIFICATIONS_SENT_TOTAL, USER_SESSIONS_ACTIVE};

/// One open notification socket for a user.
pub struct NotificationSession {
    id: SessionId,
    user: UserId,
    tx: mpsc::Sender<String>,
    dropped: AtomicU64,
}

impl NotificationSession {
    pub fn new(user: UserId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id: SessionId::new(),
            user,
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn channel(user: UserId, capacity: usize) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Self::new(user, tx)), rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    /// Queue a frame without waiting. False if the session is full or gone.
    pub fn try_send(&self, frame: String) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "queue full",
                    mpsc::error::TrySendError::Closed(_) => "closed",
                };
                warn!(user_id = %self.user, session_id = %self.id, reason, "dropping notification");
                false
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
pub struct NotificationFanout {
    sessions: RwLock<HashMap<UserId, Vec<Arc<NotificationSession>>>>,
}

impl NotificationFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_session(&self, session: Arc<NotificationSession>) {
        let total = {
            let mut sessions = self.sessions.write();
            sessions.entry(session.user()).or_default().push(session);
            sessions.values().map(Vec::len).sum::<usize>()
        };
        metrics::gauge!(USER_SESSIONS_ACTIVE).set(total as f64);
    }

    /// Remove exactly this session. Users left with no sessions are pruned.
    pub fn remove_session(&self, session: &NotificationSession) -> bool {
        let (removed, total) = {
            let mut sessions = self.sessions.write();
            let mut removed = false;
            if let Some(list) = sessions.get_mut(&session.user()) {
                let before = list.len();
                list.retain(|s| s.id() != session.id());
                removed = list.len() != before;
                if list.is_empty() {
                    sessions.remove(&session.user());
                }
            }
            (removed, sessions.values().map(Vec::len).sum::<usize>())
        };
        metrics::gauge!(USER_SESSIONS_ACTIVE).set(total as f64);
        removed
    }

    /// Send `{type, data}` to every session the user has open right now.
    /// Returns how many sessions accepted the frame.
    pub fn broadcast(&self, user: UserId, event_type: &str, payload: Value) -> usize {
        let targets = match self.sessions.read().get(&user) {
            Some(list) => list.clone(),
            None => return 0,
        };
        if targets.is_empty() {
            return 0;
        }

        let frame = Envelope::new(event_type, payload).encode();
        let mut delivered = 0;
        for session in &targets {
            if session.try_send(frame.clone()) {
                delivered += 1;
            }
        }
        let dropped = targets.len() - delivered;
        metrics::counter!(NOTIFICATIONS_SENT_TOTAL).increment(delivered as u64);
        if dropped > 0 {
            metrics::counter!(NOTIFICATIONS_DROPPED_TOTAL).increment(dropped as u64);
        }
        debug!(user_id = %user, event_type, delivered, dropped, "notification broadcast");
        delivered
    }

    pub fn notify(&self, user: UserId, notification: &Notification) -> usize {
        self.broadcast(user, notification.event_type(), notification.payload())
    }

    pub fn session_count(&self, user: UserId) -> usize {
        self.sessions.read().get(&user).map_or(0, Vec::len)
    }

    pub fn total_sessions(&self) -> usize {
        self.sessions.read().values().map(Vec::len).sum()
    }
}
