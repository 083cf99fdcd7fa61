//! Per-connection session store.
//!
//! Maps a live connection id to its conversation history. A session is
//! created when the connection opens and destroyed when it closes; each
//! connection's history is garbage the moment it disconnects.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::conversation::{Conversation, ConversationMessage};

/// Session store keyed by connection identity.
///
/// Injected into the relay rather than reached as ambient state so the relay
/// can be exercised without a live transport.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Conversation>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh history for a newly opened connection.
    pub async fn create(&self, id: &str) {
        let mut sessions = self.sessions.write().await;
        if sessions.insert(id.to_string(), Conversation::new()).is_some() {
            warn!("Session already existed, history reset: {}", id);
        } else {
            info!("Session created: {}", id);
        }
    }

    /// Snapshot the history for `id`; empty when the session is unknown.
    pub async fn get(&self, id: &str) -> Conversation {
        let sessions = self.sessions.read().await;
        sessions.get(id).cloned().unwrap_or_default()
    }

    /// Append a message to the session's history.
    ///
    /// The write lock is held for the whole append, so appends from different
    /// turns can never interleave within one session. Returns false when the
    /// session no longer exists (connection already closed).
    pub async fn append(&self, id: &str, message: ConversationMessage) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(id) {
            Some(history) => {
                history.push(message);
                true
            }
            None => false,
        }
    }

    /// Drop the session and release its history.
    pub async fn destroy(&self, id: &str) {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(id).is_some() {
            info!("Session destroyed: {}", id);
        }
    }

    /// Number of live sessions.
    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
