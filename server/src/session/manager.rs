//! Session manager for tracking all connected clients

use super::connection::{SessionHandle, SessionId};
use callcenter_shared::Response;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Manages all active client sessions
pub struct SessionManager {
    /// Map of session id -> session handle
    sessions: Arc<RwLock<HashMap<SessionId, SessionHandle>>>,
    next_id: AtomicU64,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Allocate the id for a newly accepted connection
    pub fn next_session_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Register a new client session
    pub async fn register(&self, handle: SessionHandle) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(handle.id, handle);
    }

    /// Unregister a client session
    pub async fn unregister(&self, id: SessionId) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&id);
    }

    /// Get a session handle for a specific client
    pub async fn get(&self, id: SessionId) -> Option<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions.get(&id).cloned()
    }

    /// Send a response to a specific client
    pub async fn send_to(&self, id: SessionId, response: Response) -> anyhow::Result<()> {
        let handle = self
            .get(id)
            .await
            .ok_or_else(|| anyhow::anyhow!("Session not connected: {}", id))?;
        handle.send(response)
    }

    /// Broadcast a response to all connected clients
    pub async fn broadcast(&self, response: &Response) {
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();
        for handle in handles {
            if let Err(e) = handle.send(response.clone()) {
                warn!("Failed to send to session {}: {}", handle.id, e);
            }
        }
    }

    /// Get the number of connected clients
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
