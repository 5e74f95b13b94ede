//! Session registry and directed frame delivery.
//!
//! A session is one live WebSocket connection. Connections hold no
//! state beyond their session entry; agent identity outlives any
//! session, and one agent may hold several sessions at once. Frames are
//! handed to a per-connection writer task through an unbounded channel
//! so handlers never block on a slow socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use synapse_core::AgentId;

/// Opaque session identifier, unique for the process lifetime.
pub type SessionId = u64;

#[derive(Debug)]
struct SessionEntry {
    /// Bound identity once the handshake completes.
    agent_id: Option<AgentId>,
    /// Outbound frame channel consumed by the connection's writer task.
    tx: UnboundedSender<String>,
}

/// Process-wide registry of live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    inner: RwLock<HashMap<SessionId, SessionEntry>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection and returns its session id.
    pub fn register(&self, tx: UnboundedSender<String>) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.write().insert(id, SessionEntry { agent_id: None, tx });
        id
    }

    /// Binds an authenticated identity to a session.
    pub fn bind_agent(&self, session_id: SessionId, agent_id: AgentId) {
        if let Some(entry) = self.write().get_mut(&session_id) {
            entry.agent_id = Some(agent_id);
        }
    }

    /// Clears the bound identity (auth rollback).
    pub fn unbind_agent(&self, session_id: SessionId) {
        if let Some(entry) = self.write().get_mut(&session_id) {
            entry.agent_id = None;
        }
    }

    /// Drops a closed connection. Ledger, reputation, jobs, and timers
    /// all survive; only the session entry goes away.
    pub fn unregister(&self, session_id: SessionId) {
        self.write().remove(&session_id);
    }

    /// The identity bound to a session, if authed.
    #[must_use]
    pub fn agent_of(&self, session_id: SessionId) -> Option<AgentId> {
        self.read()
            .get(&session_id)
            .and_then(|entry| entry.agent_id.clone())
    }

    /// Sends one frame to one session.
    pub fn send_to(&self, session_id: SessionId, frame: &str) {
        if let Some(entry) = self.read().get(&session_id) {
            if entry.tx.send(frame.to_string()).is_err() {
                debug!(session_id, "dropping frame for closed session");
            }
        }
    }

    /// Sends one frame to every live session bound to `agent_id`.
    /// Returns the number of sessions reached.
    pub fn send_to_agent(&self, agent_id: &AgentId, frame: &str) -> usize {
        let mut reached = 0;
        for entry in self.read().values() {
            if entry.agent_id.as_ref() == Some(agent_id)
                && entry.tx.send(frame.to_string()).is_ok()
            {
                reached += 1;
            }
        }
        reached
    }

    /// Sends one frame to every authenticated session.
    pub fn broadcast(&self, frame: &str) {
        for entry in self.read().values() {
            if entry.agent_id.is_some() {
                let _ = entry.tx.send(frame.to_string());
            }
        }
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no sessions are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // Lock poisoning indicates a panic in another handler; the registry
    // holds no invariants that a half-applied insert could break, so
    // recover the guard rather than wedging every connection.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SessionId, SessionEntry>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionId, SessionEntry>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;

    #[test]
    fn test_directed_send_reaches_all_agent_sessions() {
        let registry = SessionRegistry::new();
        let (tx1, mut rx1) = unbounded_channel();
        let (tx2, mut rx2) = unbounded_channel();
        let (tx3, mut rx3) = unbounded_channel();

        let s1 = registry.register(tx1);
        let s2 = registry.register(tx2);
        let _s3 = registry.register(tx3);

        let alice = AgentId::from("agent_alice");
        registry.bind_agent(s1, alice.clone());
        registry.bind_agent(s2, alice.clone());

        let reached = registry.send_to_agent(&alice, "hello");
        assert_eq!(reached, 2);
        assert_eq!(rx1.try_recv().ok().as_deref(), Some("hello"));
        assert_eq!(rx2.try_recv().ok().as_deref(), Some("hello"));
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_skips_unauthed_sessions() {
        let registry = SessionRegistry::new();
        let (tx1, mut rx1) = unbounded_channel();
        let (tx2, mut rx2) = unbounded_channel();

        let s1 = registry.register(tx1);
        let _s2 = registry.register(tx2);
        registry.bind_agent(s1, AgentId::from("agent_a"));

        registry.broadcast("tick");
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_unregister_removes_session() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = unbounded_channel();
        let id = registry.register(tx);
        assert_eq!(registry.len(), 1);
        registry.unregister(id);
        assert!(registry.is_empty());
        assert!(registry.agent_of(id).is_none());
    }
}
