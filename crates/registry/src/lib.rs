//! Process-local registry of live agent connections (§4.4).
//!
//! Mirrors the teacher's `InMemorySessionStore` convention
//! (`crates/server/src/session.rs`): a single `parking_lot::RwLock`-guarded
//! map is the sole source of truth for liveness, with readers and writers
//! sharing the lock rather than each entry owning its own.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use voice_agent_config::AgentTransportConfig;

/// Which wire transport an agent is connected over (§6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentTransportKind {
    /// Bidirectional stream (ping/pong, 60s read deadline).
    Bidirectional,
    /// One-way server-push stream, paired with a companion POST endpoint.
    ServerPush,
}

/// An outbound message handed to an agent's send queue. The registry
/// doesn't interpret these; it only owns delivery order and backpressure.
pub type AgentOutboundMessage = Arc<str>;

/// A live agent connection entry.
pub struct AgentConnection {
    pub agent_id: String,
    pub owner_user_id: String,
    pub transport_kind: AgentTransportKind,
    sender: mpsc::Sender<AgentOutboundMessage>,
}

impl AgentConnection {
    /// Builds a new connection handle and its paired receiver. The caller
    /// (the agent's per-connection task) owns the receiver and drains it
    /// onto the wire. The send queue depth comes from
    /// `config.send_buffer` (§6.4, default 128).
    pub fn new(
        agent_id: impl Into<String>,
        owner_user_id: impl Into<String>,
        transport_kind: AgentTransportKind,
        config: &AgentTransportConfig,
    ) -> (Self, mpsc::Receiver<AgentOutboundMessage>) {
        let (sender, receiver) = mpsc::channel(config.send_buffer);
        (
            Self {
                agent_id: agent_id.into(),
                owner_user_id: owner_user_id.into(),
                transport_kind,
                sender,
            },
            receiver,
        )
    }

    /// Enqueues one outbound message; drops and logs on overflow per §6.4
    /// ("drop on overflow") rather than blocking or erroring.
    pub fn send(&self, message: AgentOutboundMessage) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.sender.try_send(message) {
            warn!(agent_id = %self.agent_id, "agent send buffer full, dropping message");
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("agent {0} already has a live connection")]
    AlreadyConnected(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Process-local set of live agent connections.
#[derive(Default)]
pub struct AgentRegistry {
    conns: RwLock<HashMap<String, Arc<AgentConnection>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `conn` iff no existing entry for its agent ID is live.
    /// Duplicate live registration fails with `AlreadyConnected`, leaving
    /// the existing connection untouched.
    pub fn register(&self, conn: AgentConnection) -> Result<Arc<AgentConnection>> {
        let mut conns = self.conns.write();
        if conns.contains_key(&conn.agent_id) {
            return Err(RegistryError::AlreadyConnected(conn.agent_id));
        }
        let agent_id = conn.agent_id.clone();
        let handle = Arc::new(conn);
        conns.insert(agent_id.clone(), handle.clone());
        info!(agent_id = %agent_id, "agent registered");
        Ok(handle)
    }

    /// Removes the entry for `agent_id`, if any.
    pub fn unregister(&self, agent_id: &str) -> Option<Arc<AgentConnection>> {
        let removed = self.conns.write().remove(agent_id);
        if removed.is_some() {
            info!(agent_id, "agent unregistered");
        }
        removed
    }

    /// Returns the entry for `agent_id` iff it is currently live.
    pub fn get(&self, agent_id: &str) -> Option<Arc<AgentConnection>> {
        self.conns.read().get(agent_id).cloned()
    }

    pub fn is_live(&self, agent_id: &str) -> bool {
        self.conns.read().contains_key(agent_id)
    }

    /// Returns all live entries.
    pub fn list(&self) -> Vec<Arc<AgentConnection>> {
        self.conns.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.conns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(agent_id: &str) -> AgentConnection {
        AgentConnection::new(
            agent_id,
            "user-1",
            AgentTransportKind::Bidirectional,
            &AgentTransportConfig::default(),
        )
        .0
    }

    #[test]
    fn register_succeeds_and_get_returns_entry() {
        let registry = AgentRegistry::new();
        registry.register(conn("A")).unwrap();
        assert!(registry.get("A").is_some());
    }

    #[test]
    fn duplicate_registration_fails_and_keeps_original_live() {
        let registry = AgentRegistry::new();
        registry.register(conn("A")).unwrap();
        let err = registry.register(conn("A")).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyConnected(id) if id == "A"));
        assert!(registry.is_live("A"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn register_unregister_register_round_trips() {
        let registry = AgentRegistry::new();
        registry.register(conn("A")).unwrap();
        assert!(registry.unregister("A").is_some());
        assert!(!registry.is_live("A"));
        registry.register(conn("A")).unwrap();
        assert!(registry.is_live("A"));
    }

    #[test]
    fn get_on_unknown_agent_returns_none() {
        let registry = AgentRegistry::new();
        assert!(registry.get("ghost").is_none());
    }

    #[test]
    fn list_returns_all_live_entries() {
        let registry = AgentRegistry::new();
        registry.register(conn("A")).unwrap();
        registry.register(conn("B")).unwrap();
        let mut ids: Vec<_> = registry.list().iter().map(|c| c.agent_id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn send_drops_on_overflow_without_blocking() {
        let config = AgentTransportConfig::default();
        let (conn, mut rx) =
            AgentConnection::new("A", "user-1", AgentTransportKind::ServerPush, &config);
        for i in 0..config.send_buffer + 10 {
            conn.send(Arc::from(format!("msg-{i}")));
        }
        // Draining should see at most `send_buffer` messages; excess were
        // dropped rather than blocking the sender above.
        let mut seen = 0;
        while rx.try_recv().is_ok() {
            seen += 1;
        }
        assert!(seen <= config.send_buffer);
    }
}
