//! Voice Manager (§4.7): owns the peer-connection factory, the
//! ICE/STUN/TURN configuration (including ephemeral TURN credential
//! issuance), and the session ID → entry map. Distinct from the Voice
//! Session state machine ‒ the manager's "Session" here just bundles the
//! ID, the peer transport, the owning user, and the bounded outbound
//! ICE-candidate channel signaling uses to trickle server candidates
//! back to the client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha1::Sha1;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use voice_agent_config::IceConfig;
use voice_agent_core::SessionId;
use voice_agent_transport::PeerTransport;

const ICE_CANDIDATE_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("session not found: {0}")]
    NotFound(SessionId),
    #[error("session already registered: {0}")]
    AlreadyRegistered(SessionId),
}

pub type Result<T> = std::result::Result<T, ManagerError>;

/// Ephemeral TURN credentials issued per §4.7/§8 scenario 6: the username
/// is the decimal Unix timestamp the credential expires at, and the
/// credential is `base64(HMAC-SHA1(secret, username))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnCredentials {
    pub username: String,
    pub credential: String,
}

/// Computes TURN credentials for `now + ttl` given the shared secret.
/// Pure and independently testable: callers pass `now` explicitly rather
/// than this function reading the clock, so the §8 scenario ("given
/// secret k, ttl=3600, frozen time T") is directly reproducible in tests.
pub fn issue_turn_credentials(secret: &str, ttl: Duration, now: SystemTime) -> TurnCredentials {
    let expiry = now + ttl;
    let expiry_secs = expiry
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let username = expiry_secs.to_string();

    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts a key of any length");
    mac.update(username.as_bytes());
    let credential = BASE64.encode(mac.finalize().into_bytes());

    TurnCredentials { username, credential }
}

/// Resolves the effective ICE configuration for one session: static
/// servers as configured, plus a freshly-issued ephemeral TURN server
/// entry when a shared secret is configured.
pub fn resolve_ice_config(ice: &IceConfig, now: SystemTime) -> IceConfig {
    let mut resolved = ice.clone();
    if let Some(secret) = &ice.turn.shared_secret {
        let creds = issue_turn_credentials(secret, Duration::from_secs(ice.turn.ttl_secs), now);
        for server in &mut resolved.servers {
            server.username = Some(creds.username.clone());
            server.credential = Some(creds.credential.clone());
        }
    }
    resolved
}

/// One bundled session entry owned by the manager: separate from the
/// Voice Session state machine, which owns the actual call logic.
pub struct ManagedSession {
    pub id: SessionId,
    pub owning_user_id: String,
    pub peer: Arc<PeerTransport>,
    pub ice_candidate_tx: mpsc::Sender<serde_json::Value>,
}

/// Owns the session ID → entry map and the ICE configuration used to
/// stand up new peer connections.
pub struct VoiceManager {
    ice: IceConfig,
    sessions: RwLock<HashMap<SessionId, Arc<ManagedSession>>>,
}

impl VoiceManager {
    pub fn new(ice: IceConfig) -> Self {
        Self {
            ice,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// The ICE configuration to hand to a new peer connection, with a
    /// freshly-minted TURN credential if one is configured.
    pub fn ice_config_now(&self) -> IceConfig {
        resolve_ice_config(&self.ice, SystemTime::now())
    }

    pub fn register(
        &self,
        id: SessionId,
        owning_user_id: String,
        peer: Arc<PeerTransport>,
    ) -> Result<(mpsc::Receiver<serde_json::Value>, Arc<ManagedSession>)> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&id) {
            return Err(ManagerError::AlreadyRegistered(id));
        }
        let (ice_candidate_tx, ice_candidate_rx) = mpsc::channel(ICE_CANDIDATE_CHANNEL_CAPACITY);
        let entry = Arc::new(ManagedSession {
            id,
            owning_user_id,
            peer,
            ice_candidate_tx,
        });
        sessions.insert(id, entry.clone());
        info!(session_id = %id, "session registered with voice manager");
        Ok((ice_candidate_rx, entry))
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<ManagedSession>> {
        self.sessions.read().get(id).cloned()
    }

    /// Removes the session from the map and closes its peer transport.
    /// Idempotent: a second call on the same ID is a no-op.
    pub async fn remove(&self, id: &SessionId) {
        let entry = self.sessions.write().remove(id);
        if let Some(entry) = entry {
            entry.peer.close().await;
            info!(session_id = %id, "session removed from voice manager");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
