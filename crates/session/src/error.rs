//! Error taxonomy for the voice session, scoped to the variants this
//! crate's public API can actually produce (§7): starting a session can
//! fail on the bridge's subscription capacity; everything else in the
//! session's steady-state (barge-in, dispatch, STT/TTS feed) drops and
//! logs rather than returning `Result`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to subscribe to session response channel: {0}")]
    Bridge(#[from] voice_agent_bridge::BridgeError),

    #[error("session {0} is already active")]
    AlreadyActive(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
