//! Error taxonomy for the peer transport, scoped to the variants this
//! crate's public API can actually produce (§7): transient connection
//! failures and malformed-contract signaling messages. Steady-state audio
//! and event dispatch never return `Result` at all — they drop-and-log.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer connection error: {0}")]
    TransientTransport(String),

    #[error("malformed signaling message: {0}")]
    Contract(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
