//! Shared error taxonomy for the voice agent gateway.
//!
//! Every crate in the workspace defines its own `thiserror::Error` enum for
//! the variants of this taxonomy it can actually produce; this crate's
//! [`Error`] is the catch-all used by shared, cross-cutting types (the
//! message envelope, the Opus helpers, session identity).

use thiserror::Error;

/// Result alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared across the gateway's crates.
///
/// Variants map 1:1 onto the error taxonomy: transient transport hiccups,
/// capacity limits (always surfaced via backpressure callbacks rather than
/// this enum in steady state, but representable here for startup paths),
/// malformed-contract inputs, fatal session failures, and not-found lookups.
#[derive(Debug, Error)]
pub enum Error {
    /// A broker or peer connection hiccup; the caller should tear down and
    /// let the owner re-establish on next use.
    #[error("transient transport error: {0}")]
    TransientTransport(String),

    /// A capacity limit was hit (bounded channel full, subscription cap
    /// reached). Steady-state callers should prefer a backpressure callback
    /// over this variant; it exists for capacity checks at creation time.
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// Malformed input that violates a wire contract: bad envelope JSON,
    /// unknown message type, SDP that failed to parse.
    #[error("contract violation: {0}")]
    Contract(String),

    /// The session (or another long-lived resource) has entered a
    /// terminal, unrecoverable state.
    #[error("fatal session error: {0}")]
    FatalSession(String),

    /// A lookup (session, agent) found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
