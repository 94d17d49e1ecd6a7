//! Shared types for the voice agent gateway.
//!
//! This crate provides the primitives every other crate in the workspace
//! builds on: the error taxonomy, opaque identifiers, Opus framing
//! helpers, and the `AgentMessage` broker envelope.

pub mod audio;
pub mod error;
pub mod envelope;
pub mod ids;

pub use audio::{AudioChunk, AudioFormat, OpusFraming};
pub use envelope::{agent_request_channel, session_response_channel, AgentMessage, MessageKind};
pub use error::{Error, Result};
pub use ids::{new_request_id, new_ssrc, SessionId};
