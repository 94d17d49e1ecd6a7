//! Peer transport: one real-time peer connection, its outbound audio
//! track, control data channel, and inbound audio/video (§4.2).

pub mod error;
pub mod events;
pub mod framing;
pub mod peer;
pub mod video;

pub use error::{Result, TransportError};
pub use events::{DataChannelMessage, IceCandidateInit, TransportEvent};
pub use framing::{RtpFramer, RtpStamp};
pub use peer::PeerTransport;
