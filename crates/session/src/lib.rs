//! The Voice Session (§4.3): one active call between a caller and an
//! agent, mediating STT, the Smart Router, the Agent Bridge, and TTS over
//! a single peer transport.

pub mod error;
pub mod peer_sink;
pub mod reply_bridge;
pub mod response_router;
pub mod session;
pub mod stt;
pub mod tts;

pub use error::{Result, SessionError};
pub use peer_sink::PeerSink;
pub use reply_bridge::ReplyBridge;
pub use response_router::ResponseRouter;
pub use session::{SessionState, VoiceSession};
pub use stt::{SttEngine, SttEvent, SttHandle, TurnDetectionConfig};
pub use tts::{TtsEngine, TtsHandle};
