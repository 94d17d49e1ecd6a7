//! The text-to-speech seam, mirrored with [`crate::stt`]: text deltas in,
//! paced Opus chunks out. The session forwards `audio_out` straight to
//! the peer transport's output queue.

use async_trait::async_trait;
use tokio::sync::mpsc;
use voice_agent_core::AudioChunk;

/// A live synthesis stream for one agent reply. Dropping `text_in`
/// signals end-of-input; the engine finishes synthesizing whatever text
/// it already has and then closes `audio_out`, which is how the session
/// knows the reply has fully drained.
pub struct TtsHandle {
    pub text_in: mpsc::Sender<String>,
    pub audio_out: mpsc::Receiver<AudioChunk>,
}

#[async_trait]
pub trait TtsEngine: Send + Sync {
    async fn start(&self) -> TtsHandle;
}
