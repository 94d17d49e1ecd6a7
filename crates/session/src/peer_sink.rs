//! Narrows [`voice_agent_transport::PeerTransport`] down to the handful of
//! operations the session actually drives, so tests can exercise the state
//! machine against an in-memory double instead of a live peer connection.

use async_trait::async_trait;
use serde_json::Value;
use voice_agent_core::AudioChunk;
use voice_agent_transport::PeerTransport;

#[async_trait]
pub trait PeerSink: Send + Sync {
    async fn send_event(&self, value: &Value);
    fn send_audio(&self, chunk: AudioChunk);
    fn stop_tts(&self);
    async fn flush_audio_queue(&self) -> u64;
    fn resume_output(&self);
    async fn wait_for_audio_drain(&self);
    async fn close(&self);
}

#[async_trait]
impl PeerSink for PeerTransport {
    async fn send_event(&self, value: &Value) {
        PeerTransport::send_event(self, value).await
    }

    fn send_audio(&self, chunk: AudioChunk) {
        PeerTransport::send_audio(self, chunk)
    }

    fn stop_tts(&self) {
        PeerTransport::stop_tts(self)
    }

    async fn flush_audio_queue(&self) -> u64 {
        PeerTransport::flush_audio_queue(self).await
    }

    fn resume_output(&self) {
        PeerTransport::resume_output(self)
    }

    async fn wait_for_audio_drain(&self) {
        PeerTransport::wait_for_audio_drain(self).await
    }

    async fn close(&self) {
        PeerTransport::close(self).await
    }
}
