//! The speech-to-text seam (§1: "treated as streaming codecs invoked by
//! the session"). The session only ever needs to push inbound audio in
//! and read speech-start/final-utterance events back out; a concrete STT
//! provider is whatever the embedding binary wires up.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Turn-detection knobs the session's barge-in policy propagates to STT
/// (§4.3: `MinSilenceForEnd`).
#[derive(Debug, Clone, Copy)]
pub struct TurnDetectionConfig {
    pub min_silence_for_end: Duration,
}

#[derive(Debug, Clone)]
pub enum SttEvent {
    SpeechStart,
    FinalUtterance(String),
}

/// A live recognition stream: the session feeds it inbound RTP payloads
/// and drains [`SttEvent`]s for the lifetime of the call.
pub struct SttHandle {
    pub audio_in: mpsc::Sender<Bytes>,
    pub events: mpsc::Receiver<SttEvent>,
}

#[async_trait]
pub trait SttEngine: Send + Sync {
    async fn start(&self, turn_detection: TurnDetectionConfig) -> SttHandle;
}
