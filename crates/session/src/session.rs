//! The Voice Session state machine (§4.3): wires STT ingress through the
//! Smart Router and Agent Bridge to TTS and the peer's paced output queue,
//! and implements turn detection / barge-in.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use voice_agent_bridge::{is_response_kind, utterance_envelope};
use voice_agent_config::BargeInConfig;
use voice_agent_core::{new_request_id, AgentMessage, AudioChunk, MessageKind, SessionId};
use voice_agent_router::{AgentProfile, SmartRouter};
use voice_agent_transport::TransportEvent;

use crate::error::{Result, SessionError};
use crate::peer_sink::PeerSink;
use crate::reply_bridge::ReplyBridge;
use crate::response_router::ResponseRouter;
use crate::stt::{SttEngine, SttEvent, TurnDetectionConfig};
use crate::tts::TtsEngine;

/// How often the session refreshes its bridge response subscription.
/// Comfortably under the 30-minute TTL the sweeper (§4.5) evicts on, so a
/// call running longer than that never silently loses its response
/// channel.
const SESSION_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Public view of the state machine's current phase (§4.3 table). `Idle`
/// only ever exists before [`VoiceSession::spawn`] returns: by the time a
/// session object exists its peer is already connected, so it starts
/// directly in `Listening` with STT already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Listening,
    Thinking,
    Speaking,
    Terminal,
}

enum Phase {
    Listening,
    Thinking {
        request_id: Uuid,
        agent_id: String,
    },
    Speaking {
        request_id: Uuid,
        agent_id: String,
        /// Taken (and dropped) when the agent's `response.done` arrives,
        /// signaling the TTS engine there is no more text coming.
        text_in: Option<mpsc::Sender<String>>,
        tts_task: JoinHandle<()>,
        entered_at: Instant,
    },
    Terminal,
}

enum LifecycleEvent {
    /// The TTS forwarding task drained fully and already emitted
    /// `response.done` to the client; time to go back to Listening.
    ReplyFinished { request_id: Uuid },
}

pub struct VoiceSession {
    id: SessionId,
    owning_user_id: String,
    peer: Arc<dyn PeerSink>,
    bridge: Arc<dyn ReplyBridge>,
    router: Arc<SmartRouter>,
    response_router: Arc<ResponseRouter>,
    tts_engine: Arc<dyn TtsEngine>,
    agent_ids: Vec<String>,
    barge_in: BargeInConfig,
    phase: Mutex<Phase>,
}

impl VoiceSession {
    /// Starts STT, subscribes to the bridge's response channel for this
    /// session, and spawns the run loop. The peer transport is assumed
    /// already connected (§3: "created by the session starter").
    #[allow(clippy::too_many_arguments)]
    pub async fn spawn(
        id: SessionId,
        owning_user_id: String,
        peer: Arc<dyn PeerSink>,
        peer_events: mpsc::Receiver<TransportEvent>,
        bridge: Arc<dyn ReplyBridge>,
        response_router: Arc<ResponseRouter>,
        router: Arc<SmartRouter>,
        stt_engine: Arc<dyn SttEngine>,
        tts_engine: Arc<dyn TtsEngine>,
        agent_profiles: Vec<AgentProfile>,
        barge_in: BargeInConfig,
    ) -> Result<Arc<Self>> {
        let id_hex = id.as_hex();
        bridge
            .subscribe_to_session(&id_hex)
            .await
            .map_err(SessionError::Bridge)?;
        let response_rx = response_router.register(id_hex.clone());

        // §4.6: the index is rebuilt wholesale whenever the eligible-agent
        // set for a session is established, so scoring actually runs
        // instead of always falling through to the health-based pick.
        router.rebuild_index(&agent_profiles);
        let agent_ids: Vec<String> = agent_profiles.into_iter().map(|p| p.agent_id).collect();

        let stt_handle = stt_engine
            .start(TurnDetectionConfig {
                min_silence_for_end: barge_in.min_silence_for_end(),
            })
            .await;

        let session = Arc::new(Self {
            id,
            owning_user_id,
            peer,
            bridge,
            router,
            response_router,
            tts_engine,
            agent_ids,
            barge_in,
            phase: Mutex::new(Phase::Listening),
        });

        let run_session = session.clone();
        tokio::spawn(async move {
            run_session
                .run(peer_events, stt_handle.events, stt_handle.audio_in, response_rx)
                .await;
        });

        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        match &*self.phase.lock() {
            Phase::Listening => SessionState::Listening,
            Phase::Thinking { .. } => SessionState::Thinking,
            Phase::Speaking { .. } => SessionState::Speaking,
            Phase::Terminal => SessionState::Terminal,
        }
    }

    pub fn in_flight_request_id(&self) -> Option<Uuid> {
        match &*self.phase.lock() {
            Phase::Thinking { request_id, .. } | Phase::Speaking { request_id, .. } => {
                Some(*request_id)
            }
            _ => None,
        }
    }

    async fn run(
        self: Arc<Self>,
        mut peer_events: mpsc::Receiver<TransportEvent>,
        mut stt_events: mpsc::Receiver<SttEvent>,
        stt_audio_in: mpsc::Sender<Bytes>,
        mut response_rx: mpsc::Receiver<AgentMessage>,
    ) {
        let (lifecycle_tx, mut lifecycle_rx) = mpsc::channel::<LifecycleEvent>(4);
        let mut refresh_ticker = tokio::time::interval(SESSION_REFRESH_INTERVAL);
        refresh_ticker.reset();

        loop {
            tokio::select! {
                _ = refresh_ticker.tick() => {
                    self.bridge.refresh_session_subscription(&self.id.as_hex()).await;
                }
                event = peer_events.recv() => {
                    match event {
                        Some(TransportEvent::Audio { payload, .. }) => {
                            let _ = stt_audio_in.send(payload).await;
                        }
                        Some(TransportEvent::Video { .. }) => {}
                        Some(TransportEvent::Signal(value)) => {
                            self.handle_signal(value).await;
                            if self.state() == SessionState::Terminal {
                                break;
                            }
                        }
                        Some(TransportEvent::Failed) | Some(TransportEvent::Closed) | None => {
                            self.close().await;
                            break;
                        }
                    }
                }
                event = stt_events.recv() => {
                    match event {
                        Some(SttEvent::SpeechStart) => self.on_speech_start().await,
                        Some(SttEvent::FinalUtterance(text)) => self.on_final_utterance(text).await,
                        None => break,
                    }
                }
                msg = response_rx.recv() => {
                    match msg {
                        Some(msg) => self.on_agent_message(msg, lifecycle_tx.clone()).await,
                        None => break,
                    }
                }
                event = lifecycle_rx.recv() => {
                    match event {
                        Some(event) => self.on_lifecycle(event).await,
                        None => {}
                    }
                }
            }
        }

        info!(session_id = %self.id, "session run loop exited");
    }

    async fn handle_signal(&self, value: Value) {
        if value.get("type").and_then(Value::as_str) == Some("session_end") {
            self.close().await;
        }
    }

    async fn on_speech_start(&self) {
        enum Action {
            EmitListening,
            BargeIn,
            None,
        }

        let action = {
            let phase = self.phase.lock();
            match &*phase {
                Phase::Listening => Action::EmitListening,
                Phase::Speaking { entered_at, .. }
                    if self.barge_in.allow_while_speaking
                        && entered_at.elapsed() >= self.barge_in.debounce_min() =>
                {
                    Action::BargeIn
                }
                _ => Action::None,
            }
        };

        match action {
            Action::EmitListening => {
                self.peer.send_event(&json!({ "type": "input.speech.started" })).await;
            }
            Action::BargeIn => self.trigger_barge_in().await,
            Action::None => {}
        }
    }

    /// Barge-in sequence, §4.3: stop TTS, flush queued audio, cancel the
    /// in-flight agent request, notify the client, and resume listening.
    async fn trigger_barge_in(&self) {
        self.peer.stop_tts();
        let drained = self.peer.flush_audio_queue().await;
        if drained > 0 {
            metrics::counter!("voice_agent_session_barge_in_frames_dropped_total").increment(drained);
        }

        let previous = std::mem::replace(&mut *self.phase.lock(), Phase::Listening);
        if let Phase::Speaking { request_id, agent_id, tts_task, .. } = previous {
            tts_task.abort();
            self.bridge.publish_cancellation(&agent_id, &self.id.as_hex(), "user_barge_in");
            self.peer
                .send_event(&json!({ "type": "response.cancelled", "request_id": request_id }))
                .await;
        }

        self.peer.resume_output();
    }

    async fn on_final_utterance(&self, text: String) {
        if !matches!(&*self.phase.lock(), Phase::Listening) {
            return;
        }

        let ranked = self.router.route(&text, &self.agent_ids);
        let Some(agent_id) = ranked.into_iter().next() else {
            debug!(session_id = %self.id, "no agent available for utterance");
            return;
        };

        let request_id = new_request_id();
        let envelope = utterance_envelope(
            text,
            request_id,
            self.id.as_hex(),
            agent_id.clone(),
            self.owning_user_id.clone(),
        );
        self.bridge.publish_utterance(envelope);
        *self.phase.lock() = Phase::Thinking { request_id, agent_id };
    }

    async fn on_agent_message(
        self: &Arc<Self>,
        msg: AgentMessage,
        lifecycle_tx: mpsc::Sender<LifecycleEvent>,
    ) {
        if !is_response_kind(&msg.kind) {
            return;
        }
        match msg.kind {
            MessageKind::ResponseDone => self.on_response_done(msg).await,
            // A bare `response` is a one-shot equivalent of delta+done: feed
            // its text to the TTS engine, then immediately finalize so the
            // engine's input closes and `response.done` still fires.
            MessageKind::Response => {
                self.on_response_delta(msg.clone(), lifecycle_tx).await;
                self.on_response_done(msg).await;
            }
            _ => self.on_response_delta(msg, lifecycle_tx).await,
        }
    }

    async fn on_response_delta(
        self: &Arc<Self>,
        msg: AgentMessage,
        lifecycle_tx: mpsc::Sender<LifecycleEvent>,
    ) {
        let Some(request_id) = msg.request_id else { return };
        let text = msg
            .payload
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let needs_start = match &*self.phase.lock() {
            Phase::Thinking { request_id: rid, .. } if *rid == request_id => true,
            Phase::Speaking { request_id: rid, .. } if *rid == request_id => false,
            _ => return,
        };

        if needs_start {
            self.start_speaking(request_id, text, lifecycle_tx).await;
            return;
        }

        let text_in = match &*self.phase.lock() {
            Phase::Speaking { text_in: Some(tx), .. } => Some(tx.clone()),
            _ => None,
        };
        if let Some(tx) = text_in {
            let _ = tx.send(text).await;
        }
    }

    async fn on_response_done(&self, msg: AgentMessage) {
        let Some(request_id) = msg.request_id else { return };
        let mut phase = self.phase.lock();
        if let Phase::Speaking { request_id: rid, text_in, .. } = &mut *phase {
            if *rid == request_id {
                // Dropping the sender signals the TTS engine there is no
                // more text; the forwarding task emits `response.done`
                // once the engine's audio output fully drains.
                text_in.take();
            }
        }
    }

    async fn start_speaking(
        self: &Arc<Self>,
        request_id: Uuid,
        first_delta: String,
        lifecycle_tx: mpsc::Sender<LifecycleEvent>,
    ) {
        let agent_id = match &*self.phase.lock() {
            Phase::Thinking { agent_id, .. } => agent_id.clone(),
            _ => return,
        };

        let handle = self.tts_engine.start().await;
        let text_in = handle.text_in;
        let peer = self.peer.clone();
        let tts_task = tokio::spawn(run_tts_forwarding(peer, handle.audio_out, request_id, lifecycle_tx));

        if text_in.send(first_delta).await.is_err() {
            debug!(session_id = %self.id, "tts engine closed before first delta");
        }

        *self.phase.lock() = Phase::Speaking {
            request_id,
            agent_id,
            text_in: Some(text_in),
            tts_task,
            entered_at: Instant::now(),
        };
    }

    async fn on_lifecycle(&self, event: LifecycleEvent) {
        let LifecycleEvent::ReplyFinished { request_id } = event;
        let mut phase = self.phase.lock();
        if let Phase::Speaking { request_id: rid, .. } = &*phase {
            if *rid == request_id {
                *phase = Phase::Listening;
            }
        }
    }

    /// Idempotent: cancels any in-flight reply, flushes and closes the
    /// peer transport, and tears down the bridge subscription.
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.phase.lock(), Phase::Terminal);
        if let Phase::Speaking { tts_task, .. } = previous {
            tts_task.abort();
        }
        self.peer.close().await;
        self.bridge.unsubscribe_from_session(&self.id.as_hex()).await;
        self.response_router.unregister(&self.id.as_hex());
        info!(session_id = %self.id, "session closed");
    }
}

async fn run_tts_forwarding(
    peer: Arc<dyn PeerSink>,
    mut audio_out: mpsc::Receiver<AudioChunk>,
    request_id: Uuid,
    lifecycle_tx: mpsc::Sender<LifecycleEvent>,
) {
    while let Some(chunk) = audio_out.recv().await {
        peer.send_audio(chunk);
    }
    peer.wait_for_audio_drain().await;
    peer.send_event(&json!({ "type": "response.done", "request_id": request_id })).await;
    let _ = lifecycle_tx.send(LifecycleEvent::ReplyFinished { request_id }).await;
}
