//! One real-time peer connection (§4.2): the outbound Opus audio track
//! paced through [`voice_agent_queue::PacedOutputQueue`], a control data
//! channel carrying JSON envelopes and ICE trickle, and inbound audio and
//! (at most one) video track forwarded to the owning session over a
//! bounded event channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage as RtcDataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use voice_agent_config::IceConfig;
use voice_agent_core::{AudioChunk, AudioFormat};
use voice_agent_queue::{BackpressureFn, FrameSink, OutputFrame, PacedOutputQueue};

use crate::error::{Result, TransportError};
use crate::events::{parse_data_channel_message, DataChannelMessage, TransportEvent};
use crate::framing::RtpFramer;
use crate::video::select_video_track;

const OPUS_MIME_TYPE: &str = "audio/opus";
const OPUS_CLOCK_RATE: u32 = 48_000;
const CONTROL_CHANNEL_LABEL: &str = "control";

/// Bridges the paced queue's drained frames onto the outbound RTP track.
/// `webrtc`'s `TrackLocalStaticSample` packetizes each `Sample` itself;
/// the framer here only tracks header fields for logging and the unit
/// tests in `framing.rs` ‒ actual wire sequencing is the track's job.
struct AudioTrackSink {
    track: Arc<TrackLocalStaticSample>,
    framer: Mutex<RtpFramer>,
}

#[async_trait]
impl FrameSink for AudioTrackSink {
    async fn write_frame(&self, frame: &OutputFrame) {
        let (stamp, _) = self.framer.lock().advance(&frame.chunk.payload);
        let sample = Sample {
            data: frame.chunk.payload.clone(),
            duration: frame.duration,
            ..Default::default()
        };
        if let Err(err) = self.track.write_sample(&sample).await {
            warn!(%err, sequence_number = stamp.sequence_number, "failed to write outbound audio sample");
        }
    }
}

/// One connected peer. Cheap to clone (an `Arc` handle); all clones share
/// the same peer connection, data channel and output queue.
pub struct PeerTransport {
    peer_connection: Arc<RTCPeerConnection>,
    data_channel: Arc<RTCDataChannel>,
    output_queue: PacedOutputQueue,
    tts_stopped: AtomicBool,
    closed: AtomicBool,
    events_tx: mpsc::Sender<TransportEvent>,
    /// `(stream_id, mime_type)` for every inbound video track seen so far,
    /// in arrival order; re-scored via [`select_video_track`] each time a
    /// new one arrives so "at most one track" holds across `on_track`
    /// calls instead of per-call.
    video_tracks: Mutex<Vec<(String, String)>>,
    selected_video_stream: Mutex<Option<String>>,
}

impl PeerTransport {
    /// Builds the peer connection from a client offer, wires up the
    /// outbound audio track and control data channel, and returns both
    /// the live transport and the SDP answer to send back out-of-band
    /// (the initial offer/answer exchange happens over HTTP/whatever
    /// signaling transport the Voice Manager uses; only renegotiation
    /// happens over the data channel itself).
    pub async fn connect(
        offer_sdp: &str,
        ice: &IceConfig,
        queue_capacity: usize,
        events_tx: mpsc::Sender<TransportEvent>,
        backpressure: BackpressureFn,
    ) -> Result<(Arc<Self>, String)> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: RTCRtpCodecCapability {
                        mime_type: OPUS_MIME_TYPE.to_string(),
                        clock_rate: OPUS_CLOCK_RATE,
                        channels: 1,
                        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                        rtcp_feedback: vec![],
                    },
                    payload_type: 111,
                    stats_id: String::new(),
                },
                RTPCodecType::Audio,
            )
            .map_err(|e| TransportError::TransientTransport(e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| TransportError::TransientTransport(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice
                .servers
                .iter()
                .map(|s| RTCIceServer {
                    urls: s.urls.clone(),
                    username: s.username.clone().unwrap_or_default(),
                    credential: s.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| TransportError::TransientTransport(e.to_string()))?,
        );

        let audio_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: OPUS_MIME_TYPE.to_string(),
                clock_rate: OPUS_CLOCK_RATE,
                channels: 1,
                ..Default::default()
            },
            "audio".to_string(),
            "voice-agent".to_string(),
        ));
        peer_connection
            .add_track(audio_track.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| TransportError::TransientTransport(e.to_string()))?;

        let sink: Arc<dyn FrameSink> = Arc::new(AudioTrackSink {
            track: audio_track,
            framer: Mutex::new(RtpFramer::new(voice_agent_core::new_ssrc())),
        });
        let output_queue = PacedOutputQueue::spawn(queue_capacity, sink, backpressure);

        let data_channel = peer_connection
            .create_data_channel(CONTROL_CHANNEL_LABEL, None)
            .await
            .map_err(|e| TransportError::TransientTransport(e.to_string()))?;

        let offer = RTCSessionDescription::offer(offer_sdp.to_string())
            .map_err(|e| TransportError::Contract(e.to_string()))?;
        peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| TransportError::TransientTransport(e.to_string()))?;
        let answer = peer_connection
            .create_answer(None)
            .await
            .map_err(|e| TransportError::TransientTransport(e.to_string()))?;
        peer_connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| TransportError::TransientTransport(e.to_string()))?;

        let transport = Arc::new(Self {
            peer_connection: peer_connection.clone(),
            data_channel: data_channel.clone(),
            output_queue,
            tts_stopped: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            events_tx,
            video_tracks: Mutex::new(Vec::new()),
            selected_video_stream: Mutex::new(None),
        });

        transport.install_handlers();

        Ok((transport, answer.sdp))
    }

    fn install_handlers(self: &Arc<Self>) {
        let this = self.clone();
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let this = this.clone();
                Box::pin(async move {
                    match state {
                        RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected => {
                            let _ = this.events_tx.send(TransportEvent::Failed).await;
                            this.close().await;
                        }
                        RTCPeerConnectionState::Closed => {
                            let _ = this.events_tx.send(TransportEvent::Closed).await;
                        }
                        _ => {}
                    }
                })
            }));

        let this = self.clone();
        self.peer_connection.on_ice_candidate(Box::new(move |candidate| {
            let this = this.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("local ICE gathering complete");
                    return;
                };
                let Ok(init) = candidate.to_json() else { return };
                let envelope = json!({ "type": "ice.candidate", "candidate": init });
                this.send_raw_event(&envelope).await;
            })
        }));

        let this = self.clone();
        self.peer_connection.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let this = this.clone();
            Box::pin(async move { this.run_inbound_track(track).await })
        }));

        let this = self.clone();
        self.data_channel.on_message(Box::new(move |msg: RtcDataChannelMessage| {
            let this = this.clone();
            Box::pin(async move { this.handle_data_channel_message(&msg.data).await })
        }));
    }

    async fn run_inbound_track(self: Arc<Self>, track: Arc<TrackRemote>) {
        let is_video = track.kind() == RTPCodecType::Video;
        let mime_type = track.codec().capability.mime_type.clone();
        let stream_id = track.stream_id();

        if is_video {
            self.register_video_track(stream_id.clone(), mime_type.clone());
        }

        loop {
            match track.read_rtp().await {
                Ok((packet, _)) => {
                    if packet.payload.is_empty() {
                        continue;
                    }
                    let event = if is_video {
                        if !self.is_selected_video_stream(&stream_id) {
                            continue;
                        }
                        TransportEvent::Video {
                            payload: packet.payload,
                            mime_type: mime_type.clone(),
                        }
                    } else {
                        TransportEvent::Audio {
                            payload: packet.payload,
                            timestamp: packet.header.timestamp,
                        }
                    };
                    if self.events_tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    debug!(%err, "inbound track read ended");
                    break;
                }
            }
        }
    }

    /// Records a newly-arrived video track and re-derives the one track to
    /// forward out of everything seen so far (§4.2: at most one track,
    /// preferring screen-share over camera).
    fn register_video_track(&self, stream_id: String, mime_type: String) {
        let mut tracks = self.video_tracks.lock();
        tracks.push((stream_id, mime_type));
        let selected = select_video_track(&tracks).map(|i| tracks[i].0.clone());
        *self.selected_video_stream.lock() = selected;
    }

    fn is_selected_video_stream(&self, stream_id: &str) -> bool {
        self.selected_video_stream
            .lock()
            .as_deref()
            .is_some_and(|selected| selected == stream_id)
    }

    async fn handle_data_channel_message(self: &Arc<Self>, raw: &[u8]) {
        let parsed = match parse_data_channel_message(raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(%err, "dropping malformed data channel message");
                return;
            }
        };

        match parsed {
            DataChannelMessage::IceCandidate { candidate } => {
                if let Err(err) = self.apply_remote_candidate(candidate).await {
                    warn!(%err, "failed to apply remote ICE candidate");
                }
            }
            DataChannelMessage::Offer { sdp } | DataChannelMessage::SdpOffer { sdp } => {
                if let Err(err) = self.renegotiate(sdp).await {
                    warn!(%err, "renegotiation failed");
                }
            }
            DataChannelMessage::Answer { .. } => {
                debug!("ignoring unexpected answer on data channel; only server answers");
            }
            DataChannelMessage::Opaque(value) => {
                let _ = self.events_tx.send(TransportEvent::Signal(value)).await;
            }
        }
    }

    async fn apply_remote_candidate(&self, candidate: Value) -> Result<()> {
        let init: RTCIceCandidateInit = serde_json::from_value(candidate)
            .map_err(|e| TransportError::Contract(format!("invalid ice candidate: {e}")))?;
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| TransportError::TransientTransport(e.to_string()))
    }

    async fn renegotiate(&self, sdp: String) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp).map_err(|e| TransportError::Contract(e.to_string()))?;
        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| TransportError::TransientTransport(e.to_string()))?;
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| TransportError::TransientTransport(e.to_string()))?;
        self.peer_connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| TransportError::TransientTransport(e.to_string()))?;
        self.send_raw_event(&json!({ "type": "answer", "sdp": answer.sdp })).await;
        Ok(())
    }

    async fn send_raw_event(&self, value: &Value) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }
        let Ok(text) = serde_json::to_string(value) else { return };
        if let Err(err) = self.data_channel.send_text(text).await {
            debug!(%err, "data channel send failed, peer likely disconnected");
        }
    }

    /// `SendEvent`: no-ops if the channel isn't connected.
    pub async fn send_event(&self, value: &Value) {
        self.send_raw_event(value).await;
    }

    /// `SendAudio`: drops the chunk unless output is running and the
    /// chunk is Opus; otherwise enqueues it onto the paced queue.
    pub fn send_audio(&self, chunk: AudioChunk) {
        if self.closed.load(Ordering::Relaxed) || self.tts_stopped.load(Ordering::Relaxed) {
            return;
        }
        if chunk.format != AudioFormat::Opus {
            warn!("dropping non-opus audio chunk");
            return;
        }
        let framing = voice_agent_core::OpusFraming::from_packet(&chunk.payload);
        self.output_queue
            .enqueue(OutputFrame::new(chunk, framing.samples, framing.duration));
    }

    pub fn pause_output(&self) {
        self.output_queue.pause();
    }

    pub fn resume_output(&self) {
        self.tts_stopped.store(false, Ordering::Relaxed);
        self.output_queue.resume();
    }

    /// `StopTTS`: drops further audio until `resume_output` clears it.
    pub fn stop_tts(&self) {
        self.tts_stopped.store(true, Ordering::Relaxed);
    }

    pub async fn flush_audio_queue(&self) -> u64 {
        self.output_queue.flush().await
    }

    pub async fn wait_for_audio_drain(&self) {
        self.output_queue.wait_for_drain().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Idempotent: releases the peer connection, closes the output queue
    /// and stops delivering further events.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("closing peer transport");
        self.output_queue.stop().await;
        if let Err(err) = self.peer_connection.close().await {
            debug!(%err, "peer connection close returned an error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct RecordingSink {
        frames: AsyncMutex<Vec<OutputFrame>>,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn write_frame(&self, frame: &OutputFrame) {
            self.frames.lock().await.push(frame.clone());
        }
    }

    // AudioTrackSink itself needs a live webrtc track, which needs a full
    // peer connection; its framing bookkeeping is exercised directly via
    // framing.rs's unit tests instead. Here we check the plain queue
    // plumbing used by send_audio/pause/stop semantics in isolation.
    #[tokio::test]
    async fn opus_chunk_enqueues_with_derived_framing() {
        let sink = Arc::new(RecordingSink::default());
        let drops = Arc::new(AtomicU64::new(0));
        let drops_clone = drops.clone();
        let backpressure: BackpressureFn = Arc::new(move |n| {
            drops_clone.fetch_add(n, Ordering::SeqCst);
        });
        let queue = PacedOutputQueue::spawn(8, sink.clone(), backpressure);

        let framing = voice_agent_core::OpusFraming::from_packet(&[0x00]);
        queue.enqueue(OutputFrame::new(AudioChunk::opus(vec![0x00]), framing.samples, framing.duration));
        queue.wait_for_drain().await;

        assert_eq!(sink.frames.lock().await.len(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        queue.stop().await;
    }
}
