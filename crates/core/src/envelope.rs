//! The `AgentMessage` wire envelope exchanged over the broker's per-agent
//! request channels and per-session response channels.
//!
//! The source system uses dynamic payload maps for every message; here
//! `type` becomes a proper Rust enum with a fallthrough variant so unknown
//! message types still round-trip, while `payload` stays a free-form JSON
//! value at the envelope level (see design note in §9 of the spec).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// The `type` discriminant of an [`AgentMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Utterance,
    Response,
    ResponseDelta,
    ResponseDone,
    Interrupt,
    SessionStart,
    SessionEnd,
    AgentStatus,
    Error,
    VoiceStart,
    VoiceEnd,
    AudioFrame,
    SpeechStart,
    SpeechEnd,
    Transcript,
    TtsStart,
    TtsEnd,
    FrameRequest,
    FrameResponse,
    /// Any type not in the known set above; the original string is kept
    /// so the envelope still round-trips.
    Other(String),
}

impl MessageKind {
    fn as_wire_str(&self) -> &str {
        match self {
            Self::Utterance => "utterance",
            Self::Response => "response",
            Self::ResponseDelta => "response.delta",
            Self::ResponseDone => "response.done",
            Self::Interrupt => "interrupt",
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::AgentStatus => "agent_status",
            Self::Error => "error",
            Self::VoiceStart => "voice_start",
            Self::VoiceEnd => "voice_end",
            Self::AudioFrame => "audio_frame",
            Self::SpeechStart => "speech_start",
            Self::SpeechEnd => "speech_end",
            Self::Transcript => "transcript",
            Self::TtsStart => "tts_start",
            Self::TtsEnd => "tts_end",
            Self::FrameRequest => "frame_request",
            Self::FrameResponse => "frame_response",
            Self::Other(s) => s.as_str(),
        }
    }

    fn from_wire_str(s: &str) -> Self {
        match s {
            "utterance" => Self::Utterance,
            "response" => Self::Response,
            "response.delta" => Self::ResponseDelta,
            "response.done" => Self::ResponseDone,
            "interrupt" => Self::Interrupt,
            "session_start" => Self::SessionStart,
            "session_end" => Self::SessionEnd,
            "agent_status" => Self::AgentStatus,
            "error" => Self::Error,
            "voice_start" => Self::VoiceStart,
            "voice_end" => Self::VoiceEnd,
            "audio_frame" => Self::AudioFrame,
            "speech_start" => Self::SpeechStart,
            "speech_end" => Self::SpeechEnd,
            "transcript" => Self::Transcript,
            "tts_start" => Self::TtsStart,
            "tts_end" => Self::TtsEnd,
            "frame_request" => Self::FrameRequest,
            "frame_response" => Self::FrameResponse,
            other => Self::Other(other.to_string()),
        }
    }
}

impl Serialize for MessageKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire_str())
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_wire_str(&s))
    }
}

/// The envelope published on `agent:{agent_id}:requests` and
/// `session:{session_id}:responses` (see §6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub request_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    pub room_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl AgentMessage {
    fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            request_id: None,
            session_id: None,
            agent_id: None,
            user_id: None,
            room_id: None,
            timestamp: Utc::now(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_request_id(mut self, id: Uuid) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_agent_id(mut self, id: impl Into<String>) -> Self {
        self.agent_id = Some(id.into());
        self
    }

    pub fn with_user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn utterance(text: impl Into<String>) -> Self {
        Self::new(MessageKind::Utterance).with_payload(serde_json::json!({ "text": text.into() }))
    }

    pub fn response_delta(text: impl Into<String>) -> Self {
        Self::new(MessageKind::ResponseDelta)
            .with_payload(serde_json::json!({ "text": text.into() }))
    }

    pub fn response_done() -> Self {
        Self::new(MessageKind::ResponseDone)
    }

    /// Barge-in interrupt envelope, per §4.3 step 3.
    pub fn interrupt(reason: impl Into<String>) -> Self {
        Self::new(MessageKind::Interrupt)
            .with_payload(serde_json::json!({ "reason": reason.into() }))
    }
}

/// Broker channel name for an agent's request subscription.
pub fn agent_request_channel(agent_id: &str) -> String {
    format!("agent:{agent_id}:requests")
}

/// Broker channel name for a session's response subscription.
pub fn session_response_channel(session_id: &str) -> String {
    format!("session:{session_id}:responses")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_message_type_round_trips() {
        let msg = AgentMessage::utterance("what time is it").with_session_id("abc");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "utterance");
        let back: AgentMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind, MessageKind::Utterance);
        assert_eq!(back.session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn response_delta_uses_dotted_wire_name() {
        let msg = AgentMessage::response_delta("It is ");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "response.delta");
    }

    #[test]
    fn unknown_type_round_trips_via_other() {
        let json = serde_json::json!({
            "type": "some_future_type",
            "request_id": null,
            "session_id": null,
            "agent_id": null,
            "user_id": null,
            "room_id": null,
            "timestamp": "2026-01-01T00:00:00Z",
            "payload": {"x": 1},
        });
        let msg: AgentMessage = serde_json::from_value(json).unwrap();
        assert_eq!(msg.kind, MessageKind::Other("some_future_type".to_string()));
        let back = serde_json::to_value(&msg).unwrap();
        assert_eq!(back["type"], "some_future_type");
        assert_eq!(back["payload"]["x"], 1);
    }

    #[test]
    fn channel_names_match_broker_convention() {
        assert_eq!(agent_request_channel("weather-bot"), "agent:weather-bot:requests");
        assert_eq!(
            session_response_channel("deadbeef"),
            "session:deadbeef:responses"
        );
    }
}
