//! Data-channel wire envelopes (§6.2) and the bounded-channel event
//! contract that replaces passing raw callbacks across the peer boundary.
//!
//! Inbound JSON on the control data channel is always `{type, ...extra}`.
//! `ice.candidate` and `offer`/`sdp.offer` are handled inline by
//! [`PeerTransport`](crate::peer::PeerTransport) for renegotiation and ICE
//! trickle; everything else is forwarded to the owning session untouched
//! as [`TransportEvent::Signal`].

use serde_json::Value;

/// An ICE candidate as carried in the `ice.candidate` envelope. Kept as an
/// opaque JSON value: the transport never inspects candidate fields, it
/// only threads them between the local ICE gatherer and the data channel.
pub type IceCandidateInit = Value;

/// A parsed `{type, ...}` envelope. Built by hand in
/// [`parse_data_channel_message`] rather than via `#[serde(tag = "type")]`
/// because the fallthrough `Opaque` case needs the whole value, which
/// serde's internally-tagged representation can't hand back once a known
/// tag match has consumed it.
#[derive(Debug, Clone)]
pub enum DataChannelMessage {
    IceCandidate { candidate: IceCandidateInit },
    Offer { sdp: String },
    SdpOffer { sdp: String },
    Answer { sdp: String },
    /// Any other envelope shape; forwarded to the session opaque.
    Opaque(Value),
}

/// Events a [`PeerTransport`](crate::peer::PeerTransport) pushes to its
/// owning session over a bounded channel (§9: never a raw callback the
/// transport blocks on).
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// An opaque data-channel envelope the transport didn't handle itself.
    Signal(Value),
    /// One inbound audio RTP payload (already de-packetized).
    Audio { payload: bytes::Bytes, timestamp: u32 },
    /// One inbound video payload selected per the screen-share preference.
    Video { payload: bytes::Bytes, mime_type: String },
    /// ICE/peer-connection state moved to Failed or Disconnected; the
    /// transport has already started closing itself.
    Failed,
    /// The peer connection closed cleanly (e.g. remote hangup).
    Closed,
}

pub(crate) fn parse_data_channel_message(raw: &[u8]) -> crate::error::Result<DataChannelMessage> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| crate::error::TransportError::Contract(format!("invalid envelope: {e}")))?;

    let msg_type = value.get("type").and_then(Value::as_str).unwrap_or("");
    let field = |name: &str| -> crate::error::Result<String> {
        value
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| {
                crate::error::TransportError::Contract(format!(
                    "envelope type {msg_type:?} missing field {name:?}"
                ))
            })
    };

    match msg_type {
        "ice.candidate" => {
            let candidate = value
                .get("candidate")
                .cloned()
                .ok_or_else(|| crate::error::TransportError::Contract("ice.candidate missing candidate".into()))?;
            Ok(DataChannelMessage::IceCandidate { candidate })
        }
        "offer" => Ok(DataChannelMessage::Offer { sdp: field("sdp")? }),
        "sdp.offer" => Ok(DataChannelMessage::SdpOffer { sdp: field("sdp")? }),
        "answer" => Ok(DataChannelMessage::Answer { sdp: field("sdp")? }),
        _ => Ok(DataChannelMessage::Opaque(value)),
    }
}
