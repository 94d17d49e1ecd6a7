//! Opus framing helpers and the audio chunk/frame types shared by the
//! transport, session and queue crates.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Codec carried by an [`AudioChunk`]. The gateway only ever negotiates
/// Opus for the outbound/inbound peer tracks; the variant still exists so
/// malformed or future chunk formats can be rejected explicitly rather than
/// assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Opus,
}

/// One unit of TTS (or any producer's) output audio, prior to pacing.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub format: AudioFormat,
    pub payload: bytes_compat::Bytes,
}

impl AudioChunk {
    pub fn opus(payload: impl Into<bytes_compat::Bytes>) -> Self {
        Self {
            format: AudioFormat::Opus,
            payload: payload.into(),
        }
    }
}

/// A framing decision derived from an Opus packet's TOC byte: how many
/// samples (at 48 kHz) the packet represents, and its wall-clock duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpusFraming {
    pub samples: u32,
    pub duration: Duration,
}

impl OpusFraming {
    /// Default framing used for an empty packet: 20 ms / 960 samples.
    pub fn default_20ms() -> Self {
        Self {
            samples: 960,
            duration: Duration::from_millis(20),
        }
    }

    /// Parses the TOC byte (and, for frame-count code 3, the following
    /// byte) of an Opus packet to determine its total duration and sample
    /// count at 48 kHz, per the RFC 6716 TOC layout:
    ///
    /// bits 7..3 = configuration number (0..31), bit 2 = stereo flag,
    /// bits 1..0 = frame count code.
    pub fn from_packet(payload: &[u8]) -> Self {
        let Some(&toc) = payload.first() else {
            return Self::default_20ms();
        };

        let config = toc >> 3;
        let code = toc & 0x3;
        let per_frame_ms = config_duration_ms(config);

        let frame_count: u32 = match code {
            0 => 1,
            1 | 2 => 2,
            3 => match payload.get(1) {
                Some(&b) => {
                    let count = (b & 0x3f) as u32;
                    if count == 0 {
                        1
                    } else {
                        count
                    }
                }
                None => 1,
            },
            _ => unreachable!("frame count code is a 2-bit field"),
        };

        let duration_ms = per_frame_ms * frame_count as f32;
        let samples = (duration_ms * 48.0).round() as u32;
        Self {
            samples,
            duration: Duration::from_secs_f32(duration_ms / 1000.0),
        }
    }
}

/// Per-frame duration in milliseconds for each Opus TOC configuration
/// number, per the table in RFC 6716 §3.1.
fn config_duration_ms(config: u8) -> f32 {
    const SILK_DURATIONS: [f32; 4] = [10.0, 20.0, 40.0, 60.0];
    const HYBRID_DURATIONS: [f32; 2] = [10.0, 20.0];
    const CELT_DURATIONS: [f32; 4] = [2.5, 5.0, 10.0, 20.0];

    match config {
        0..=3 => SILK_DURATIONS[config as usize],
        4..=7 => SILK_DURATIONS[(config - 4) as usize],
        8..=11 => SILK_DURATIONS[(config - 8) as usize],
        12..=13 => HYBRID_DURATIONS[(config - 12) as usize],
        14..=15 => HYBRID_DURATIONS[(config - 14) as usize],
        16..=19 => CELT_DURATIONS[(config - 16) as usize],
        20..=23 => CELT_DURATIONS[(config - 20) as usize],
        24..=27 => CELT_DURATIONS[(config - 24) as usize],
        28..=31 => CELT_DURATIONS[(config - 28) as usize],
        _ => unreachable!("configuration number is a 5-bit field"),
    }
}

/// Re-exported so downstream crates don't need to pick their own `bytes`
/// version to match this crate's chunk payload type.
pub mod bytes_compat {
    pub use bytes::Bytes;
}
