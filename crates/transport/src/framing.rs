//! RTP sequence/timestamp bookkeeping for the outbound audio track.
//!
//! `webrtc`'s `TrackLocalStaticSample` already packetizes each `Sample`
//! into RTP internally, but the invariant in §8 ("RTP sequence numbers
//! advance strictly monotonically by 1 per frame, timestamps by the
//! frame's samples") is one the session and its tests need to reason
//! about independent of that internal packetizer. `RtpFramer` is the pure,
//! directly-testable piece that derives those header fields from a
//! stream of Opus packets; [`PeerTransport`](crate::peer::PeerTransport)
//! advances one per outbound frame and stamps its metrics/logging with
//! the result.

use voice_agent_core::OpusFraming;

/// One RTP header snapshot for a frame about to go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpStamp {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

/// Tracks the next sequence number and timestamp for one outbound track.
pub struct RtpFramer {
    ssrc: u32,
    next_sequence_number: u16,
    next_timestamp: u32,
}

impl RtpFramer {
    /// `ssrc` should come from [`voice_agent_core::new_ssrc`] at transport
    /// creation time (§6.5: "Agent RTP SSRC: 4 random bytes").
    pub fn new(ssrc: u32) -> Self {
        Self {
            ssrc,
            next_sequence_number: 0,
            next_timestamp: 0,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Derives the framing for `payload` via the Opus TOC byte, stamps
    /// the current sequence/timestamp, and advances both for the next
    /// call.
    pub fn advance(&mut self, payload: &[u8]) -> (RtpStamp, OpusFraming) {
        let framing = OpusFraming::from_packet(payload);
        let stamp = RtpStamp {
            sequence_number: self.next_sequence_number,
            timestamp: self.next_timestamp,
            ssrc: self.ssrc,
        };
        self.next_sequence_number = self.next_sequence_number.wrapping_add(1);
        self.next_timestamp = self.next_timestamp.wrapping_add(framing.samples);
        (stamp, framing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_advances_by_one_per_frame() {
        let mut framer = RtpFramer::new(0xDEADBEEF);
        let (s0, _) = framer.advance(&[0x00]); // 10ms SILK NB, 1 frame
        let (s1, _) = framer.advance(&[0x00]);
        let (s2, _) = framer.advance(&[0x00]);
        assert_eq!(s0.sequence_number, 0);
        assert_eq!(s1.sequence_number, 1);
        assert_eq!(s2.sequence_number, 2);
    }

    #[test]
    fn timestamp_advances_by_frame_samples() {
        let mut framer = RtpFramer::new(1);
        // config=1 (SILK NB 20ms), code=0 -> 960 samples
        let toc = (1u8 << 3) | 0b000;
        let (s0, f0) = framer.advance(&[toc]);
        let (s1, _) = framer.advance(&[toc]);
        assert_eq!(f0.samples, 960);
        assert_eq!(s0.timestamp, 0);
        assert_eq!(s1.timestamp, 960);
    }

    #[test]
    fn empty_packet_advances_by_default_20ms() {
        let mut framer = RtpFramer::new(1);
        let (_, framing) = framer.advance(&[]);
        assert_eq!(framing.samples, 960);
    }

    #[test]
    fn ssrc_stays_constant_across_frames() {
        let mut framer = RtpFramer::new(0xCAFEBABE);
        let (s0, _) = framer.advance(&[0x00]);
        let (s1, _) = framer.advance(&[0x00]);
        assert_eq!(s0.ssrc, 0xCAFEBABE);
        assert_eq!(s1.ssrc, 0xCAFEBABE);
    }
}
