//! Frame and media parameter types
//!
//! A [`Frame`] is immutable once created. All sessions fanned out to share the
//! same payload allocation through `Bytes` reference counting.

use bytes::Bytes;

use crate::media::h264::{self, NaluType};
use crate::media::sps::SpsInfo;

/// 90 kHz clock rate used for H.264 timestamps
pub const CLOCK_RATE: u32 = 90_000;

/// One H.264 access unit moving through the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Annex-B bytes, starting with a 4-byte start code
    pub payload: Bytes,
    /// Timestamp in 90 kHz ticks
    pub timestamp: u32,
    /// Whether a decoder can start from this frame
    pub is_keyframe: bool,
    /// Monotonic per-stream index assigned by the producer
    pub sequence_index: u64,
}

impl Frame {
    /// Create a frame with an explicit keyframe flag
    pub fn new(payload: Bytes, timestamp: u32, is_keyframe: bool, sequence_index: u64) -> Self {
        Self {
            payload,
            timestamp,
            is_keyframe,
            sequence_index,
        }
    }

    /// Create a frame, deriving the keyframe flag from its NAL unit types
    pub fn from_annexb(payload: Bytes, timestamp: u32, sequence_index: u64) -> Self {
        let is_keyframe = h264::is_keyframe(&payload);
        Self::new(payload, timestamp, is_keyframe, sequence_index)
    }

    /// Copy of this frame standing in for another one.
    ///
    /// Used to serve a cached keyframe to a session that joined mid-GOP. The
    /// timestamp and index are borrowed from the live frame being replaced, which
    /// approximates the presentation time rather than reproducing it exactly.
    pub fn stand_in_for(&self, live: &Frame) -> Frame {
        Frame {
            payload: self.payload.clone(),
            timestamp: live.timestamp,
            is_keyframe: self.is_keyframe,
            sequence_index: live.sequence_index,
        }
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Ticks per frame at the given frame rate
pub fn ticks_per_frame(fps: u32) -> u32 {
    CLOCK_RATE / fps.max(1)
}

/// Denormalized media parameters a receiver reports alongside its frames
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaInfo {
    /// Frames per second
    pub fps: u32,
    /// Picture width in pixels
    pub width: u32,
    /// Picture height in pixels
    pub height: u32,
    /// SPS NAL unit without start code
    pub sps: Bytes,
    /// PPS NAL unit without start code
    pub pps: Bytes,
}

impl MediaInfo {
    /// Pick up SPS/PPS carried in an access unit.
    ///
    /// Dimensions (and the VUI frame rate, when signalled) are refreshed whenever a
    /// new SPS is seen. Returns `true` if either parameter set changed.
    pub fn absorb_parameter_sets(&mut self, payload: &[u8]) -> bool {
        let mut changed = false;

        if let Some(sps) = h264::find_nalu(payload, NaluType::Sps) {
            if sps != &self.sps[..] {
                match SpsInfo::parse(sps) {
                    Ok(info) => {
                        self.width = info.width;
                        self.height = info.height;
                        if let Some(fps) = info.fps {
                            self.fps = fps;
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, "Failed to parse SPS"),
                }
                self.sps = Bytes::copy_from_slice(sps);
                changed = true;
            }
        }

        if let Some(pps) = h264::find_nalu(payload, NaluType::Pps) {
            if pps != &self.pps[..] {
                self.pps = Bytes::copy_from_slice(pps);
                changed = true;
            }
        }

        changed
    }
}
