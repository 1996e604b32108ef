//! Stream entry and fan-out
//!
//! This module defines the per-stream state stored in the live registry and the
//! fan-out step that copies each produced frame into every session's queue.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;

use crate::receiver::{Receiver, ReceiverKind};

use super::frame::{Frame, MediaInfo};
use super::output::{Output, OutputProtocol};
use super::session::{Delivery, Session, SessionInfo};

/// Result of fanning one frame out to a stream's sessions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Sessions the frame (or a stand-in keyframe) was queued for
    pub delivered: usize,
    /// Sessions whose queue was full
    pub dropped: usize,
    /// Sessions still waiting for a keyframe
    pub skipped: usize,
    /// Sessions whose consumer went away
    pub closed: usize,
}

/// Entry for a single live stream in the registry
pub struct StreamEntry {
    pub(crate) id: String,
    pub(crate) uri: String,

    /// Whether the producer advanced during the last liveness sample
    pub(crate) input_status: bool,

    /// Most recent keyframe seen from the producer
    pub(crate) cached_keyframe: Option<Frame>,

    pub(crate) sessions: HashMap<String, Session>,
    pub(crate) outputs: BTreeMap<OutputProtocol, Output>,

    /// Producer, absent for push streams until one is attached
    pub(crate) receiver: Option<Receiver>,

    /// Registered with `add_push_stream` rather than with a receiver
    pub(crate) push: bool,

    /// Index of the last frame fanned out
    pub(crate) sequence_index: u64,

    pub(crate) media: MediaInfo,
    pub(crate) fmtp: String,
    pub(crate) created_at: Instant,
}

impl StreamEntry {
    pub(crate) fn new(id: &str, uri: &str) -> Self {
        Self {
            id: id.to_string(),
            uri: uri.to_string(),
            input_status: false,
            cached_keyframe: None,
            sessions: HashMap::new(),
            outputs: BTreeMap::new(),
            receiver: None,
            push: false,
            sequence_index: 0,
            media: MediaInfo::default(),
            fmtp: String::new(),
            created_at: Instant::now(),
        }
    }

    /// Number of attached sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Update metadata and the keyframe cache, then offer the frame to every session
    pub(crate) fn fan_out(&mut self, frame: Frame, media: Option<&MediaInfo>) -> FanOut {
        let params_changed = match media {
            Some(media) => self.merge_media(media),
            None if frame.is_keyframe => self.media.absorb_parameter_sets(&frame.payload),
            None => false,
        };
        if params_changed {
            self.fmtp = build_fmtp(&self.media.sps, &self.media.pps);
        }

        self.sequence_index = frame.sequence_index;
        if frame.is_keyframe {
            self.cached_keyframe = Some(frame.clone());
        }

        let mut result = FanOut::default();
        let cached = self.cached_keyframe.as_ref();
        for session in self.sessions.values_mut() {
            match session.offer(&frame, cached) {
                Delivery::Delivered => result.delivered += 1,
                Delivery::Dropped => {
                    tracing::trace!(
                        stream = %self.id,
                        session_id = %session.id(),
                        index = frame.sequence_index,
                        "Session queue full, frame dropped"
                    );
                    result.dropped += 1;
                }
                Delivery::Skipped => result.skipped += 1,
                Delivery::Closed => result.closed += 1,
            }
        }

        result
    }

    /// Merge receiver-reported parameters; returns `true` if SPS or PPS changed
    fn merge_media(&mut self, media: &MediaInfo) -> bool {
        if media.fps > 0 {
            self.media.fps = media.fps;
        }
        if media.width > 0 && media.height > 0 {
            self.media.width = media.width;
            self.media.height = media.height;
        }

        let mut changed = false;
        if !media.sps.is_empty() && media.sps != self.media.sps {
            self.media.sps = media.sps.clone();
            changed = true;
        }
        if !media.pps.is_empty() && media.pps != self.media.pps {
            self.media.pps = media.pps.clone();
            changed = true;
        }
        changed
    }

    /// Close every session; returns how many were closed
    pub(crate) fn close_sessions(&mut self) -> usize {
        let mut closed = 0;
        for (_, mut session) in self.sessions.drain() {
            if session.close() {
                closed += 1;
            }
        }
        closed
    }

    /// Stop the producer and drop all sessions
    pub(crate) fn close(&mut self) {
        if let Some(receiver) = &self.receiver {
            receiver.close();
        }
        self.close_sessions();
    }

    /// Owned snapshot of this stream
    pub fn info(&self) -> StreamInfo {
        let mut sessions: Vec<SessionInfo> = self.sessions.values().map(Session::info).collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));

        StreamInfo {
            id: self.id.clone(),
            uri: self.uri.clone(),
            input_status: self.input_status,
            sequence_index: self.sequence_index,
            fps: self.media.fps,
            width: self.media.width,
            height: self.media.height,
            has_keyframe: self.cached_keyframe.is_some(),
            fmtp: self.fmtp.clone(),
            receiver: self.receiver.as_ref().map(Receiver::kind),
            receiver_running: self.receiver.as_ref().map_or(false, Receiver::running),
            push: self.push,
            outputs: self.outputs.values().cloned().collect(),
            sessions,
            uptime: self.created_at.elapsed(),
        }
    }
}

/// Snapshot of a live stream
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub id: String,
    pub uri: String,
    pub input_status: bool,
    pub sequence_index: u64,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    /// Whether a keyframe is cached for late joiners
    pub has_keyframe: bool,
    pub fmtp: String,
    pub receiver: Option<ReceiverKind>,
    pub receiver_running: bool,
    /// Registered as a push stream, whether or not a receiver is attached yet
    pub push: bool,
    pub outputs: Vec<Output>,
    pub sessions: Vec<SessionInfo>,
    pub uptime: Duration,
}

/// SDP fmtp attribute for the given parameter sets.
///
/// Empty until both SPS and PPS are known.
pub fn build_fmtp(sps: &Bytes, pps: &Bytes) -> String {
    if sps.len() < 4 || pps.is_empty() {
        return String::new();
    }

    format!(
        "packetization-mode=1;profile-level-id={:02X}{:02X}{:02X};sprop-parameter-sets={},{}",
        sps[1],
        sps[2],
        sps[3],
        BASE64.encode(sps),
        BASE64.encode(pps)
    )
}
