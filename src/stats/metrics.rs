//! Status snapshots for the relay
//!
//! Flat, owned views of registry state as a control plane would report them.

use std::time::Duration;

use crate::registry::{Output, ProxyInfo, SessionInfo, StreamInfo};

/// Session-level status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub session_id: String,
    pub protocol: String,
    /// Remote address, empty for connectionless transports
    pub remote_addr: String,
    pub network: String,
    /// Frames queued for the session
    pub delivered: u64,
    /// Frames dropped because the session fell behind
    pub dropped: u64,
    pub duration: Duration,
}

impl SessionStatus {
    /// Fraction of offered frames that were dropped
    pub fn drop_rate(&self) -> f64 {
        let offered = self.delivered + self.dropped;
        if offered > 0 {
            self.dropped as f64 / offered as f64
        } else {
            0.0
        }
    }
}

impl From<SessionInfo> for SessionStatus {
    fn from(info: SessionInfo) -> Self {
        Self {
            session_id: info.id,
            protocol: info.protocol,
            remote_addr: info.peer_addr.map(|a| a.to_string()).unwrap_or_default(),
            network: info.network,
            delivered: info.delivered,
            dropped: info.dropped,
            duration: info.uptime,
        }
    }
}

/// Enabled egress protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputStatus {
    pub protocol: String,
    pub enabled: bool,
    pub param: Option<String>,
}

impl From<Output> for OutputStatus {
    fn from(output: Output) -> Self {
        Self {
            protocol: output.protocol.to_string(),
            enabled: output.enabled,
            param: output.param,
        }
    }
}

/// Live stream status
#[derive(Debug, Clone)]
pub struct StreamStatus {
    pub stream_id: String,
    pub uri: String,
    pub input_status: bool,
    /// Receiver variant, `None` for a push stream awaiting its producer
    pub input_kind: Option<&'static str>,
    pub fps: u32,
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub outputs: Vec<OutputStatus>,
    pub sessions: Vec<SessionStatus>,
    pub duration: Duration,
}

impl From<StreamInfo> for StreamStatus {
    fn from(info: StreamInfo) -> Self {
        Self {
            stream_id: info.id,
            uri: info.uri,
            input_status: info.input_status,
            input_kind: info.receiver.map(|kind| kind.as_str()),
            fps: info.fps,
            index: info.sequence_index,
            width: info.width,
            height: info.height,
            outputs: info.outputs.into_iter().map(OutputStatus::from).collect(),
            sessions: info.sessions.into_iter().map(SessionStatus::from).collect(),
            duration: info.uptime,
        }
    }
}

/// Proxy stream status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyStatus {
    pub stream_id: String,
    pub proxy_uri: String,
    pub request_uri: String,
    pub remote_addr: String,
    pub network: String,
    pub protocol: String,
    pub input_status: bool,
    pub running: bool,
    pub fps: u32,
    pub index: u64,
    pub width: u32,
    pub height: u32,
}

impl From<ProxyInfo> for ProxyStatus {
    fn from(info: ProxyInfo) -> Self {
        Self {
            stream_id: info.id,
            proxy_uri: info.proxy_uri,
            request_uri: info.request_uri,
            remote_addr: info.peer_addr.map(|a| a.to_string()).unwrap_or_default(),
            network: info.network,
            protocol: info.protocol,
            input_status: info.input_status,
            running: info.running,
            fps: info.fps,
            index: info.index,
            width: info.width,
            height: info.height,
        }
    }
}

/// Relay-wide status
#[derive(Debug, Clone, Default)]
pub struct SystemStatus {
    pub uptime: Duration,
    pub live: Vec<StreamStatus>,
    pub proxy: Vec<ProxyStatus>,
}

impl SystemStatus {
    /// Live and proxy streams combined
    pub fn stream_count(&self) -> usize {
        self.live.len() + self.proxy.len()
    }

    /// Consumer sessions across live streams
    pub fn session_count(&self) -> usize {
        self.live.iter().map(|s| s.sessions.len()).sum()
    }

    /// Streams whose producer advanced during the last liveness sample
    pub fn active_inputs(&self) -> usize {
        self.live.iter().filter(|s| s.input_status).count()
            + self.proxy.iter().filter(|s| s.input_status).count()
    }

    /// Frames dropped for slow sessions across all live streams
    pub fn dropped_frames(&self) -> u64 {
        self.live
            .iter()
            .flat_map(|s| s.sessions.iter())
            .map(|s| s.dropped)
            .sum()
    }
}
