//! Media ingestion
//!
//! A [`Receiver`] drives one [`Source`] through the ingestion state machine:
//!
//! ```text
//!   Idle ──open──► Connecting ──ok──► Streaming
//!                   │    ▲               │
//!                 fail   │ retry         │ read error / EOF
//!                   ▼    │ interval      ▼
//!                 Retrying ◄─────────────┘   (persistent sources)
//!
//!   close() from any state ──► Stopping ──► Idle
//! ```
//!
//! One-shot (proxy) receivers skip `Retrying` and go back to `Idle`, closing
//! their frame queue so the consumer can tear the proxy stream down.
//!
//! Sources only move bytes. Frame indices, timestamps, keyframe flags and
//! parameter-set extraction are done by the driver so every variant behaves
//! the same way.

pub mod config;
pub mod driver;
pub mod file;
pub mod push;
pub mod udp;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{ReceiverError, Result};

pub use config::ReceiverConfig;
pub use driver::{IngestTarget, Receiver};
pub use file::FileSource;
pub use push::{ChannelSource, PushHandle};
pub use udp::UdpSource;

/// Ingestion variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverKind {
    /// Client pulling from a camera or media server
    PullClient,
    /// Endpoint a remote producer pushes into
    PushListener,
    /// Local file replay
    FileReplay,
    /// Pull-through on behalf of a single egress session
    ProxyRelay,
}

impl ReceiverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiverKind::PullClient => "pull",
            ReceiverKind::PushListener => "push",
            ReceiverKind::FileReplay => "file",
            ReceiverKind::ProxyRelay => "proxy",
        }
    }
}

/// Ingestion state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    Connecting,
    Streaming,
    Retrying,
    Stopping,
}

/// Connection status reported by a receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    /// Handshake succeeded
    Connected,
    /// Connection attempt or active connection failed
    Failed { error: String, will_retry: bool },
    /// Receiver stopped and released its transport
    Stopped,
}

impl ReceiverEvent {
    /// Numeric status as reported to control-plane consumers
    pub fn status_code(&self) -> u16 {
        match self {
            ReceiverEvent::Connected => 200,
            ReceiverEvent::Stopped => 201,
            ReceiverEvent::Failed { .. } => 400,
        }
    }
}

/// One access unit read from a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    /// Annex-B bytes
    pub data: Bytes,
    /// Source timestamp in 90 kHz ticks; derived from the frame rate when absent
    pub timestamp: Option<u32>,
}

impl AccessUnit {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            timestamp: None,
        }
    }
}

/// Variant-specific transport behind a [`Receiver`]
///
/// The driver wraps every call in a deadline, so implementations may block on
/// I/O freely.
#[async_trait]
pub trait Source: Send {
    /// Which ingestion variant this is
    fn kind(&self) -> ReceiverKind;

    /// Perform the variant's handshake against `uri`
    async fn connect(&mut self, uri: &str) -> Result<()>;

    /// Read the next access unit; `Ok(None)` marks end of stream
    async fn read(&mut self) -> Result<Option<AccessUnit>>;

    /// Frame rate known to the source, if any
    fn fps(&self) -> Option<u32> {
        None
    }

    /// Release the transport; called after every connection attempt ends
    async fn disconnect(&mut self) {}
}

/// Build a source for `uri` by scheme
///
/// Supports `file://<path>` and `udp://127.0.0.1:<port>` (or `localhost`).
/// Pull-protocol clients live in their protocol crates and are passed to
/// [`Receiver::new`] directly.
pub fn from_uri(uri: &str, config: &ReceiverConfig) -> Result<Box<dyn Source>> {
    let (scheme, _) = uri
        .split_once("://")
        .ok_or_else(|| ReceiverError::InvalidUri(uri.to_string()))?;

    match scheme.to_ascii_lowercase().as_str() {
        "file" => Ok(Box::new(FileSource::new(config.default_fps))),
        "udp" => {
            UdpSource::parse_uri(uri)?;
            Ok(Box::new(UdpSource::new()))
        }
        other => Err(ReceiverError::UnsupportedScheme(other.to_string()).into()),
    }
}
