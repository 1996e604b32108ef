//! H.264 media relay core
//!
//! Tracks named live streams, runs one receiver per stream to ingest H.264
//! access units, and fans every frame out to the consumer sessions attached
//! to it. Protocol front ends (RTSP, RTMP, GB28181 and others) sit on top of
//! this crate: they add sessions, read frames and publish pushed media.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use media_relay::{InputConfig, MediaRelay, RelayConfig, TransportHandle};
//!
//! #[tokio::main]
//! async fn main() -> media_relay::Result<()> {
//!     let config = RelayConfig::default()
//!         .input(InputConfig::new("cam1", "file:///var/media/cam1.h264").output("rtsp"));
//!
//!     let mut relay = MediaRelay::new(config);
//!     relay.start().await?;
//!
//!     let transport = Arc::new(TransportHandle::tcp("10.0.0.2:50000".parse().unwrap()));
//!     relay.live().add_session("cam1", "session-1", "rtsp", transport).await?;
//!     let mut frames = relay.live().get_frames("cam1", "session-1").await?;
//!
//!     while let Some(frame) = frames.recv().await {
//!         println!("frame {} ({} bytes)", frame.sequence_index, frame.size());
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod media;
pub mod monitor;
pub mod receiver;
pub mod registry;
pub mod server;
pub mod stats;

pub use error::{Error, MediaError, ReceiverError, Result};
pub use monitor::{LivenessMonitor, MonitorConfig};
pub use receiver::{Receiver, ReceiverConfig, ReceiverKind, ReceiverState, Source};
pub use registry::{
    Frame, MediaInfo, ProxyRegistry, RegistryConfig, RegistryError, StreamRegistry, Transport,
    TransportHandle,
};
pub use server::{InputConfig, MediaRelay, OutputConfig, RelayConfig};
pub use stats::SystemStatus;
