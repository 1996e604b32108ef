//! Stream and session registries
//!
//! The registries track named streams, admit and remove producers and
//! consumers, and fan each producer's frames out to every attached session.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<StreamRegistry>
//!                     ┌─────────────────────────┐
//!                     │ streams: HashMap<Id,    │
//!                     │   StreamEntry {         │
//!                     │     cached_keyframe,    │
//!                     │     sessions,           │
//!                     │     receiver,           │
//!                     │   }                     │
//!                     │ >                       │
//!                     └───────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!     [Receiver]             [Session A]             [Session B]
//!     ingest task            frames.recv()           frames.recv()
//!         │                       ▲                       ▲
//!         └──► registry.broadcast()──► try_send ──────────┘
//! ```
//!
//! # Backpressure
//!
//! Each session owns a bounded queue (capacity 5 by default). Fan-out never
//! waits: a full queue drops the frame for that session only, and the drop
//! is counted in its [`SessionInfo`].
//!
//! # Zero-Copy Design
//!
//! `bytes::Bytes` uses reference counting, so every session shares the same
//! payload allocation. Frames are never mutated after creation.

pub mod config;
pub mod entry;
pub mod error;
pub mod frame;
pub mod output;
pub mod proxy;
pub mod session;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{FanOut, StreamEntry, StreamInfo};
pub use error::RegistryError;
pub use frame::{Frame, MediaInfo, CLOCK_RATE};
pub use output::{Output, OutputProtocol};
pub use proxy::{ProxyInfo, ProxyRegistry};
pub use session::{SessionInfo, Transport, TransportHandle};
pub use store::StreamRegistry;
