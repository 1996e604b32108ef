//! Relay statistics

pub mod metrics;

pub use metrics::{OutputStatus, ProxyStatus, SessionStatus, StreamStatus, SystemStatus};
