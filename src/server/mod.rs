//! Relay lifecycle and configuration

pub mod config;
pub mod relay;

pub use config::{InputConfig, OutputConfig, RelayConfig};
pub use relay::MediaRelay;
