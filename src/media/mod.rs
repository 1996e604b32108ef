//! H.264 handling for the relay
//!
//! This module provides:
//! - Annex-B NAL unit iteration and access-unit splitting
//! - Keyframe detection
//! - SPS parsing (Exp-Golomb, cropping-corrected dimensions, VUI frame rate)

pub mod h264;
pub mod sps;

pub use h264::{NaluIterator, NaluType};
pub use sps::SpsInfo;
