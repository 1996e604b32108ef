//! Annex-B file replay
//!
//! Loads an H.264 elementary stream file, splits it into access units and
//! replays them at a fixed frame rate, starting over at end of file.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::{Interval, MissedTickBehavior};

use crate::error::{MediaError, ReceiverError, Result};
use crate::media::h264;

use super::{AccessUnit, ReceiverKind, Source};

const MIN_FRAME_PERIOD: Duration = Duration::from_millis(1);

/// File replay source for `file://<path>` URIs
pub struct FileSource {
    fps: u32,
    units: Vec<Bytes>,
    position: usize,
    ticker: Option<Interval>,
}

impl FileSource {
    pub fn new(fps: u32) -> Self {
        Self {
            fps: fps.max(1),
            units: Vec::new(),
            position: 0,
            ticker: None,
        }
    }

    /// Number of access units loaded by the last `connect`
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    fn path(uri: &str) -> Result<&str> {
        uri.strip_prefix("file://")
            .filter(|path| !path.is_empty())
            .ok_or_else(|| ReceiverError::InvalidUri(uri.to_string()).into())
    }
}

/// Time between frames at `fps`, never shorter than 1 ms
fn frame_period(fps: u32) -> Duration {
    Duration::from_micros(1_000_000 / u64::from(fps.max(1))).max(MIN_FRAME_PERIOD)
}

#[async_trait]
impl Source for FileSource {
    fn kind(&self) -> ReceiverKind {
        ReceiverKind::FileReplay
    }

    async fn connect(&mut self, uri: &str) -> Result<()> {
        let path = Self::path(uri)?;
        let data = Bytes::from(tokio::fs::read(path).await?);

        let units: Vec<Bytes> = h264::split_access_units(&data)
            .into_iter()
            .map(h264::normalize_start_code)
            .collect();
        if units.is_empty() {
            return Err(MediaError::MissingStartCode.into());
        }

        tracing::debug!(path = %path, units = units.len(), fps = self.fps, "File loaded");

        let mut ticker = tokio::time::interval(frame_period(self.fps));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.units = units;
        self.position = 0;
        self.ticker = Some(ticker);
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<AccessUnit>> {
        let Some(ticker) = self.ticker.as_mut() else {
            return Err(ReceiverError::Closed.into());
        };
        ticker.tick().await;

        if self.position >= self.units.len() {
            tracing::trace!("End of file, replaying from start");
            self.position = 0;
        }

        let unit = self.units[self.position].clone();
        self.position += 1;
        Ok(Some(AccessUnit::new(unit)))
    }

    fn fps(&self) -> Option<u32> {
        Some(self.fps)
    }

    async fn disconnect(&mut self) {
        self.ticker = None;
        self.units.clear();
        self.position = 0;
    }
}
