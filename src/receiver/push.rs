//! Push ingestion from protocol front ends
//!
//! A front end that terminates a push protocol (e.g. an RTMP publish) hands
//! the relay a [`ChannelSource`] and keeps the matching [`PushHandle`] to feed
//! it access units as they arrive off the wire.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{ReceiverError, Result};

use super::{AccessUnit, ReceiverKind, Source};

/// Create a connected push handle and source pair
pub fn channel(capacity: usize) -> (PushHandle, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        PushHandle { tx },
        ChannelSource {
            rx,
            fps: None,
            ended: false,
        },
    )
}

/// Producer side held by the front end
#[derive(Clone)]
pub struct PushHandle {
    tx: mpsc::Sender<AccessUnit>,
}

impl PushHandle {
    /// Push an access unit, waiting for queue space
    pub async fn push(&self, data: Bytes, timestamp: Option<u32>) -> Result<()> {
        self.tx
            .send(AccessUnit { data, timestamp })
            .await
            .map_err(|_| ReceiverError::Closed.into())
    }

    /// Push without waiting; returns `Ok(false)` if the unit was dropped
    pub fn try_push(&self, data: Bytes, timestamp: Option<u32>) -> Result<bool> {
        match self.tx.try_send(AccessUnit { data, timestamp }) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ReceiverError::Closed.into()),
        }
    }

    /// Whether the receiving side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Source side owned by the receiver
pub struct ChannelSource {
    rx: mpsc::Receiver<AccessUnit>,
    fps: Option<u32>,
    ended: bool,
}

impl ChannelSource {
    /// Frame rate announced by the pushing protocol (e.g. RTMP metadata)
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = Some(fps).filter(|fps| *fps > 0);
        self
    }
}

#[async_trait]
impl Source for ChannelSource {
    fn kind(&self) -> ReceiverKind {
        ReceiverKind::PushListener
    }

    async fn connect(&mut self, _uri: &str) -> Result<()> {
        // All handles dropped: nothing will ever arrive again
        if self.ended {
            return Err(ReceiverError::Closed.into());
        }
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<AccessUnit>> {
        let unit = self.rx.recv().await;
        if unit.is_none() {
            self.ended = true;
        }
        Ok(unit)
    }

    fn fps(&self) -> Option<u32> {
        self.fps
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[tokio::test]
    async fn test_push_and_read() {
        let (handle, mut source) = channel(2);
        let source_fps = source.fps();
        assert_eq!(source_fps, None);

        assert_ok!(source.connect("push://front-end").await);
        handle
            .push(Bytes::from_static(&[0, 0, 0, 1, 0x65]), Some(1800))
            .await
            .unwrap();

        let unit = source.read().await.unwrap().unwrap();
        assert_eq!(unit.timestamp, Some(1800));
    }

    #[tokio::test]
    async fn test_try_push_full() {
        let (handle, _source) = channel(1);
        assert!(handle.try_push(Bytes::from_static(&[1]), None).unwrap());
        assert!(!handle.try_push(Bytes::from_static(&[2]), None).unwrap());
    }

    #[tokio::test]
    async fn test_end_of_stream_is_terminal() {
        let (handle, source) = channel(1);
        let mut source = source.with_fps(30);
        assert_eq!(source.fps(), Some(30));
        drop(handle);

        assert_eq!(source.read().await.unwrap(), None);
        assert_err!(source.connect("push://front-end").await);
    }

    #[tokio::test]
    async fn test_handle_sees_closed_source() {
        let (handle, source) = channel(1);
        drop(source);
        assert!(handle.is_closed());
        assert_err!(handle.push(Bytes::from_static(&[1]), None).await);
    }
}
