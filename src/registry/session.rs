//! Consumer sessions
//!
//! A session is one consumer's attachment to a stream. It owns a bounded frame
//! queue: the stream's fan-out step is the only writer and the protocol front
//! end that took the queue with `get_frames` is the only reader.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};

use super::frame::Frame;

/// Connection a session delivers frames over
///
/// Implemented by protocol front ends. `close` must be idempotent.
pub trait Transport: Send + Sync {
    /// Remote address, if the transport is connection-oriented
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Transport network name (`tcp`, `udp`)
    fn network(&self) -> &str;

    /// Close the underlying connection
    fn close(&self);
}

/// Transport handle that only records closure
///
/// Front ends that own their socket elsewhere hand this to the registry and
/// watch [`TransportHandle::closed`] to learn when to shut the socket down.
pub struct TransportHandle {
    peer: Option<SocketAddr>,
    network: String,
    closed: watch::Sender<bool>,
}

impl TransportHandle {
    pub fn new(peer: Option<SocketAddr>, network: impl Into<String>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            peer,
            network: network.into(),
            closed,
        }
    }

    /// Handle for a TCP connection from `peer`
    pub fn tcp(peer: SocketAddr) -> Self {
        Self::new(Some(peer), "tcp")
    }

    /// Receiver that flips to `true` once the registry closes the transport
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl Transport for TransportHandle {
    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn network(&self) -> &str {
        &self.network
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("peer", &self.peer)
            .field("network", &self.network)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Outcome of offering one frame to one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Frame (or the cached keyframe standing in for it) was queued
    Delivered,
    /// Queue was full; frame dropped for this session only
    Dropped,
    /// Session is still waiting for a keyframe and none is cached
    Skipped,
    /// Consumer end of the queue is gone
    Closed,
}

/// One consumer attached to a stream
pub struct Session {
    id: String,
    protocol: String,
    transport: Arc<dyn Transport>,

    /// Producer end; `None` once the session has been closed
    tx: Option<mpsc::Sender<Frame>>,

    /// Consumer end until handed out by `get_frames`
    rx: Option<mpsc::Receiver<Frame>>,

    /// Whether a true keyframe has been queued for this session
    seen_keyframe: bool,

    delivered: u64,
    dropped: u64,
    created_at: Instant,
}

impl Session {
    pub(crate) fn new(
        id: &str,
        protocol: &str,
        transport: Arc<dyn Transport>,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            id: id.to_string(),
            protocol: protocol.to_ascii_lowercase(),
            transport,
            tx: Some(tx),
            rx: Some(rx),
            seen_keyframe: false,
            delivered: 0,
            dropped: 0,
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lower-cased protocol name of the owning front end
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// Non-blocking enqueue of `frame`.
    ///
    /// Until the session has queued a true keyframe, inter-frames are replaced
    /// by `cached` re-stamped to the live frame, or skipped when nothing is cached.
    pub(crate) fn offer(&mut self, frame: &Frame, cached: Option<&Frame>) -> Delivery {
        let Some(tx) = &self.tx else {
            return Delivery::Closed;
        };

        let outgoing = if frame.is_keyframe || self.seen_keyframe {
            frame.clone()
        } else {
            match cached {
                Some(key) => key.stand_in_for(frame),
                None => return Delivery::Skipped,
            }
        };

        match tx.try_send(outgoing) {
            Ok(()) => {
                if frame.is_keyframe {
                    self.seen_keyframe = true;
                }
                self.delivered += 1;
                Delivery::Delivered
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped += 1;
                Delivery::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Hand out the consumer end of the queue; `None` if already taken
    pub(crate) fn take_frames(&mut self) -> Option<mpsc::Receiver<Frame>> {
        self.rx.take()
    }

    /// Close the queue and the transport.
    ///
    /// Returns `false` if the session was already closed; nothing is closed twice.
    pub(crate) fn close(&mut self) -> bool {
        if self.tx.take().is_none() {
            return false;
        }
        self.rx = None;
        self.transport.close();
        true
    }

    /// Owned snapshot of this session
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            protocol: self.protocol.clone(),
            peer_addr: self.transport.peer_addr(),
            network: self.transport.network().to_string(),
            frames_taken: self.rx.is_none() && self.tx.is_some(),
            seen_keyframe: self.seen_keyframe,
            delivered: self.delivered,
            dropped: self.dropped,
            uptime: self.created_at.elapsed(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("closed", &self.is_closed())
            .field("delivered", &self.delivered)
            .field("dropped", &self.dropped)
            .finish()
    }
}

/// Snapshot of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    pub protocol: String,
    pub peer_addr: Option<SocketAddr>,
    pub network: String,
    /// Whether a consumer has taken the frame queue
    pub frames_taken: bool,
    pub seen_keyframe: bool,
    /// Frames queued for this session
    pub delivered: u64,
    /// Frames dropped because the queue was full
    pub dropped: u64,
    pub uptime: Duration,
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn key(idx: u64) -> Frame {
        Frame::new(Bytes::from_static(&[0, 0, 0, 1, 0x65]), 0, true, idx)
    }

    fn inter(idx: u64, ts: u32) -> Frame {
        Frame::new(Bytes::from_static(&[0, 0, 0, 1, 0x41]), ts, false, idx)
    }

    fn session(capacity: usize) -> (Session, Arc<TransportHandle>) {
        let transport = Arc::new(TransportHandle::new(None, "tcp"));
        let session = Session::new("s1", "RTSP", transport.clone(), capacity);
        (session, transport)
    }

    #[test]
    fn test_protocol_lower_cased() {
        let (session, _) = session(5);
        assert_eq!(session.protocol(), "rtsp");
    }

    #[test]
    fn test_skips_inter_frames_without_cached_keyframe() {
        let (mut session, _) = session(5);
        assert_eq!(session.offer(&inter(1, 0), None), Delivery::Skipped);

        let mut rx = session.take_frames().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cached_keyframe_stands_in_until_true_keyframe() {
        let (mut session, _) = session(5);
        let cached = key(1);
        let mut rx = session.take_frames().unwrap();

        assert_eq!(session.offer(&inter(2, 3600), Some(&cached)), Delivery::Delivered);
        let first = rx.try_recv().unwrap();
        assert!(first.is_keyframe);
        assert_eq!(first.timestamp, 3600);
        assert_eq!(first.sequence_index, 2);

        // Still bootstrapping: the next inter-frame is replaced again
        session.offer(&inter(3, 7200), Some(&cached));
        assert!(rx.try_recv().unwrap().is_keyframe);

        // A true keyframe ends the bootstrap
        session.offer(&key(4), Some(&cached));
        session.offer(&inter(5, 14400), Some(&cached));
        assert_eq!(rx.try_recv().unwrap().sequence_index, 4);
        let live = rx.try_recv().unwrap();
        assert!(!live.is_keyframe);
        assert_eq!(live.sequence_index, 5);
    }

    #[test]
    fn test_full_queue_drops() {
        let (mut session, _) = session(2);
        assert_eq!(session.offer(&key(1), None), Delivery::Delivered);
        assert_eq!(session.offer(&inter(2, 0), None), Delivery::Delivered);
        assert_eq!(session.offer(&inter(3, 0), None), Delivery::Dropped);

        let info = session.info();
        assert_eq!(info.delivered, 2);
        assert_eq!(info.dropped, 1);
    }

    #[test]
    fn test_close_once() {
        let (mut session, transport) = session(5);
        let mut rx = session.take_frames().unwrap();
        session.offer(&key(1), None);

        assert!(session.close());
        assert!(transport.is_closed());
        assert!(!session.close());
        assert_eq!(session.offer(&key(2), None), Delivery::Closed);

        // Buffered frame is still readable, then the queue reports closed
        assert_eq!(rx.blocking_recv().map(|f| f.sequence_index), Some(1));
        assert!(rx.blocking_recv().is_none());
    }

    #[test]
    fn test_take_frames_once() {
        let (mut session, _) = session(5);
        assert!(session.take_frames().is_some());
        assert!(session.take_frames().is_none());
        assert!(session.info().frames_taken);
    }
}
