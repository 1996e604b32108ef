//! UDP push listener
//!
//! A local encoder pushes Annex-B data as datagrams. A datagram beginning with
//! a start code opens a new access unit; any other datagram continues the
//! current one. Only loopback addresses are accepted.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Instant;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::net::UdpSocket;

use crate::error::{ReceiverError, Result};
use crate::media::h264::START_CODE;

use super::{AccessUnit, ReceiverKind, Source};

/// Frame rate assumed until enough frames have been seen to estimate it
pub const DEFAULT_UDP_FPS: u32 = 30;

/// Frames between frame rate estimates
const FPS_WINDOW: u32 = 100;

const MAX_DATAGRAM: usize = 65_536;

/// Push listener for `udp://127.0.0.1:<port>` URIs
pub struct UdpSource {
    socket: Option<UdpSocket>,
    pending: BytesMut,
    buf: Vec<u8>,
    fps: u32,
    window_frames: u32,
    window_start: Instant,
}

impl UdpSource {
    pub fn new() -> Self {
        Self {
            socket: None,
            pending: BytesMut::new(),
            buf: vec![0; MAX_DATAGRAM],
            fps: DEFAULT_UDP_FPS,
            window_frames: 0,
            window_start: Instant::now(),
        }
    }

    /// Parse a listener URI into the loopback address to bind
    pub fn parse_uri(uri: &str) -> Result<SocketAddr> {
        let invalid = || ReceiverError::InvalidUri(uri.to_string());

        let authority = uri.strip_prefix("udp://").ok_or_else(invalid)?;
        let authority = authority.split('/').next().unwrap_or_default();
        let (host, port) = authority.rsplit_once(':').ok_or_else(invalid)?;

        if host != "127.0.0.1" && !host.eq_ignore_ascii_case("localhost") {
            return Err(invalid().into());
        }
        let port: u16 = port.parse().map_err(|_| invalid())?;

        Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
    }

    /// Local address of the bound socket
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn count_frame(&mut self) {
        self.window_frames += 1;
        if self.window_frames < FPS_WINDOW {
            return;
        }

        let elapsed = self.window_start.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            let estimate = (self.window_frames as f64 / elapsed).round() as u32;
            if estimate > 0 {
                self.fps = estimate;
            }
        }
        self.window_frames = 0;
        self.window_start = Instant::now();
    }
}

impl Default for UdpSource {
    fn default() -> Self {
        Self::new()
    }
}

fn starts_unit(datagram: &[u8]) -> bool {
    datagram.starts_with(&START_CODE) || datagram.starts_with(&START_CODE[1..])
}

#[async_trait]
impl Source for UdpSource {
    fn kind(&self) -> ReceiverKind {
        ReceiverKind::PushListener
    }

    async fn connect(&mut self, uri: &str) -> Result<()> {
        let addr = Self::parse_uri(uri)?;
        let socket = UdpSocket::bind(addr).await?;
        tracing::debug!(addr = %addr, "UDP listener bound");

        self.socket = Some(socket);
        self.pending.clear();
        self.window_frames = 0;
        self.window_start = Instant::now();
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<AccessUnit>> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(ReceiverError::Closed.into());
        };

        loop {
            let n = socket.recv(&mut self.buf).await?;
            let datagram = &self.buf[..n];
            if datagram.is_empty() {
                continue;
            }

            if starts_unit(datagram) && !self.pending.is_empty() {
                let unit: Bytes = self.pending.split().freeze();
                self.pending.extend_from_slice(datagram);
                self.count_frame();
                return Ok(Some(AccessUnit::new(unit)));
            }
            self.pending.extend_from_slice(datagram);
        }
    }

    fn fps(&self) -> Option<u32> {
        Some(self.fps)
    }

    async fn disconnect(&mut self) {
        self.socket = None;
        self.pending.clear();
    }
}
