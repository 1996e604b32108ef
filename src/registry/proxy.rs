//! Proxy stream registry
//!
//! A proxy stream is pulled on behalf of exactly one egress session: the
//! session's front end reads the receiver's frame queue directly, and the
//! stream is torn down when that session disconnects. Kept separate from the
//! live registry because admission and removal differ.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, RwLock};

use crate::receiver::{IngestTarget, Receiver, ReceiverState};

use super::config::RegistryConfig;
use super::error::{validate_uri, RegistryError};
use super::frame::Frame;
use super::session::Transport;

/// Entry for a single proxied stream
struct ProxyEntry {
    proxy_uri: String,
    request_uri: String,
    /// Lower-cased egress protocol of the requesting session
    protocol: String,
    input_status: bool,
    transport: Arc<dyn Transport>,
    receiver: Receiver,
    created_at: Instant,
}

impl ProxyEntry {
    fn info(&self, id: &str) -> ProxyInfo {
        let media = self.receiver.media();
        ProxyInfo {
            id: id.to_string(),
            proxy_uri: self.proxy_uri.clone(),
            request_uri: self.request_uri.clone(),
            protocol: self.protocol.clone(),
            input_status: self.input_status,
            peer_addr: self.transport.peer_addr(),
            network: self.transport.network().to_string(),
            state: self.receiver.state(),
            running: self.receiver.running(),
            index: self.receiver.index(),
            fps: media.fps,
            width: media.width,
            height: media.height,
            uptime: self.created_at.elapsed(),
        }
    }

    fn close(&self) {
        self.receiver.close();
        self.transport.close();
    }
}

/// Snapshot of a proxy stream
#[derive(Debug, Clone)]
pub struct ProxyInfo {
    pub id: String,
    /// Upstream URI the receiver pulls from
    pub proxy_uri: String,
    /// URI the egress client asked for
    pub request_uri: String,
    pub protocol: String,
    pub input_status: bool,
    pub peer_addr: Option<SocketAddr>,
    pub network: String,
    pub state: ReceiverState,
    pub running: bool,
    pub index: u64,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub uptime: Duration,
}

/// Registry of proxied relay streams
pub struct ProxyRegistry {
    streams: RwLock<HashMap<String, ProxyEntry>>,
    config: RegistryConfig,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Register a proxy stream and start pulling `proxy_uri`.
    ///
    /// `transport` is the requesting session's connection; it is closed with the stream.
    pub async fn add_stream(
        &self,
        id: &str,
        proxy_uri: &str,
        request_uri: &str,
        protocol: &str,
        mut receiver: Receiver,
        transport: Arc<dyn Transport>,
    ) -> Result<(), RegistryError> {
        if id.is_empty() {
            return Err(RegistryError::EmptyStreamId);
        }
        validate_uri(proxy_uri)?;
        if receiver.is_opened() {
            return Err(RegistryError::ReceiverAlreadyOpened(id.to_string()));
        }

        let mut streams = self.streams.write().await;
        if streams.contains_key(id) {
            return Err(RegistryError::StreamAlreadyExists(id.to_string()));
        }

        let target = IngestTarget::Queue {
            capacity: self.config.proxy_queue_capacity,
        };
        receiver
            .open(proxy_uri, target)
            .map_err(|_| RegistryError::ReceiverAlreadyOpened(id.to_string()))?;

        streams.insert(
            id.to_string(),
            ProxyEntry {
                proxy_uri: proxy_uri.to_string(),
                request_uri: request_uri.to_string(),
                protocol: protocol.to_ascii_lowercase(),
                input_status: false,
                transport,
                receiver,
                created_at: Instant::now(),
            },
        );

        tracing::info!(
            stream = %id,
            proxy_uri = %proxy_uri,
            protocol = %protocol.to_ascii_lowercase(),
            "Proxy stream added"
        );
        Ok(())
    }

    /// Whether a proxy stream with this id exists
    pub async fn exist_stream(&self, id: &str) -> bool {
        self.streams.read().await.contains_key(id)
    }

    /// Snapshot of a proxy stream
    pub async fn get_stream(&self, id: &str) -> Result<ProxyInfo, RegistryError> {
        let streams = self.streams.read().await;
        streams
            .get(id)
            .map(|entry| entry.info(id))
            .ok_or_else(|| RegistryError::StreamNotFound(id.to_string()))
    }

    /// Snapshots of every proxy stream, ordered by id
    pub async fn streams(&self) -> Vec<ProxyInfo> {
        let streams = self.streams.read().await;
        let mut infos: Vec<ProxyInfo> = streams.iter().map(|(id, e)| e.info(id)).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Take the receiver's frame queue; it closes when the upstream ends
    pub async fn get_frames(&self, id: &str) -> Result<mpsc::Receiver<Frame>, RegistryError> {
        let mut streams = self.streams.write().await;
        let entry = streams
            .get_mut(id)
            .ok_or_else(|| RegistryError::StreamNotFound(id.to_string()))?;
        entry
            .receiver
            .frames()
            .ok_or_else(|| RegistryError::FramesAlreadyTaken(id.to_string()))
    }

    /// Remove a proxy stream, closing its receiver and the requesting session's transport
    pub async fn remove_stream(&self, id: &str) -> Result<(), RegistryError> {
        let mut streams = self.streams.write().await;
        let entry = streams
            .remove(id)
            .ok_or_else(|| RegistryError::StreamNotFound(id.to_string()))?;
        entry.close();

        tracing::info!(stream = %id, index = entry.receiver.index(), "Proxy stream removed");
        Ok(())
    }

    /// Remove every proxy stream serving `protocol`; returns the number removed
    pub async fn remove_stream_by_output(&self, protocol: &str) -> usize {
        let mut streams = self.streams.write().await;
        let ids: Vec<String> = streams
            .iter()
            .filter(|(_, e)| e.protocol.eq_ignore_ascii_case(protocol))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &ids {
            if let Some(entry) = streams.remove(id) {
                entry.close();
                tracing::info!(stream = %id, protocol = %protocol, "Proxy stream removed by output stop");
            }
        }
        ids.len()
    }

    /// Current receiver index of every proxy stream
    pub async fn sequence_indices(&self) -> HashMap<String, u64> {
        let streams = self.streams.read().await;
        streams
            .iter()
            .map(|(id, entry)| (id.clone(), entry.receiver.index()))
            .collect()
    }

    /// Record the liveness monitor's verdict for a proxy stream
    pub async fn set_input_status(&self, id: &str, alive: bool) {
        let mut streams = self.streams.write().await;
        if let Some(entry) = streams.get_mut(id) {
            entry.input_status = alive;
        }
    }

    pub async fn stream_count(&self) -> usize {
        self.streams.read().await.len()
    }

    /// Remove every proxy stream; returns the number removed
    pub async fn clear(&self) -> usize {
        let mut streams = self.streams.write().await;
        let count = streams.len();
        for (_, entry) in streams.drain() {
            entry.close();
        }
        count
    }
}

impl Default for ProxyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio_test::assert_ok;

    use super::super::session::TransportHandle;
    use super::*;
    use crate::receiver::{push, ReceiverConfig};

    fn proxy_receiver() -> (push::PushHandle, Receiver) {
        let (handle, source) = push::channel(8);
        let receiver = Receiver::proxy(Box::new(source), ReceiverConfig::default());
        (handle, receiver)
    }

    fn transport() -> Arc<TransportHandle> {
        Arc::new(TransportHandle::tcp("10.0.0.7:55000".parse().unwrap()))
    }

    #[tokio::test]
    async fn test_add_and_read_proxy_stream() {
        let registry = ProxyRegistry::new();
        let (handle, receiver) = proxy_receiver();

        assert_ok!(
            registry
                .add_stream("p1", "rtsp://upstream/cam", "rtsp://relay/p1", "RTSP", receiver, transport())
                .await
        );
        assert!(registry.exist_stream("p1").await);

        let mut frames = registry.get_frames("p1").await.unwrap();
        assert_eq!(
            registry.get_frames("p1").await.unwrap_err(),
            RegistryError::FramesAlreadyTaken("p1".into())
        );

        handle
            .push(Bytes::from_static(&[0, 0, 0, 1, 0x65, 0x88]), None)
            .await
            .unwrap();
        let frame = frames.recv().await.unwrap();
        assert_eq!(frame.sequence_index, 1);
        assert!(frame.is_keyframe);

        let info = registry.get_stream("p1").await.unwrap();
        assert_eq!(info.protocol, "rtsp");
        assert_eq!(info.index, 1);
        assert_eq!(info.peer_addr, Some("10.0.0.7:55000".parse().unwrap()));

        // Upstream ends: one-shot receiver closes the queue
        drop(handle);
        assert!(frames.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_add_stream_validation() {
        let registry = ProxyRegistry::new();

        let (_h, receiver) = proxy_receiver();
        assert_eq!(
            registry.add_stream("", "rtsp://u", "r", "rtsp", receiver, transport()).await,
            Err(RegistryError::EmptyStreamId)
        );

        let (_h, receiver) = proxy_receiver();
        assert!(matches!(
            registry.add_stream("p1", "upstream", "r", "rtsp", receiver, transport()).await,
            Err(RegistryError::InvalidUri(_))
        ));

        let (_h1, first) = proxy_receiver();
        let (_h2, second) = proxy_receiver();
        registry
            .add_stream("p1", "rtsp://u", "r", "rtsp", first, transport())
            .await
            .unwrap();
        assert_eq!(
            registry.add_stream("p1", "rtsp://u", "r", "rtsp", second, transport()).await,
            Err(RegistryError::StreamAlreadyExists("p1".into()))
        );
    }

    #[tokio::test]
    async fn test_remove_stream_closes_transport() {
        let registry = ProxyRegistry::new();
        let (_handle, receiver) = proxy_receiver();
        let conn = transport();
        registry
            .add_stream("p1", "rtsp://u", "r", "rtsp", receiver, conn.clone())
            .await
            .unwrap();

        assert_ok!(registry.remove_stream("p1").await);
        assert!(conn.is_closed());
        assert!(!registry.exist_stream("p1").await);
        assert_eq!(
            registry.remove_stream("p1").await,
            Err(RegistryError::StreamNotFound("p1".into()))
        );
    }

    #[tokio::test]
    async fn test_remove_stream_by_output() {
        let registry = ProxyRegistry::new();
        for (id, protocol) in [("p1", "rtsp"), ("p2", "GB28181"), ("p3", "RTSP")] {
            let (_handle, receiver) = proxy_receiver();
            registry
                .add_stream(id, "rtsp://u", "r", protocol, receiver, transport())
                .await
                .unwrap();
        }

        assert_eq!(registry.remove_stream_by_output("rtsp").await, 2);
        assert_eq!(registry.stream_count().await, 1);
        assert!(registry.exist_stream("p2").await);
    }
}
