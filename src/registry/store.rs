//! Live stream registry
//!
//! The single source of truth for producer-owned live streams. Every mutation
//! (including fan-out, which updates per-session bootstrap state) takes the
//! write lock for its whole critical section; read-only accessors take the read
//! lock. Critical sections are map operations and non-blocking queue pushes,
//! never I/O.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};

use crate::receiver::{IngestTarget, Receiver};

use super::config::RegistryConfig;
use super::entry::{FanOut, StreamEntry, StreamInfo};
use super::error::{validate_uri, RegistryError};
use super::frame::{Frame, MediaInfo};
use super::output::{Output, OutputProtocol};
use super::session::{Session, SessionInfo, Transport};

/// Registry of live streams
pub struct StreamRegistry {
    /// Map of stream id to stream entry
    streams: RwLock<HashMap<String, StreamEntry>>,

    /// Configuration
    config: RegistryConfig,
}

impl StreamRegistry {
    /// Create a new stream registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new stream registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a live stream and start its receiver.
    ///
    /// The receiver connects in the background; this does not wait for the
    /// first frame. On error the receiver is dropped unopened.
    pub async fn add_stream(
        self: &Arc<Self>,
        id: &str,
        uri: &str,
        mut receiver: Receiver,
    ) -> Result<(), RegistryError> {
        validate_stream(id, uri)?;
        if receiver.is_opened() {
            return Err(RegistryError::ReceiverAlreadyOpened(id.to_string()));
        }

        let mut streams = self.streams.write().await;
        if streams.contains_key(id) {
            return Err(RegistryError::StreamAlreadyExists(id.to_string()));
        }

        self.open_receiver(&mut receiver, id, uri)?;

        let kind = receiver.kind();
        let mut entry = StreamEntry::new(id, uri);
        entry.receiver = Some(receiver);
        streams.insert(id.to_string(), entry);

        tracing::info!(stream = %id, uri = %uri, kind = kind.as_str(), "Stream added");
        Ok(())
    }

    /// Register a push stream whose receiver is attached later by the ingesting front end
    pub async fn add_push_stream(&self, id: &str, uri: &str) -> Result<(), RegistryError> {
        validate_stream(id, uri)?;

        let mut streams = self.streams.write().await;
        if streams.contains_key(id) {
            return Err(RegistryError::StreamAlreadyExists(id.to_string()));
        }
        let mut entry = StreamEntry::new(id, uri);
        entry.push = true;
        streams.insert(id.to_string(), entry);

        tracing::info!(stream = %id, uri = %uri, "Push stream added");
        Ok(())
    }

    /// Bind a receiver to a push stream and start it
    pub async fn attach_receiver(
        self: &Arc<Self>,
        id: &str,
        mut receiver: Receiver,
    ) -> Result<(), RegistryError> {
        if receiver.is_opened() {
            return Err(RegistryError::ReceiverAlreadyOpened(id.to_string()));
        }

        let mut streams = self.streams.write().await;
        let entry = streams
            .get_mut(id)
            .ok_or_else(|| RegistryError::StreamNotFound(id.to_string()))?;
        if entry.receiver.is_some() {
            return Err(RegistryError::ReceiverAlreadyAttached(id.to_string()));
        }

        self.open_receiver(&mut receiver, id, &entry.uri)?;
        tracing::info!(stream = %id, kind = receiver.kind().as_str(), "Receiver attached");
        entry.receiver = Some(receiver);
        Ok(())
    }

    fn open_receiver(
        self: &Arc<Self>,
        receiver: &mut Receiver,
        id: &str,
        uri: &str,
    ) -> Result<(), RegistryError> {
        let target = IngestTarget::Registry {
            registry: Arc::downgrade(self),
            stream_id: id.to_string(),
        };
        receiver
            .open(uri, target)
            .map_err(|_| RegistryError::ReceiverAlreadyOpened(id.to_string()))
    }

    /// Remove a stream.
    ///
    /// The receiver is closed and every session's queue and transport are closed
    /// before the entry leaves the map, all under the write lock.
    pub async fn remove_stream(&self, id: &str) -> Result<(), RegistryError> {
        let mut streams = self.streams.write().await;

        let entry = streams
            .get_mut(id)
            .ok_or_else(|| RegistryError::StreamNotFound(id.to_string()))?;
        let sessions = entry.session_count();
        entry.close();
        streams.remove(id);

        tracing::info!(stream = %id, sessions = sessions, "Stream removed");
        Ok(())
    }

    /// Attach a consumer session to a stream
    pub async fn add_session(
        &self,
        stream_id: &str,
        session_id: &str,
        protocol: &str,
        transport: Arc<dyn Transport>,
    ) -> Result<(), RegistryError> {
        if session_id.is_empty() {
            return Err(RegistryError::EmptySessionId);
        }

        let mut streams = self.streams.write().await;
        let entry = streams
            .get_mut(stream_id)
            .ok_or_else(|| RegistryError::StreamNotFound(stream_id.to_string()))?;
        if entry.sessions.contains_key(session_id) {
            return Err(RegistryError::SessionAlreadyExists(session_id.to_string()));
        }

        let session = Session::new(
            session_id,
            protocol,
            transport,
            self.config.session_queue_capacity,
        );
        entry.sessions.insert(session_id.to_string(), session);

        tracing::info!(
            stream = %stream_id,
            session_id = %session_id,
            protocol = %protocol.to_ascii_lowercase(),
            sessions = entry.session_count(),
            "Session added"
        );
        Ok(())
    }

    /// Detach a session, closing its queue and transport exactly once
    pub async fn remove_session(&self, stream_id: &str, session_id: &str) -> Result<(), RegistryError> {
        let mut streams = self.streams.write().await;
        let entry = streams
            .get_mut(stream_id)
            .ok_or_else(|| RegistryError::StreamNotFound(stream_id.to_string()))?;
        let mut session = entry
            .sessions
            .remove(session_id)
            .ok_or_else(|| RegistryError::SessionNotFound(session_id.to_string()))?;
        session.close();

        tracing::info!(
            stream = %stream_id,
            session_id = %session_id,
            sessions = entry.session_count(),
            "Session removed"
        );
        Ok(())
    }

    /// Snapshot of one session
    pub async fn get_session(
        &self,
        stream_id: &str,
        session_id: &str,
    ) -> Result<SessionInfo, RegistryError> {
        let streams = self.streams.read().await;
        let entry = streams
            .get(stream_id)
            .ok_or_else(|| RegistryError::StreamNotFound(stream_id.to_string()))?;
        entry
            .sessions
            .get(session_id)
            .map(Session::info)
            .ok_or_else(|| RegistryError::SessionNotFound(session_id.to_string()))
    }

    /// Take the consumer end of a session's frame queue.
    ///
    /// Only one consumer may read a session; a second call fails. The queue
    /// reports closed once the session or its stream is removed.
    pub async fn get_frames(
        &self,
        stream_id: &str,
        session_id: &str,
    ) -> Result<mpsc::Receiver<Frame>, RegistryError> {
        let mut streams = self.streams.write().await;
        let entry = streams
            .get_mut(stream_id)
            .ok_or_else(|| RegistryError::StreamNotFound(stream_id.to_string()))?;
        let session = entry
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RegistryError::SessionNotFound(session_id.to_string()))?;
        session
            .take_frames()
            .ok_or_else(|| RegistryError::FramesAlreadyTaken(session_id.to_string()))
    }

    /// Publish a frame into a stream and fan it out to every session.
    ///
    /// Used by receivers and by front ends ingesting push protocols directly.
    /// Never blocks on a consumer: full session queues drop the frame.
    pub async fn broadcast(
        &self,
        id: &str,
        frame: Frame,
        media: Option<&MediaInfo>,
    ) -> Result<FanOut, RegistryError> {
        let mut streams = self.streams.write().await;
        let entry = streams
            .get_mut(id)
            .ok_or_else(|| RegistryError::StreamNotFound(id.to_string()))?;
        Ok(entry.fan_out(frame, media))
    }

    /// Snapshot of a stream
    pub async fn get_stream(&self, id: &str) -> Result<StreamInfo, RegistryError> {
        let streams = self.streams.read().await;
        streams
            .get(id)
            .map(StreamEntry::info)
            .ok_or_else(|| RegistryError::StreamNotFound(id.to_string()))
    }

    /// Snapshots of every stream, ordered by id
    pub async fn streams(&self) -> Vec<StreamInfo> {
        let streams = self.streams.read().await;
        let mut infos: Vec<StreamInfo> = streams.values().map(StreamEntry::info).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Current SPS (without start code); empty until one has been seen
    pub async fn get_sps(&self, id: &str) -> Result<Bytes, RegistryError> {
        self.with_entry(id, |entry| entry.media.sps.clone()).await
    }

    /// Current PPS (without start code); empty until one has been seen
    pub async fn get_pps(&self, id: &str) -> Result<Bytes, RegistryError> {
        self.with_entry(id, |entry| entry.media.pps.clone()).await
    }

    /// SDP fmtp attribute; empty until both parameter sets are known
    pub async fn get_fmtp(&self, id: &str) -> Result<String, RegistryError> {
        self.with_entry(id, |entry| entry.fmtp.clone()).await
    }

    async fn with_entry<T>(
        &self,
        id: &str,
        f: impl FnOnce(&StreamEntry) -> T,
    ) -> Result<T, RegistryError> {
        let streams = self.streams.read().await;
        streams
            .get(id)
            .map(f)
            .ok_or_else(|| RegistryError::StreamNotFound(id.to_string()))
    }

    /// Enable an egress protocol on a stream
    pub async fn add_output(
        &self,
        id: &str,
        protocol: &str,
        enabled: bool,
        param: Option<String>,
    ) -> Result<(), RegistryError> {
        let mut streams = self.streams.write().await;
        let entry = streams
            .get_mut(id)
            .ok_or_else(|| RegistryError::StreamNotFound(id.to_string()))?;

        let protocol: OutputProtocol = protocol.parse()?;
        if entry.outputs.contains_key(&protocol) {
            return Err(RegistryError::OutputAlreadyExists(protocol.to_string()));
        }
        entry.outputs.insert(
            protocol,
            Output {
                protocol,
                enabled,
                param,
            },
        );

        tracing::info!(stream = %id, protocol = %protocol, enabled = enabled, "Output added");
        Ok(())
    }

    /// Disable an egress protocol on a stream
    pub async fn remove_output(&self, id: &str, protocol: &str) -> Result<(), RegistryError> {
        let mut streams = self.streams.write().await;
        let entry = streams
            .get_mut(id)
            .ok_or_else(|| RegistryError::StreamNotFound(id.to_string()))?;

        let key: OutputProtocol = protocol
            .parse()
            .map_err(|_| RegistryError::OutputNotFound(protocol.to_string()))?;
        entry
            .outputs
            .remove(&key)
            .ok_or_else(|| RegistryError::OutputNotFound(protocol.to_string()))?;

        tracing::info!(stream = %id, protocol = %key, "Output removed");
        Ok(())
    }

    /// Whether `protocol` is configured and enabled on the stream
    pub async fn exist_output(&self, id: &str, protocol: &str) -> bool {
        let Ok(key) = protocol.parse::<OutputProtocol>() else {
            return false;
        };
        let streams = self.streams.read().await;
        streams
            .get(id)
            .and_then(|entry| entry.outputs.get(&key))
            .map_or(false, |output| output.enabled)
    }

    /// Whether a stream with this id exists
    pub async fn exist_input(&self, id: &str) -> bool {
        self.streams.read().await.contains_key(id)
    }

    /// Remove every session opened by `protocol`'s front end.
    ///
    /// Used when an egress protocol server is stopped. Returns the number of
    /// sessions removed.
    pub async fn remove_session_by_output(&self, protocol: &str) -> usize {
        let mut streams = self.streams.write().await;
        let mut removed = 0;

        for entry in streams.values_mut() {
            let ids: Vec<String> = entry
                .sessions
                .values()
                .filter(|s| s.protocol().eq_ignore_ascii_case(protocol))
                .map(|s| s.id().to_string())
                .collect();

            for session_id in ids {
                if let Some(mut session) = entry.sessions.remove(&session_id) {
                    session.close();
                    removed += 1;
                    tracing::info!(
                        stream = %entry.id,
                        session_id = %session_id,
                        protocol = %protocol,
                        "Session removed by output stop"
                    );
                }
            }
        }

        removed
    }

    /// Current sequence index of every stream
    pub async fn sequence_indices(&self) -> HashMap<String, u64> {
        let streams = self.streams.read().await;
        streams
            .iter()
            .map(|(id, entry)| (id.clone(), entry.sequence_index))
            .collect()
    }

    /// Record the liveness monitor's verdict for a stream
    pub async fn set_input_status(&self, id: &str, alive: bool) {
        let mut streams = self.streams.write().await;
        if let Some(entry) = streams.get_mut(id) {
            if entry.input_status != alive {
                tracing::info!(stream = %id, alive = alive, "Input status changed");
            }
            entry.input_status = alive;
        }
    }

    /// Get total number of streams
    pub async fn stream_count(&self) -> usize {
        self.streams.read().await.len()
    }

    /// Remove every stream; returns the number removed
    pub async fn clear(&self) -> usize {
        let mut streams = self.streams.write().await;
        let count = streams.len();
        for (_, mut entry) in streams.drain() {
            entry.close();
        }
        if count > 0 {
            tracing::info!(streams = count, "All streams removed");
        }
        count
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_stream(id: &str, uri: &str) -> Result<(), RegistryError> {
    if id.is_empty() {
        return Err(RegistryError::EmptyStreamId);
    }
    validate_uri(uri)
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::super::session::TransportHandle;
    use super::*;

    fn key(idx: u64) -> Frame {
        Frame::new(Bytes::from_static(&[0, 0, 0, 1, 0x65, 0x88]), 0, true, idx)
    }

    fn inter(idx: u64) -> Frame {
        Frame::new(
            Bytes::from_static(&[0, 0, 0, 1, 0x41, 0x9A]),
            idx as u32 * 3600,
            false,
            idx,
        )
    }

    fn transport() -> Arc<TransportHandle> {
        Arc::new(TransportHandle::new(None, "tcp"))
    }

    async fn registry_with_stream(id: &str) -> Arc<StreamRegistry> {
        let registry = Arc::new(StreamRegistry::new());
        registry.add_push_stream(id, "proto://host/path").await.unwrap();
        registry
    }

    #[tokio::test]
    async fn test_add_push_stream_validation() {
        let registry = StreamRegistry::new();

        assert_eq!(
            registry.add_push_stream("", "proto://host").await,
            Err(RegistryError::EmptyStreamId)
        );
        assert_eq!(
            registry.add_push_stream("cam1", "").await,
            Err(RegistryError::EmptyUri)
        );
        assert!(matches!(
            registry.add_push_stream("cam1", "host/path").await,
            Err(RegistryError::InvalidUri(_))
        ));

        assert_ok!(registry.add_push_stream("cam1", "proto://host/path").await);
        assert_eq!(
            registry.add_push_stream("cam1", "proto://other").await,
            Err(RegistryError::StreamAlreadyExists("cam1".into()))
        );

        // First stream untouched
        let info = registry.get_stream("cam1").await.unwrap();
        assert_eq!(info.uri, "proto://host/path");
        assert!(info.push);
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let registry = registry_with_stream("cam1").await;
        let handle = transport();

        assert_eq!(
            registry.add_session("cam1", "", "rtsp", handle.clone()).await,
            Err(RegistryError::EmptySessionId)
        );
        assert_eq!(
            registry.add_session("cam9", "s1", "rtsp", handle.clone()).await,
            Err(RegistryError::StreamNotFound("cam9".into()))
        );

        assert_ok!(registry.add_session("cam1", "s1", "RTSP", handle.clone()).await);
        assert_eq!(
            registry.add_session("cam1", "s1", "rtsp", handle.clone()).await,
            Err(RegistryError::SessionAlreadyExists("s1".into()))
        );

        let info = registry.get_session("cam1", "s1").await.unwrap();
        assert_eq!(info.protocol, "rtsp");
        assert_eq!(info.network, "tcp");

        let mut frames = registry.get_frames("cam1", "s1").await.unwrap();
        assert_eq!(
            registry.get_frames("cam1", "s1").await.unwrap_err(),
            RegistryError::FramesAlreadyTaken("s1".into())
        );

        assert_ok!(registry.remove_session("cam1", "s1").await);
        assert!(handle.is_closed());
        assert!(frames.recv().await.is_none());

        // Second removal fails cleanly instead of closing twice
        assert_eq!(
            registry.remove_session("cam1", "s1").await,
            Err(RegistryError::SessionNotFound("s1".into()))
        );
    }

    #[tokio::test]
    async fn test_broadcast_bootstrap_and_isolation() {
        let registry = registry_with_stream("cam1").await;
        registry.add_session("cam1", "slow", "rtsp", transport()).await.unwrap();
        registry.add_session("cam1", "fast", "rtmp", transport()).await.unwrap();
        let mut fast = registry.get_frames("cam1", "fast").await.unwrap();

        // Nothing cached yet: inter-frames are held back
        let result = registry.broadcast("cam1", inter(1), None).await.unwrap();
        assert_eq!(result.skipped, 2);

        let mut received = Vec::new();
        registry.broadcast("cam1", key(2), None).await.unwrap();
        received.push(fast.try_recv().unwrap().sequence_index);
        for idx in 3..=6 {
            registry.broadcast("cam1", inter(idx), None).await.unwrap();
            received.push(fast.try_recv().unwrap().sequence_index);
        }
        let last = registry.broadcast("cam1", inter(7), None).await.unwrap();
        received.push(fast.try_recv().unwrap().sequence_index);

        // The slow consumer never reads: its queue fills at 5 and frame 7 is dropped for it only
        assert_eq!(received, vec![2, 3, 4, 5, 6, 7]);
        assert_eq!(last.delivered, 1);
        assert_eq!(last.dropped, 1);

        let slow = registry.get_session("cam1", "slow").await.unwrap();
        assert_eq!(slow.delivered, 5);
        assert_eq!(slow.dropped, 1);
        let fast_info = registry.get_session("cam1", "fast").await.unwrap();
        assert_eq!(fast_info.dropped, 0);
    }

    #[tokio::test]
    async fn test_late_joiner_gets_cached_keyframe() {
        let registry = registry_with_stream("cam1").await;
        registry.broadcast("cam1", key(1), None).await.unwrap();
        registry.broadcast("cam1", inter(2), None).await.unwrap();

        registry.add_session("cam1", "late", "rtsp", transport()).await.unwrap();
        let mut frames = registry.get_frames("cam1", "late").await.unwrap();
        registry.broadcast("cam1", inter(3), None).await.unwrap();

        let first = frames.recv().await.unwrap();
        assert!(first.is_keyframe);
        assert_eq!(first.timestamp, 3 * 3600);
        assert_eq!(first.sequence_index, 3);
    }

    #[tokio::test]
    async fn test_broadcast_unknown_stream() {
        let registry = StreamRegistry::new();
        assert_err!(registry.broadcast("nope", key(1), None).await);
    }

    #[tokio::test]
    async fn test_outputs() {
        let registry = registry_with_stream("cam1").await;

        assert_eq!(
            registry.add_output("cam1", "hls", true, None).await,
            Err(RegistryError::UnsupportedProtocol("hls".into()))
        );
        assert_ok!(registry.add_output("cam1", "RTSP", true, None).await);
        assert_ok!(
            registry
                .add_output("cam1", "gb28181", false, Some("34020000001320000001".into()))
                .await
        );
        assert_eq!(
            registry.add_output("cam1", "rtsp", true, None).await,
            Err(RegistryError::OutputAlreadyExists("rtsp".into()))
        );

        assert!(registry.exist_output("cam1", "rtsp").await);
        assert!(!registry.exist_output("cam1", "gb28181").await);
        assert!(!registry.exist_output("cam1", "rtmp").await);
        assert!(!registry.exist_output("cam9", "rtsp").await);

        // Removal is case-insensitive
        assert_ok!(registry.remove_output("cam1", "Rtsp").await);
        assert!(!registry.exist_output("cam1", "rtsp").await);
        assert_eq!(
            registry.remove_output("cam1", "rtsp").await,
            Err(RegistryError::OutputNotFound("rtsp".into()))
        );

        let info = registry.get_stream("cam1").await.unwrap();
        assert_eq!(info.outputs.len(), 1);
        assert_eq!(info.outputs[0].protocol, OutputProtocol::Gb28181);
    }

    #[tokio::test]
    async fn test_parameter_sets_and_fmtp() {
        let registry = registry_with_stream("cam1").await;
        assert!(registry.get_sps("cam1").await.unwrap().is_empty());
        assert_eq!(registry.get_fmtp("cam1").await.unwrap(), "");

        let media = MediaInfo {
            fps: 25,
            width: 1280,
            height: 720,
            sps: Bytes::from_static(&[0x67, 0x42, 0xC0, 0x1F]),
            pps: Bytes::from_static(&[0x68, 0xCE, 0x3C, 0x80]),
        };
        registry.broadcast("cam1", key(1), Some(&media)).await.unwrap();

        assert_eq!(registry.get_sps("cam1").await.unwrap(), media.sps);
        assert_eq!(registry.get_pps("cam1").await.unwrap(), media.pps);
        assert!(registry
            .get_fmtp("cam1")
            .await
            .unwrap()
            .contains("profile-level-id=42C01F"));
        assert_err!(registry.get_sps("cam9").await);
    }

    #[tokio::test]
    async fn test_remove_session_by_output() {
        let registry = registry_with_stream("cam1").await;
        registry.add_push_stream("cam2", "proto://host/2").await.unwrap();
        let rtsp = transport();

        registry.add_session("cam1", "a", "rtsp", rtsp.clone()).await.unwrap();
        registry.add_session("cam1", "b", "rtmp", transport()).await.unwrap();
        registry.add_session("cam2", "c", "RTSP", transport()).await.unwrap();

        assert_eq!(registry.remove_session_by_output("rtsp").await, 2);
        assert!(rtsp.is_closed());
        assert_err!(registry.get_session("cam1", "a").await);
        assert_ok!(registry.get_session("cam1", "b").await);
        assert_err!(registry.get_session("cam2", "c").await);
    }

    #[tokio::test]
    async fn test_remove_stream_closes_sessions() {
        let registry = registry_with_stream("cam1").await;
        let handle = transport();
        registry.add_session("cam1", "s1", "rtsp", handle.clone()).await.unwrap();
        let mut frames = registry.get_frames("cam1", "s1").await.unwrap();

        assert_ok!(registry.remove_stream("cam1").await);
        assert!(!registry.exist_input("cam1").await);
        assert!(handle.is_closed());
        assert!(frames.recv().await.is_none());

        assert_eq!(
            registry.remove_stream("cam1").await,
            Err(RegistryError::StreamNotFound("cam1".into()))
        );
        assert_eq!(
            registry.get_frames("cam1", "s1").await.unwrap_err(),
            RegistryError::StreamNotFound("cam1".into())
        );
    }

    #[tokio::test]
    async fn test_input_status() {
        let registry = registry_with_stream("cam1").await;
        assert!(!registry.get_stream("cam1").await.unwrap().input_status);

        registry.broadcast("cam1", key(7), None).await.unwrap();
        assert_eq!(registry.sequence_indices().await.get("cam1"), Some(&7));

        registry.set_input_status("cam1", true).await;
        assert!(registry.get_stream("cam1").await.unwrap().input_status);
    }
}
