//! Receiver handle and ingestion task

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{Error, ReceiverError, Result};
use crate::media::h264;
use crate::registry::frame::{ticks_per_frame, Frame, MediaInfo};
use crate::registry::{RegistryError, StreamRegistry};

use super::config::ReceiverConfig;
use super::{ReceiverEvent, ReceiverKind, ReceiverState, Source};

/// Where a receiver delivers its frames
pub enum IngestTarget {
    /// Fan out through a live stream in the registry
    Registry {
        registry: Weak<StreamRegistry>,
        stream_id: String,
    },
    /// Bounded queue read through [`Receiver::frames`]
    Queue { capacity: usize },
}

/// State shared between the handle and its ingestion task
struct Shared {
    /// Stop request; checked after every I/O call
    stop: watch::Sender<bool>,
    running: AtomicBool,
    index: AtomicU64,
    timeout_ms: AtomicU64,
    state: watch::Sender<ReceiverState>,
    media: watch::Sender<MediaInfo>,
    events: broadcast::Sender<ReceiverEvent>,
}

impl Shared {
    fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    fn set_state(&self, state: ReceiverState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: ReceiverEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Producer attached to a stream
///
/// Owns one [`Source`] and, once opened, a background task that runs the
/// ingestion state machine. Dropping the handle stops the task.
pub struct Receiver {
    kind: ReceiverKind,
    one_shot: bool,
    config: ReceiverConfig,
    /// Source until `open` moves it into the task; locked only so the handle is `Sync`
    source: Mutex<Option<Box<dyn Source>>>,
    opened: bool,
    frames: Option<mpsc::Receiver<Frame>>,
    task: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl Receiver {
    /// Persistent receiver: retries until closed
    pub fn new(source: Box<dyn Source>, config: ReceiverConfig) -> Self {
        let kind = source.kind();
        Self::build(source, config, kind, false)
    }

    /// One-shot proxy receiver: goes idle on the first failure or end of stream
    pub fn proxy(source: Box<dyn Source>, config: ReceiverConfig) -> Self {
        Self::build(source, config, ReceiverKind::ProxyRelay, true)
    }

    /// Persistent receiver for a `file://` or `udp://` URI
    pub fn from_uri(uri: &str, config: ReceiverConfig) -> Result<Self> {
        let source = super::from_uri(uri, &config)?;
        Ok(Self::new(source, config))
    }

    fn build(
        source: Box<dyn Source>,
        config: ReceiverConfig,
        kind: ReceiverKind,
        one_shot: bool,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        let (state, _) = watch::channel(ReceiverState::Idle);
        let (media, _) = watch::channel(MediaInfo {
            fps: config.default_fps,
            ..Default::default()
        });
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let shared = Arc::new(Shared {
            stop,
            running: AtomicBool::new(false),
            index: AtomicU64::new(0),
            timeout_ms: AtomicU64::new(config.timeout.as_millis() as u64),
            state,
            media,
            events,
        });

        Self {
            kind,
            one_shot,
            config,
            source: Mutex::new(Some(source)),
            opened: false,
            frames: None,
            task: None,
            shared,
        }
    }

    /// Start ingesting from `uri` in the background.
    ///
    /// Returns immediately; connection progress is reported through
    /// [`Receiver::events`] and [`Receiver::state`].
    pub fn open(&mut self, uri: &str, target: IngestTarget) -> std::result::Result<(), ReceiverError> {
        let source = self
            .source
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ReceiverError::AlreadyOpened)?;
        self.opened = true;

        let sink = match target {
            IngestTarget::Registry {
                registry,
                stream_id,
            } => Sink::Registry {
                registry,
                stream_id,
            },
            IngestTarget::Queue { capacity } => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                self.frames = Some(rx);
                Sink::Queue(tx)
            }
        };

        let ingest = Ingest {
            source,
            uri: uri.to_string(),
            sink,
            shared: Arc::clone(&self.shared),
            retry_interval: self.config.retry_interval,
            default_fps: self.config.default_fps,
            one_shot: self.one_shot,
            kind: self.kind,
        };

        self.shared.set_state(ReceiverState::Connecting);
        self.task = Some(tokio::spawn(ingest.run()));
        Ok(())
    }

    /// Request the ingestion task to stop.
    ///
    /// Takes effect at the next I/O boundary even if the source is blocked.
    pub fn close(&self) {
        self.shared.stop.send_replace(true);
    }

    /// Take the frame queue of a queue-targeted receiver; `None` if already taken
    pub fn frames(&mut self) -> Option<mpsc::Receiver<Frame>> {
        self.frames.take()
    }

    /// Whether the source is connected and streaming
    pub fn running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Whether `open` has been called
    pub fn is_opened(&self) -> bool {
        self.opened
    }

    /// Whether the ingestion task has exited
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(false, |task| task.is_finished())
    }

    /// Change the connect/read deadline, effective from the next I/O call
    pub fn set_timeout(&self, timeout: Duration) {
        self.shared
            .timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn kind(&self) -> ReceiverKind {
        self.kind
    }

    pub fn state(&self) -> ReceiverState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ReceiverState> {
        self.shared.state.subscribe()
    }

    /// Subscribe to connection status events
    pub fn events(&self) -> broadcast::Receiver<ReceiverEvent> {
        self.shared.events.subscribe()
    }

    /// Index of the last frame produced
    pub fn index(&self) -> u64 {
        self.shared.index.load(Ordering::Acquire)
    }

    /// Current media parameters
    pub fn media(&self) -> MediaInfo {
        self.shared.media.borrow().clone()
    }

    pub fn fps(&self) -> u32 {
        self.shared.media.borrow().fps
    }

    pub fn width(&self) -> u32 {
        self.shared.media.borrow().width
    }

    pub fn height(&self) -> u32 {
        self.shared.media.borrow().height
    }

    pub fn sps(&self) -> Bytes {
        self.shared.media.borrow().sps.clone()
    }

    pub fn pps(&self) -> Bytes {
        self.shared.media.borrow().pps.clone()
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("index", &self.index())
            .field("opened", &self.is_opened())
            .finish()
    }
}

enum Sink {
    Registry {
        registry: Weak<StreamRegistry>,
        stream_id: String,
    },
    Queue(mpsc::Sender<Frame>),
}

/// Why a streaming phase ended
enum StreamEnd {
    Stopped,
    /// Stream removed from the registry or queue consumer gone
    TargetGone,
    Eof,
    Failed(Error),
}

/// Ingestion task state
struct Ingest {
    source: Box<dyn Source>,
    uri: String,
    sink: Sink,
    shared: Arc<Shared>,
    retry_interval: Duration,
    default_fps: u32,
    one_shot: bool,
    kind: ReceiverKind,
}

impl Ingest {
    async fn run(mut self) {
        let mut stop_rx = self.shared.stop.subscribe();
        let mut next_timestamp: u32 = 0;

        loop {
            if self.shared.stop_requested() {
                break;
            }
            self.shared.set_state(ReceiverState::Connecting);

            let connected = tokio::select! {
                _ = wait_stop(&mut stop_rx) => break,
                res = tokio::time::timeout(self.shared.timeout(), self.source.connect(&self.uri)) => {
                    res.map_err(Error::from).and_then(|r| r)
                }
            };

            if let Err(e) = connected {
                self.source.disconnect().await;
                let terminal = matches!(e, Error::Receiver(ReceiverError::Closed));
                let will_retry = !self.one_shot && !terminal;
                self.shared.emit(ReceiverEvent::Failed {
                    error: e.to_string(),
                    will_retry,
                });
                if !will_retry {
                    tracing::info!(uri = %self.uri, error = %e, "Receiver connect failed");
                    break;
                }

                tracing::warn!(
                    uri = %self.uri,
                    error = %e,
                    retry_ms = self.retry_interval.as_millis() as u64,
                    "Receiver connect failed, retrying"
                );
                if !self.retry_wait(&mut stop_rx).await {
                    break;
                }
                continue;
            }

            self.shared.running.store(true, Ordering::Release);
            self.shared.set_state(ReceiverState::Streaming);
            self.shared.emit(ReceiverEvent::Connected);
            tracing::info!(uri = %self.uri, kind = self.kind.as_str(), "Receiver connected");

            let end = self.stream(&mut stop_rx, &mut next_timestamp).await;

            self.shared.running.store(false, Ordering::Release);
            self.source.disconnect().await;

            match end {
                StreamEnd::Stopped | StreamEnd::TargetGone => break,
                StreamEnd::Eof if self.one_shot => {
                    tracing::info!(uri = %self.uri, "Proxy source ended");
                    break;
                }
                StreamEnd::Eof => {
                    tracing::warn!(uri = %self.uri, "Source ended, reconnecting");
                }
                StreamEnd::Failed(e) => {
                    self.shared.emit(ReceiverEvent::Failed {
                        error: e.to_string(),
                        will_retry: !self.one_shot,
                    });
                    if self.one_shot {
                        tracing::info!(uri = %self.uri, error = %e, "Proxy source failed");
                        break;
                    }
                    tracing::warn!(uri = %self.uri, error = %e, "Source read failed, reconnecting");
                }
            }

            if !self.retry_wait(&mut stop_rx).await {
                break;
            }
        }

        self.shared.set_state(ReceiverState::Stopping);
        self.shared.running.store(false, Ordering::Release);
        self.shared.emit(ReceiverEvent::Stopped);
        tracing::info!(uri = %self.uri, index = self.shared.index.load(Ordering::Acquire), "Receiver stopped");
        self.shared.set_state(ReceiverState::Idle);
        // Dropping `self.sink` closes a proxy queue
    }

    /// Sleep the retry interval; `false` if stopped meanwhile
    async fn retry_wait(&mut self, stop_rx: &mut watch::Receiver<bool>) -> bool {
        self.shared.set_state(ReceiverState::Retrying);
        tokio::select! {
            _ = wait_stop(stop_rx) => false,
            _ = tokio::time::sleep(self.retry_interval) => !self.shared.stop_requested(),
        }
    }

    async fn stream(
        &mut self,
        stop_rx: &mut watch::Receiver<bool>,
        next_timestamp: &mut u32,
    ) -> StreamEnd {
        loop {
            let read = tokio::select! {
                _ = wait_stop(stop_rx) => return StreamEnd::Stopped,
                res = tokio::time::timeout(self.shared.timeout(), self.source.read()) => res,
            };
            if self.shared.stop_requested() {
                return StreamEnd::Stopped;
            }

            let unit = match read {
                Ok(Ok(Some(unit))) => unit,
                Ok(Ok(None)) => return StreamEnd::Eof,
                Ok(Err(e)) => return StreamEnd::Failed(e),
                Err(elapsed) => return StreamEnd::Failed(elapsed.into()),
            };
            if unit.data.is_empty() {
                continue;
            }

            let index = self.shared.index.fetch_add(1, Ordering::AcqRel) + 1;

            let mut media = self.shared.media.borrow().clone();
            media.absorb_parameter_sets(&unit.data);
            media.fps = self
                .source
                .fps()
                .filter(|fps| *fps > 0)
                .or_else(|| (media.fps > 0).then_some(media.fps))
                .unwrap_or(self.default_fps);

            let timestamp = unit.timestamp.unwrap_or(*next_timestamp);
            *next_timestamp = timestamp.wrapping_add(ticks_per_frame(media.fps));

            let frame = Frame::from_annexb(h264::normalize_start_code(unit.data), timestamp, index);
            self.shared.media.send_replace(media.clone());

            if let Some(end) = self.deliver(frame, &media).await {
                return end;
            }
        }
    }

    async fn deliver(&mut self, frame: Frame, media: &MediaInfo) -> Option<StreamEnd> {
        match &self.sink {
            Sink::Registry {
                registry,
                stream_id,
            } => {
                let Some(registry) = registry.upgrade() else {
                    return Some(StreamEnd::TargetGone);
                };
                match registry.broadcast(stream_id, frame, Some(media)).await {
                    Ok(_) => None,
                    Err(RegistryError::StreamNotFound(_)) => {
                        tracing::debug!(stream = %stream_id, "Stream gone, receiver exiting");
                        Some(StreamEnd::TargetGone)
                    }
                    Err(e) => {
                        tracing::debug!(stream = %stream_id, error = %e, "Broadcast rejected");
                        None
                    }
                }
            }
            Sink::Queue(tx) => match tx.try_send(frame) {
                Ok(()) => None,
                Err(mpsc::error::TrySendError::Full(frame)) => {
                    tracing::trace!(index = frame.sequence_index, "Proxy queue full, frame dropped");
                    None
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Some(StreamEnd::TargetGone),
            },
        }
    }
}

/// Resolve once a stop has been requested or the handle is gone
async fn wait_stop(stop_rx: &mut watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow_and_update() {
            return;
        }
        if stop_rx.changed().await.is_err() {
            return;
        }
    }
}
