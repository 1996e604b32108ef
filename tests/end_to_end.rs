//! Stream lifecycle through the public API: a pull receiver feeding a live
//! stream, a consumer session reading it, and teardown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_test::{assert_err, assert_ok};

use media_relay::receiver::{push, AccessUnit, ReceiverEvent};
use media_relay::registry::{RegistryError, Transport};
use media_relay::{
    Receiver, ReceiverConfig, ReceiverKind, Result, Source, StreamRegistry, TransportHandle,
};

const IDR: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1F, 0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80, 0, 0, 0, 1, 0x65, 0x88];
const P: &[u8] = &[0, 0, 0, 1, 0x41, 0x9A];

/// Camera that sends a keyframe every `gop` units, one unit per `period`
struct FakeCamera {
    gop: u64,
    period: Duration,
    sent: u64,
}

impl FakeCamera {
    fn new(gop: u64, period: Duration) -> Box<Self> {
        Box::new(Self {
            gop,
            period,
            sent: 0,
        })
    }
}

#[async_trait]
impl Source for FakeCamera {
    fn kind(&self) -> ReceiverKind {
        ReceiverKind::PullClient
    }

    async fn connect(&mut self, _uri: &str) -> Result<()> {
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<AccessUnit>> {
        tokio::time::sleep(self.period).await;
        let unit = if self.sent % self.gop == 0 { IDR } else { P };
        self.sent += 1;
        Ok(Some(AccessUnit::new(Bytes::from_static(unit))))
    }

    fn fps(&self) -> Option<u32> {
        Some(25)
    }
}

fn transport() -> Arc<dyn Transport> {
    Arc::new(TransportHandle::tcp("192.168.1.20:41000".parse().unwrap()))
}

#[tokio::test]
async fn test_camera_to_session_and_teardown() {
    let registry = Arc::new(StreamRegistry::new());
    let receiver = Receiver::new(
        FakeCamera::new(10, Duration::from_millis(5)),
        ReceiverConfig::default(),
    );
    let mut events = receiver.events();

    assert_ok!(registry.add_stream("cam1", "proto://host/path", receiver).await);

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, ReceiverEvent::Connected);

    assert_ok!(registry.add_session("cam1", "s1", "rtsp", transport()).await);
    assert_ok!(registry.add_output("cam1", "rtsp", true, None).await);
    assert!(registry.exist_output("cam1", "RTSP").await);

    let mut frames = assert_ok!(registry.get_frames("cam1", "s1").await);

    let mut last = 0;
    for n in 0..20 {
        let frame = tokio::time::timeout(Duration::from_secs(2), frames.recv())
            .await
            .unwrap()
            .unwrap();
        if n == 0 {
            assert!(frame.is_keyframe);
        }
        assert!(frame.sequence_index > last);
        assert_eq!(&frame.payload[..4], &[0, 0, 0, 1]);
        last = frame.sequence_index;
    }

    let info = assert_ok!(registry.get_stream("cam1").await);
    assert_eq!(info.receiver, Some(ReceiverKind::PullClient));
    assert!(info.receiver_running);
    assert!(!info.push);
    assert_eq!(info.fps, 25);
    assert!(!assert_ok!(registry.get_sps("cam1").await).is_empty());
    assert!(!assert_ok!(registry.get_pps("cam1").await).is_empty());

    assert_ok!(registry.remove_session("cam1", "s1").await);
    let drained = tokio::time::timeout(Duration::from_secs(2), async {
        while frames.recv().await.is_some() {}
    })
    .await;
    assert!(drained.is_ok());
    assert!(matches!(
        registry.remove_session("cam1", "s1").await,
        Err(RegistryError::SessionNotFound(_))
    ));

    assert_ok!(registry.remove_stream("cam1").await);
    assert!(!registry.exist_input("cam1").await);
    assert!(matches!(
        registry.get_frames("cam1", "s1").await,
        Err(RegistryError::StreamNotFound(_))
    ));
}

#[tokio::test]
async fn test_remove_stream_stops_receiver() {
    let registry = Arc::new(StreamRegistry::new());
    let (handle, source) = push::channel(8);
    let receiver = Receiver::new(Box::new(source), ReceiverConfig::default());

    assert_ok!(registry.add_stream("cam1", "proto://host/path", receiver).await);
    assert_ok!(handle.push(Bytes::from_static(IDR), None).await);
    for _ in 0..200 {
        if assert_ok!(registry.get_stream("cam1").await).has_keyframe {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_ok!(registry.remove_stream("cam1").await);
    assert_err!(registry.get_stream("cam1").await);

    // Receiver task exits and drops its source
    for _ in 0..200 {
        if handle.is_closed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(handle.is_closed());
    assert_err!(handle.push(Bytes::from_static(P), None).await);
}

#[tokio::test]
async fn test_push_stream_with_attached_receiver() {
    let registry = Arc::new(StreamRegistry::new());
    assert_ok!(registry.add_push_stream("pub1", "proto://host/pub1").await);
    assert_ok!(registry.add_session("pub1", "viewer", "rtmp", transport()).await);
    let mut frames = assert_ok!(registry.get_frames("pub1", "viewer").await);

    let (handle, source) = push::channel(8);
    let receiver = Receiver::new(Box::new(source.with_fps(30)), ReceiverConfig::default());
    assert_ok!(registry.attach_receiver("pub1", receiver).await);

    let (_, second) = push::channel(1);
    let again = Receiver::new(Box::new(second), ReceiverConfig::default());
    assert!(matches!(
        registry.attach_receiver("pub1", again).await,
        Err(RegistryError::ReceiverAlreadyAttached(_))
    ));

    assert_ok!(handle.push(Bytes::from_static(IDR), None).await);
    assert_ok!(handle.push(Bytes::from_static(P), None).await);

    let first = tokio::time::timeout(Duration::from_secs(2), frames.recv())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(2), frames.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(first.is_keyframe);
    assert!(!second.is_keyframe);
    assert_eq!(first.sequence_index, 1);
    assert_eq!(second.sequence_index, 2);
    assert_eq!(second.timestamp - first.timestamp, 3000);

    assert_ok!(registry.remove_stream("pub1").await);
}
