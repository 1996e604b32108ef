//! Registry behavior under concurrent producers and consumers

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_test::{assert_err, assert_ok};

use media_relay::receiver::push;
use media_relay::registry::{FanOut, RegistryError, Transport};
use media_relay::{
    Frame, LivenessMonitor, MonitorConfig, ProxyRegistry, Receiver, ReceiverConfig, StreamRegistry,
    TransportHandle,
};

const IDR: &[u8] = &[0, 0, 0, 1, 0x65, 0x88, 0x84];
const P: &[u8] = &[0, 0, 0, 1, 0x41, 0x9A];

fn frame(idx: u64) -> Frame {
    let payload = if idx % 10 == 1 { IDR } else { P };
    Frame::from_annexb(Bytes::from_static(payload), (idx as u32) * 3600, idx)
}

fn transport() -> Arc<dyn Transport> {
    Arc::new(TransportHandle::tcp("10.1.1.1:6000".parse().unwrap()))
}

#[tokio::test]
async fn test_duplicate_stream_rejected_first_intact() {
    let registry = Arc::new(StreamRegistry::new());
    let (_h1, first) = push::channel(4);
    let (_h2, second) = push::channel(4);

    assert_ok!(
        registry
            .add_stream("cam1", "proto://host/a", Receiver::new(Box::new(first), ReceiverConfig::default()))
            .await
    );
    assert!(matches!(
        registry
            .add_stream("cam1", "proto://host/b", Receiver::new(Box::new(second), ReceiverConfig::default()))
            .await,
        Err(RegistryError::StreamAlreadyExists(_))
    ));

    let info = assert_ok!(registry.get_stream("cam1").await);
    assert_eq!(info.uri, "proto://host/a");
    assert_eq!(registry.stream_count().await, 1);
}

#[tokio::test]
async fn test_validation_errors() {
    let registry = Arc::new(StreamRegistry::new());
    assert!(matches!(
        registry.add_push_stream("", "proto://x").await,
        Err(RegistryError::EmptyStreamId)
    ));
    assert!(matches!(
        registry.add_push_stream("cam1", "").await,
        Err(RegistryError::EmptyUri)
    ));
    assert!(matches!(
        registry.add_push_stream("cam1", "host/path").await,
        Err(RegistryError::InvalidUri(_))
    ));

    assert_ok!(registry.add_push_stream("cam1", "proto://x").await);
    assert!(matches!(
        registry.add_output("cam1", "hls", true, None).await,
        Err(RegistryError::UnsupportedProtocol(_))
    ));
    assert_ok!(registry.add_output("cam1", "Dmi", true, None).await);
    assert!(matches!(
        registry.add_output("cam1", "dmi", true, None).await,
        Err(RegistryError::OutputAlreadyExists(_))
    ));
    assert!(matches!(
        registry.add_session("nope", "s1", "rtsp", transport()).await,
        Err(RegistryError::StreamNotFound(_))
    ));
}

#[tokio::test]
async fn test_slow_session_does_not_stall_others() {
    let registry = Arc::new(StreamRegistry::new());
    assert_ok!(registry.add_push_stream("cam1", "proto://host/path").await);
    assert_ok!(registry.add_session("cam1", "slow", "rtsp", transport()).await);
    assert_ok!(registry.add_session("cam1", "fast", "rtmp", transport()).await);

    let _slow = assert_ok!(registry.get_frames("cam1", "slow").await);
    let mut fast = assert_ok!(registry.get_frames("cam1", "fast").await);

    let capacity = registry.config().session_queue_capacity as u64;
    let mut received = Vec::new();
    for idx in 1..=capacity + 3 {
        let result = assert_ok!(registry.broadcast("cam1", frame(idx), None).await);
        if idx <= capacity {
            assert_eq!(result.delivered, 2);
        } else {
            assert_eq!(
                result,
                FanOut {
                    delivered: 1,
                    dropped: 1,
                    skipped: 0,
                    closed: 0
                }
            );
        }
        received.push(assert_ok!(fast.try_recv()).sequence_index);
    }

    let expected: Vec<u64> = (1..=capacity + 3).collect();
    assert_eq!(received, expected);

    let slow = assert_ok!(registry.get_session("cam1", "slow").await);
    assert_eq!(slow.delivered, capacity);
    assert_eq!(slow.dropped, 3);
}

#[tokio::test]
async fn test_late_joiner_gets_cached_keyframe() {
    let registry = Arc::new(StreamRegistry::new());
    assert_ok!(registry.add_push_stream("cam1", "proto://host/path").await);

    // Keyframe at 1, inter-frames after
    for idx in 1..=4 {
        assert_ok!(registry.broadcast("cam1", frame(idx), None).await);
    }

    assert_ok!(registry.add_session("cam1", "late", "gb28181", transport()).await);
    let mut frames = assert_ok!(registry.get_frames("cam1", "late").await);

    assert_ok!(registry.broadcast("cam1", frame(5), None).await);
    let first = assert_ok!(frames.try_recv());
    assert!(first.is_keyframe);
    assert_eq!(&first.payload[..], IDR);
    assert_eq!(first.timestamp, 5 * 3600);
    assert_eq!(first.sequence_index, 5);

    // Next true keyframe is delivered as-is and ends the stand-in phase
    for idx in 6..=12 {
        assert_ok!(registry.broadcast("cam1", frame(idx), None).await);
        let got = assert_ok!(frames.try_recv());
        assert_eq!(got.sequence_index, idx);
        if idx > 11 {
            assert!(!got.is_keyframe);
        } else {
            assert!(got.is_keyframe);
        }
    }
}

#[tokio::test]
async fn test_remove_session_closes_queue_once() {
    let registry = Arc::new(StreamRegistry::new());
    assert_ok!(registry.add_push_stream("cam1", "proto://host/path").await);

    let handle = Arc::new(TransportHandle::tcp("10.1.1.1:6000".parse().unwrap()));
    assert_ok!(registry.add_session("cam1", "s1", "rtsp", handle.clone()).await);
    let mut frames = assert_ok!(registry.get_frames("cam1", "s1").await);
    assert_err!(registry.get_frames("cam1", "s1").await);

    assert_ok!(registry.remove_session("cam1", "s1").await);
    assert!(frames.recv().await.is_none());
    assert!(handle.is_closed());

    assert!(matches!(
        registry.remove_session("cam1", "s1").await,
        Err(RegistryError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_liveness_follows_producer() {
    let live = Arc::new(StreamRegistry::new());
    let proxy = Arc::new(ProxyRegistry::new());
    assert_ok!(live.add_push_stream("cam1", "proto://host/path").await);

    let producer = {
        let live = Arc::clone(&live);
        tokio::spawn(async move {
            for idx in 1.. {
                if live.broadcast("cam1", frame(idx), None).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(40)).await;
            }
        })
    };

    let config = MonitorConfig::default()
        .interval(Duration::from_millis(200))
        .sample_window(Duration::from_millis(100));
    let monitor = LivenessMonitor::new(Arc::clone(&live), proxy, config);

    monitor.run_once().await;
    assert!(assert_ok!(live.get_stream("cam1").await).input_status);

    producer.abort();
    let _ = producer.await;

    monitor.run_once().await;
    assert!(!assert_ok!(live.get_stream("cam1").await).input_status);
}
