//! File relay demo - replays an Annex-B H.264 file through the relay
//!
//! Run with: cargo run --example file_relay -- <path.h264> [fps]
//!
//! This demo:
//! - Bootstraps one file input with an RTSP output
//! - Attaches a consumer session and reads its frame queue
//! - Prints a status line every few seconds until Ctrl-C
//!
//! Raw H.264 can be produced with:
//!   ffmpeg -i input.mp4 -c:v copy -bsf:v h264_mp4toannexb -an -f h264 out.h264

use std::sync::Arc;
use std::time::Duration;

use media_relay::{InputConfig, MediaRelay, ReceiverConfig, RelayConfig, TransportHandle};

const STREAM_ID: &str = "demo";

fn print_usage() {
    println!("Usage: file_relay <path.h264> [fps]");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }
    let path = &args[1];
    let fps: u32 = match args.get(2) {
        Some(fps) => fps.parse()?,
        None => 25,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("media_relay=debug".parse()?)
                .add_directive("file_relay=info".parse()?),
        )
        .init();

    let config = RelayConfig::default()
        .receiver(ReceiverConfig::default().default_fps(fps))
        .input(InputConfig::new(STREAM_ID, format!("file://{}", path)).output("rtsp"));

    let mut relay = MediaRelay::new(config);
    let started = relay.start().await?;
    if started == 0 {
        return Err(format!("could not start input {}", path).into());
    }

    let transport = Arc::new(TransportHandle::tcp("127.0.0.1:50000".parse()?));
    relay
        .live()
        .add_session(STREAM_ID, "viewer-1", "rtsp", transport)
        .await?;
    let mut frames = relay.live().get_frames(STREAM_ID, "viewer-1").await?;

    let consumer = tokio::spawn(async move {
        let mut count = 0u64;
        let mut keyframes = 0u64;
        while let Some(frame) = frames.recv().await {
            count += 1;
            if frame.is_keyframe {
                keyframes += 1;
            }
            tracing::trace!(index = frame.sequence_index, ts = frame.timestamp, size = frame.size(), "Frame");
        }
        (count, keyframes)
    });

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let status = relay.status().await;
                for stream in &status.live {
                    tracing::info!(
                        stream = %stream.stream_id,
                        alive = stream.input_status,
                        index = stream.index,
                        fps = stream.fps,
                        width = stream.width,
                        height = stream.height,
                        dropped = status.dropped_frames(),
                        "Status"
                    );
                }
            }
        }
    }

    relay.shutdown().await;
    let (count, keyframes) = consumer.await?;
    println!("Received {} frames ({} keyframes)", count, keyframes);
    Ok(())
}
