use std::sync::Arc;
use std::time::Duration;

use codec_pump::{CodecOptions, Handle, Packet, PumpConfig, RawCodec, RawDescriptor, Session};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

mod manager;

const WIDTH: u32 = 16;
const HEIGHT: u32 = 8;
const FRAME_SIZE: usize = (WIDTH * HEIGHT) as usize * 3 / 2;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("codec_pump", log::LevelFilter::Debug)
        .init();
}

fn session_count() -> usize {
    std::env::var("LITE_CODEC_SESSIONS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3)
}

fn packet_count() -> i64 {
    std::env::args()
        .nth(1)
        .and_then(|v| v.parse().ok())
        .unwrap_or(100)
}

fn synthetic_packet(pts: i64) -> Packet {
    let luma = (pts % 256) as u8;
    let mut data = vec![luma; FRAME_SIZE];
    data[WIDTH as usize * HEIGHT as usize..].fill(128);
    Packet::new(&data, Some(pts)).with_key(pts % 25 == 0)
}

async fn open_session(index: usize) -> anyhow::Result<Handle> {
    let config = codec_pump::config()
        .clone()
        .with_name(&format!("{}-{}", codec_pump::config().name(), index));
    let session = Arc::new(Session::<RawCodec>::with_config(config));
    let descriptor = RawDescriptor::decoder(WIDTH, HEIGHT).with_frame_size(FRAME_SIZE);
    session.open(&descriptor, &CodecOptions::new().with("capacity", 8))?;
    Ok(manager::add_session(session).await)
}

async fn run_session(handle: Handle, packets: i64, cancel: CancellationToken) -> anyhow::Result<()> {
    let session = manager::get_session(handle)
        .await
        .ok_or_else(|| anyhow::anyhow!("session {} not found", handle))?;
    let mut frames = session.frames();
    let mut errors = session.errors();

    let feeder = {
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            for pts in 0..packets {
                if cancel.is_cancelled() {
                    break;
                }
                session.send_packet(synthetic_packet(pts))?;
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            session.flush()
        })
    };

    let mut received = 0;
    while received < packets {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.next() => {
                let Some(frame) = frame else { break };
                log::trace!("session {}: {}", handle, *frame);
                received += 1;
            }
            Some(event) = errors.next() => {
                log::warn!("session {}: {}", handle, event);
            }
        }
    }
    feeder.await??;

    let stats = session.stats();
    log::info!(
        "session {}: {} frames, fed {}, backpressure {}, pool {:?}",
        handle,
        received,
        stats.fed,
        stats.backpressure,
        stats.frame_pool
    );
    drop(frames);
    drop(errors);
    manager::remove_session(handle).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    #[cfg(feature = "ffmpeg")]
    codec_pump::init()?;
    log::info!("pump config: {:?}", PumpConfig::from_env());

    let cancel = CancellationToken::new();
    let packets = packet_count();

    let mut tasks = Vec::new();
    for index in 0..session_count() {
        let handle = open_session(index).await?;
        log::info!("session {} opened", handle);
        tasks.push(tokio::spawn(run_session(handle, packets, cancel.clone())));
    }

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_clone.cancel();
        }
    });

    for task in tasks {
        if let Err(e) = task.await? {
            log::error!("session task failed: {:#}", e);
        }
    }

    manager::close_all().await;
    log::info!("{} session(s) left", manager::session_count().await);
    Ok(())
}
