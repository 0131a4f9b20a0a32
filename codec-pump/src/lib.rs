//! Asynchronous codec pump: drives an encoder or decoder on a background
//! worker, takes input without blocking and hands output to one consumer per
//! channel, in order.

/// Registers FFmpeg components. Call once at startup before opening an
/// [`engine::ffmpeg::FfmpegCodec`].
#[cfg(feature = "ffmpeg")]
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod config;
pub(crate) mod dispatch;
pub mod engine;
pub mod error;
pub mod frame;
pub mod packet;
pub mod pool;
pub(crate) mod pump;
pub(crate) mod queue;
pub mod registry;
pub mod session;
pub(crate) mod stream;

#[cfg(test)]
mod testing;

pub use config::{PumpConfig, config};
pub use dispatch::Channel;
pub use engine::raw::{RawCodec, RawDescriptor};
pub use engine::{CodecEngine, CodecKind, CodecOptions, Produce, Submit, WorkItem};
pub use error::{EngineError, ErrorEvent, PumpError};
pub use frame::VideoFrame;
pub use packet::Packet;
pub use pool::{PoolStats, Pooled};
pub use pump::{PRODUCE_CONTEXT, PumpStats, SUBMIT_CONTEXT};
pub use registry::{Handle, SessionTable};
pub use session::{Session, SessionState};
pub use stream::UnitStream;
