//! The codec engine contract driven by the pump.
//!
//! An engine is a stateful encoder or decoder. The pump only ever talks to it
//! from one thread at a time, so implementations need `Send` but not `Sync`.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::error::EngineError;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod raw;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    /// Consumes packets, produces frames.
    Decoder,
    /// Consumes frames, produces packets.
    Encoder,
}

impl Display for CodecKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            CodecKind::Decoder => write!(f, "decoder"),
            CodecKind::Encoder => write!(f, "encoder"),
        }
    }
}

/// One pending input unit.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkItem<F, P> {
    Frame(F),
    Packet(P),
    /// Signals end of input; the engine drains what it holds.
    Flush,
}

impl<F, P> WorkItem<F, P> {
    pub fn label(&self) -> &'static str {
        match self {
            WorkItem::Frame(_) => "frame",
            WorkItem::Packet(_) => "packet",
            WorkItem::Flush => "flush",
        }
    }
}

/// Outcome of handing one work item to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submit {
    Accepted,
    /// The engine is full until some output is drained; retry the same item later.
    WouldBlock,
    Error(EngineError),
}

/// Outcome of asking the engine to fill one output unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Produce {
    Ready,
    NoOutput,
    /// Flushed and fully drained.
    EndOfStream,
    Error(EngineError),
}

pub trait CodecEngine: Send + Sized + 'static {
    type Frame: Send + 'static;
    type Packet: Send + 'static;
    /// Identifies the codec to open (codec id, parameters, settings).
    type Descriptor;

    fn open(descriptor: &Self::Descriptor, options: &CodecOptions) -> Result<Self, EngineError>;

    fn kind(&self) -> CodecKind;

    /// Submits one item. The engine copies or references what it needs; the
    /// item itself is dropped by the pump once accepted or rejected.
    fn submit(&mut self, item: &WorkItem<Self::Frame, Self::Packet>) -> Submit;

    fn produce_frame(&mut self, frame: &mut Self::Frame) -> Produce;

    fn produce_packet(&mut self, packet: &mut Self::Packet) -> Produce;

    /// Allocates an empty output frame for the pool.
    fn alloc_frame(&self) -> Self::Frame;

    /// Allocates an empty output packet for the pool.
    fn alloc_packet(&self) -> Self::Packet;

    /// Whether feeding should carry on with the next queued item after `error`
    /// rejected the current one.
    fn continue_after_error(&self, _error: &EngineError) -> bool {
        false
    }

    /// Releases engine resources. Called once, after the worker has stopped.
    fn close(&mut self) {}
}

/// String options applied when the engine is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecOptions {
    entries: BTreeMap<String, String>,
}

impl CodecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl ToString) -> &mut Self {
        self.entries.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Parses `key`, falling back to `default` when absent.
    pub fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, EngineError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| {
                EngineError::invalid_argument(format!("invalid value for option {}: {:?}", key, raw))
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: ToString, V: ToString> FromIterator<(K, V)> for CodecOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}
