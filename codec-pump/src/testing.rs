//! A scripted engine for exercising the pump without a real codec.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::engine::{CodecEngine, CodecKind, CodecOptions, Produce, Submit, WorkItem};
use crate::error::EngineError;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Unit(pub u32);

pub(crate) struct Script {
    pub kind: CodecKind,
    /// Every submit call, in order, including refused ones.
    pub attempts: Vec<u32>,
    pub accepted: Vec<u32>,
    pub would_block_once: HashSet<u32>,
    pub reject: HashSet<u32>,
    pub capacity: Option<usize>,
    pub pending: VecDeque<u32>,
    pub produce_errors: usize,
    pub continue_after_error: bool,
    pub fail_open: bool,
    pub flushed: bool,
    pub closed: bool,
    /// Held by the engine during each produce call, letting a test stall it.
    pub gate: Arc<Mutex<()>>,
}

impl Script {
    pub fn new(kind: CodecKind) -> Arc<Mutex<Script>> {
        Arc::new(Mutex::new(Self {
            kind,
            attempts: Vec::new(),
            accepted: Vec::new(),
            would_block_once: HashSet::new(),
            reject: HashSet::new(),
            capacity: None,
            pending: VecDeque::new(),
            produce_errors: 0,
            continue_after_error: false,
            fail_open: false,
            flushed: false,
            closed: false,
            gate: Arc::new(Mutex::new(())),
        }))
    }
}

pub(crate) struct ScriptedEngine {
    script: Arc<Mutex<Script>>,
    kind: CodecKind,
}

impl ScriptedEngine {
    fn produce(&mut self, out: &mut Unit) -> Produce {
        let gate = Arc::clone(&self.script.lock().gate);
        let _gate = gate.lock();
        let mut script = self.script.lock();
        if script.produce_errors > 0 {
            script.produce_errors -= 1;
            return Produce::Error(EngineError::new(-5, "scripted produce failure"));
        }
        match script.pending.pop_front() {
            Some(id) => {
                out.0 = id;
                Produce::Ready
            }
            None if script.flushed => Produce::EndOfStream,
            None => Produce::NoOutput,
        }
    }
}

impl CodecEngine for ScriptedEngine {
    type Frame = Unit;
    type Packet = Unit;
    type Descriptor = Arc<Mutex<Script>>;

    fn open(descriptor: &Self::Descriptor, _options: &CodecOptions) -> Result<Self, EngineError> {
        let script = descriptor.lock();
        if script.fail_open {
            return Err(EngineError::invalid_argument("scripted open failure"));
        }
        Ok(Self {
            script: Arc::clone(descriptor),
            kind: script.kind,
        })
    }

    fn kind(&self) -> CodecKind {
        self.kind
    }

    fn submit(&mut self, item: &WorkItem<Unit, Unit>) -> Submit {
        let mut script = self.script.lock();
        let id = match (self.kind, item) {
            (_, WorkItem::Flush) => {
                script.flushed = true;
                return Submit::Accepted;
            }
            (CodecKind::Decoder, WorkItem::Packet(unit)) => unit.0,
            (CodecKind::Encoder, WorkItem::Frame(unit)) => unit.0,
            _ => return Submit::Error(EngineError::invalid_argument("wrong unit kind")),
        };
        script.attempts.push(id);
        if script.reject.contains(&id) {
            return Submit::Error(EngineError::invalid_data(format!("unit {} rejected", id)));
        }
        if script.would_block_once.remove(&id) {
            return Submit::WouldBlock;
        }
        if script
            .capacity
            .is_some_and(|capacity| script.pending.len() >= capacity)
        {
            return Submit::WouldBlock;
        }
        script.accepted.push(id);
        script.pending.push_back(id);
        Submit::Accepted
    }

    fn produce_frame(&mut self, frame: &mut Unit) -> Produce {
        if self.kind != CodecKind::Decoder {
            return Produce::Error(EngineError::unsupported("encoder produces packets"));
        }
        self.produce(frame)
    }

    fn produce_packet(&mut self, packet: &mut Unit) -> Produce {
        if self.kind != CodecKind::Encoder {
            return Produce::Error(EngineError::unsupported("decoder produces frames"));
        }
        self.produce(packet)
    }

    fn alloc_frame(&self) -> Unit {
        Unit::default()
    }

    fn alloc_packet(&self) -> Unit {
        Unit::default()
    }

    fn continue_after_error(&self, _error: &EngineError) -> bool {
        self.script.lock().continue_after_error
    }

    fn close(&mut self) {
        self.script.lock().closed = true;
    }
}

/// Polls `cond` until it holds or `timeout` passes.
pub(crate) fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}
