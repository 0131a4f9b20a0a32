//! Session controller: owns the engine, the worker thread and the dispatcher.

use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::config::{PumpConfig, config};
use crate::dispatch::{Channel, Consumer, Dispatcher};
use crate::engine::{CodecEngine, CodecKind, CodecOptions, Produce, WorkItem};
use crate::error::{ErrorEvent, PumpError};
use crate::pool::Pooled;
use crate::pump::{Item, PRODUCE_CONTEXT, Pump, PumpStats, Shared};
use crate::stream::{self, UnitStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Open,
    Closing,
    Closed,
}

enum Phase<E: CodecEngine> {
    Unopened,
    Open(Running<E>),
    /// Shutdown in progress; carries the dispatch thread id so consumers
    /// cannot wait on a close that is waiting on them.
    Closing(ThreadId),
    Closed,
}

struct Running<E: CodecEngine> {
    kind: CodecKind,
    engine: Arc<Mutex<E>>,
    worker: JoinHandle<()>,
    dispatcher: Dispatcher,
}

/// An asynchronous encode or decode session.
///
/// Input is queued with [`send_packet`](Self::send_packet) /
/// [`send_frame`](Self::send_frame) and never blocks; output reaches the
/// registered consumers on a dedicated dispatch thread, one unit at a time.
pub struct Session<E: CodecEngine> {
    config: PumpConfig,
    shared: Arc<Shared<E>>,
    phase: Mutex<Phase<E>>,
    closed: Condvar,
}

impl<E: CodecEngine> Session<E> {
    pub fn new() -> Self {
        Self::with_config(config().clone())
    }

    pub fn with_config(config: PumpConfig) -> Self {
        let shared = Arc::new(Shared::new(config.pool_slack()));
        Self {
            config,
            shared,
            phase: Mutex::new(Phase::Unopened),
            closed: Condvar::new(),
        }
    }

    pub fn config(&self) -> &PumpConfig {
        &self.config
    }

    /// Opens the engine and starts the worker. A session opens at most once.
    pub fn open(&self, descriptor: &E::Descriptor, options: &CodecOptions) -> anyhow::Result<()> {
        let mut phase = self.phase.lock();
        if !matches!(*phase, Phase::Unopened) {
            return Err(PumpError::AlreadyOpened.into());
        }

        let mut engine = E::open(descriptor, options).map_err(PumpError::Open)?;
        let kind = engine.kind();

        let mut dispatcher = match Dispatcher::spawn(
            self.config.dispatch_thread_name(),
            Arc::clone(&self.shared.counters),
        ) {
            Ok(dispatcher) => dispatcher,
            Err(e) => {
                engine.close();
                return Err(e.into());
            }
        };
        let Some(handle) = dispatcher.handle() else {
            engine.close();
            return Err(PumpError::NotOpen.into());
        };

        let engine = Arc::new(Mutex::new(engine));
        let pump = Pump::new(Arc::clone(&self.shared), Arc::clone(&engine), handle, kind);
        self.shared.start();
        let worker = match std::thread::Builder::new()
            .name(self.config.worker_thread_name())
            .spawn(move || pump.run())
        {
            Ok(worker) => worker,
            Err(e) => {
                self.shared.stop();
                dispatcher.shutdown();
                engine.lock().close();
                return Err(PumpError::Spawn("worker", e).into());
            }
        };

        log::info!("{}: {} opened", self.config.name(), kind);
        *phase = Phase::Open(Running {
            kind,
            engine,
            worker,
            dispatcher,
        });
        Ok(())
    }

    /// Stops the worker, waits for it, then closes the engine. Items still
    /// queued are dropped. Closing an already closed session does nothing;
    /// a close racing another one returns once the engine is closed.
    pub fn close(&self) -> anyhow::Result<()> {
        let mut phase = self.phase.lock();
        loop {
            let dispatch_thread = match &*phase {
                Phase::Open(running) => running.dispatcher.thread_id(),
                Phase::Closing(dispatch_thread) => *dispatch_thread,
                Phase::Unopened | Phase::Closed => break,
            };
            if dispatch_thread == std::thread::current().id() {
                return Err(PumpError::Reentrant("close").into());
            }
            if matches!(*phase, Phase::Open(_)) {
                break;
            }
            self.closed.wait(&mut phase);
        }
        let running = match std::mem::replace(&mut *phase, Phase::Closed) {
            Phase::Open(running) => running,
            _ => return Ok(()),
        };
        *phase = Phase::Closing(running.dispatcher.thread_id());
        // Consumers may call back into the session while the worker finishes.
        drop(phase);

        self.shutdown(running);
        *self.phase.lock() = Phase::Closed;
        self.closed.notify_all();
        Ok(())
    }

    fn clear_consumers(&self) {
        for channel in [Channel::Frame, Channel::Packet, Channel::Error] {
            self.shared.consumers.clear(channel);
        }
    }

    fn shutdown(&self, running: Running<E>) {
        let Running {
            kind,
            engine,
            worker,
            mut dispatcher,
        } = running;

        // Nothing is delivered past close; this also releases a stream
        // consumer stuck on a full channel.
        self.clear_consumers();
        self.shared.stop();
        if worker.join().is_err() {
            log::error!("{}: {} worker panicked", self.config.name(), kind);
        }
        dispatcher.shutdown();
        engine.lock().close();

        let dropped = self.shared.state.lock().queue.clear();
        if dropped > 0 {
            log::warn!(
                "{}: {} closed with {} queued item(s)",
                self.config.name(),
                kind,
                dropped
            );
        }
        self.shared.frame_pool.clear();
        self.shared.packet_pool.clear();
        log::info!("{}: {} closed", self.config.name(), kind);
    }

    pub fn state(&self) -> SessionState {
        match &*self.phase.lock() {
            Phase::Unopened => SessionState::Unopened,
            Phase::Open(_) => SessionState::Open,
            Phase::Closing(_) => SessionState::Closing,
            Phase::Closed => SessionState::Closed,
        }
    }

    pub fn kind(&self) -> Option<CodecKind> {
        match &*self.phase.lock() {
            Phase::Open(running) => Some(running.kind),
            _ => None,
        }
    }

    /// Queues a packet for a decoder.
    pub fn send_packet(&self, packet: E::Packet) -> anyhow::Result<()> {
        self.enqueue(CodecKind::Decoder, "send packets", WorkItem::Packet(packet))
    }

    /// Queues a frame for an encoder.
    pub fn send_frame(&self, frame: E::Frame) -> anyhow::Result<()> {
        self.enqueue(CodecKind::Encoder, "send frames", WorkItem::Frame(frame))
    }

    /// Queues an end-of-input marker; the engine drains what it still holds.
    pub fn flush(&self) -> anyhow::Result<()> {
        let phase = self.phase.lock();
        Self::ensure_open(&phase)?;
        self.shared.enqueue(WorkItem::Flush);
        Ok(())
    }

    fn enqueue(
        &self,
        expected: CodecKind,
        operation: &'static str,
        item: Item<E>,
    ) -> anyhow::Result<()> {
        let phase = self.phase.lock();
        let kind = Self::ensure_open(&phase)?;
        if kind != expected {
            return Err(PumpError::WrongDirection { kind, operation }.into());
        }
        self.shared.enqueue(item);
        Ok(())
    }

    fn ensure_open(phase: &Phase<E>) -> Result<CodecKind, PumpError> {
        match phase {
            Phase::Open(running) => Ok(running.kind),
            Phase::Unopened => Err(PumpError::NotOpen),
            Phase::Closing(_) | Phase::Closed => Err(PumpError::Closed),
        }
    }

    /// Pulls one frame straight from a decoder, bypassing the queue and the
    /// dispatcher. Blocks until the worker is between iterations. Returns
    /// `None` when the engine has nothing ready.
    ///
    /// Racing this against a registered frame consumer splits the output
    /// between the two; pick one style per session.
    pub fn receive_frame(&self, reusable: Option<E::Frame>) -> anyhow::Result<Option<E::Frame>> {
        let engine = self.engine_for(CodecKind::Decoder, "receive frames")?;
        let mut engine = engine.lock();
        let mut frame = reusable.unwrap_or_else(|| engine.alloc_frame());
        Self::received(engine.produce_frame(&mut frame), frame)
    }

    /// Pulls one packet straight from an encoder. See [`Self::receive_frame`].
    pub fn receive_packet(
        &self,
        reusable: Option<E::Packet>,
    ) -> anyhow::Result<Option<E::Packet>> {
        let engine = self.engine_for(CodecKind::Encoder, "receive packets")?;
        let mut engine = engine.lock();
        let mut packet = reusable.unwrap_or_else(|| engine.alloc_packet());
        Self::received(engine.produce_packet(&mut packet), packet)
    }

    fn engine_for(
        &self,
        expected: CodecKind,
        operation: &'static str,
    ) -> Result<Arc<Mutex<E>>, PumpError> {
        let phase = self.phase.lock();
        let kind = Self::ensure_open(&phase)?;
        if kind != expected {
            return Err(PumpError::WrongDirection { kind, operation });
        }
        let Phase::Open(running) = &*phase else {
            return Err(PumpError::NotOpen);
        };
        if running.dispatcher.is_dispatch_thread() {
            return Err(PumpError::Reentrant(operation));
        }
        Ok(Arc::clone(&running.engine))
    }

    fn received<T>(outcome: Produce, unit: T) -> anyhow::Result<Option<T>> {
        match outcome {
            Produce::Ready => Ok(Some(unit)),
            Produce::NoOutput | Produce::EndOfStream => Ok(None),
            Produce::Error(error) => Err(PumpError::Engine {
                context: PRODUCE_CONTEXT,
                error,
            }
            .into()),
        }
    }

    /// Registers the frame consumer, replacing any previous one.
    pub fn set_frame_consumer<F>(&self, consumer: F)
    where
        F: Fn(Pooled<E::Frame>) + Send + Sync + 'static,
    {
        self.shared.consumers.frame.set(Some(Arc::new(consumer)));
        self.shared.wake();
    }

    /// Registers the packet consumer, replacing any previous one.
    pub fn set_packet_consumer<F>(&self, consumer: F)
    where
        F: Fn(Pooled<E::Packet>) + Send + Sync + 'static,
    {
        self.shared.consumers.packet.set(Some(Arc::new(consumer)));
        self.shared.wake();
    }

    /// Registers the error consumer, replacing any previous one.
    pub fn set_error_consumer<F>(&self, consumer: F)
    where
        F: Fn(ErrorEvent) + Send + Sync + 'static,
    {
        let consumer: Consumer<ErrorEvent> = Arc::new(consumer);
        self.shared.consumers.error.set(Some(consumer));
    }

    /// Disables delivery on `channel`. The worker keeps running.
    pub fn clear_consumer(&self, channel: Channel) {
        self.shared.consumers.clear(channel);
    }

    pub fn has_consumer(&self, channel: Channel) -> bool {
        self.shared.consumers.is_registered(channel)
    }

    /// Streams decoded frames. Dropping the stream disables the channel.
    pub fn frames(&self) -> UnitStream<Pooled<E::Frame>> {
        let stream = stream::forward(&self.shared.consumers.frame, self.config.stream_capacity());
        self.shared.wake();
        stream
    }

    /// Streams encoded packets. Dropping the stream disables the channel.
    pub fn packets(&self) -> UnitStream<Pooled<E::Packet>> {
        let stream = stream::forward(&self.shared.consumers.packet, self.config.stream_capacity());
        self.shared.wake();
        stream
    }

    /// Streams error events. Dropping the stream disables the channel.
    pub fn errors(&self) -> UnitStream<ErrorEvent> {
        stream::forward(&self.shared.consumers.error, self.config.stream_capacity())
    }

    /// Number of work items waiting to be fed.
    pub fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Whether the worker is blocked waiting for work.
    pub fn is_idle(&self) -> bool {
        self.shared.state.lock().idle
    }

    pub fn stats(&self) -> PumpStats {
        self.shared.stats()
    }
}

impl<E: CodecEngine> Default for Session<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: CodecEngine> Drop for Session<E> {
    fn drop(&mut self) {
        let on_dispatch_thread = match &*self.phase.lock() {
            Phase::Open(running) => running.dispatcher.is_dispatch_thread(),
            _ => false,
        };
        if on_dispatch_thread {
            // Dropped from inside a consumer: the worker is waiting on us and
            // cannot be joined here. It closes the engine on its way out.
            self.clear_consumers();
            self.shared.abandon();
            return;
        }
        if let Err(e) = self.close() {
            log::error!("{}: close on drop failed: {:#}", self.config.name(), e);
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
