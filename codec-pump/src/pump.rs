//! The worker loop: feed queued input into the engine, drain its output into
//! the dispatcher, sleep when there is nothing to do.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::dispatch::{ConsumerSlot, Consumers, Delivered, DispatchHandle};
use crate::engine::{CodecEngine, CodecKind, Produce, Submit, WorkItem};
use crate::error::ErrorEvent;
use crate::pool::{PoolStats, Pooled, SharedPool};
use crate::queue::WorkQueue;

pub const SUBMIT_CONTEXT: &str = "error during submit";
pub const PRODUCE_CONTEXT: &str = "error during produce";

pub type Item<E> = WorkItem<<E as CodecEngine>::Frame, <E as CodecEngine>::Packet>;

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub iterations: AtomicU64,
    pub fed: AtomicU64,
    pub rejected: AtomicU64,
    pub backpressure: AtomicU64,
    pub produced: AtomicU64,
    pub delivered: AtomicU64,
    pub errors: AtomicU64,
    pub errors_dropped: AtomicU64,
    pub idle_waits: AtomicU64,
    pub consumer_panics: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Snapshot of a session's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub iterations: u64,
    pub fed: u64,
    pub rejected: u64,
    pub backpressure: u64,
    pub produced: u64,
    pub delivered: u64,
    pub errors: u64,
    pub errors_dropped: u64,
    pub idle_waits: u64,
    pub consumer_panics: u64,
    pub frame_pool: PoolStats,
    pub packet_pool: PoolStats,
}

pub(crate) struct State<E: CodecEngine> {
    pub running: bool,
    /// Set by anything that should make an idle worker look again.
    pub wake_pending: bool,
    pub idle: bool,
    /// The session went away without closing; the worker closes the engine.
    pub orphaned: bool,
    pub queue: WorkQueue<Item<E>>,
}

/// Everything the caller and the worker share.
pub(crate) struct Shared<E: CodecEngine> {
    pub state: Mutex<State<E>>,
    pub wake: Condvar,
    pub consumers: Consumers<E::Frame, E::Packet>,
    pub frame_pool: SharedPool<E::Frame>,
    pub packet_pool: SharedPool<E::Packet>,
    pub counters: Arc<Counters>,
}

impl<E: CodecEngine> Shared<E> {
    pub fn new(pool_slack: usize) -> Self {
        Self {
            state: Mutex::new(State {
                running: false,
                wake_pending: false,
                idle: false,
                orphaned: false,
                queue: WorkQueue::new(),
            }),
            wake: Condvar::new(),
            consumers: Consumers::new(),
            frame_pool: SharedPool::new(pool_slack),
            packet_pool: SharedPool::new(pool_slack),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn enqueue(&self, item: Item<E>) {
        let mut state = self.state.lock();
        state.queue.enqueue(item);
        state.wake_pending = true;
        self.wake.notify_one();
    }

    pub fn wake(&self) {
        let mut state = self.state.lock();
        state.wake_pending = true;
        self.wake.notify_one();
    }

    pub fn start(&self) {
        let mut state = self.state.lock();
        state.running = true;
        state.wake_pending = false;
    }

    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.running = false;
        self.wake.notify_all();
    }

    /// Stops the worker and leaves the engine shutdown to it. Used when the
    /// last session handle is dropped on a thread that cannot join the worker.
    pub fn abandon(&self) {
        let mut state = self.state.lock();
        state.running = false;
        state.orphaned = true;
        self.wake.notify_all();
    }

    pub fn stats(&self) -> PumpStats {
        let c = &self.counters;
        PumpStats {
            iterations: c.iterations.load(Ordering::Relaxed),
            fed: c.fed.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            backpressure: c.backpressure.load(Ordering::Relaxed),
            produced: c.produced.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
            errors_dropped: c.errors_dropped.load(Ordering::Relaxed),
            idle_waits: c.idle_waits.load(Ordering::Relaxed),
            consumer_panics: c.consumer_panics.load(Ordering::Relaxed),
            frame_pool: self.frame_pool.stats(),
            packet_pool: self.packet_pool.stats(),
        }
    }
}

pub(crate) struct Pump<E: CodecEngine> {
    shared: Arc<Shared<E>>,
    engine: Arc<Mutex<E>>,
    dispatch: DispatchHandle,
    kind: CodecKind,
    end_of_stream: AtomicBool,
}

impl<E: CodecEngine> Pump<E> {
    pub fn new(
        shared: Arc<Shared<E>>,
        engine: Arc<Mutex<E>>,
        dispatch: DispatchHandle,
        kind: CodecKind,
    ) -> Self {
        Self {
            shared,
            engine,
            dispatch,
            kind,
            end_of_stream: AtomicBool::new(false),
        }
    }

    pub fn run(self) {
        log::info!("{} pump started", self.kind);
        loop {
            let batch = {
                let mut state = self.shared.state.lock();
                if !state.running {
                    break;
                }
                state.wake_pending = false;
                state.queue.drain_all()
            };
            bump(&self.shared.counters.iterations);

            // The engine stays locked for the whole iteration, which is what
            // keeps synchronous receives out until the worker is idle.
            let progressed = {
                let mut engine = self.engine.lock();
                let fed = self.feed(&mut engine, batch);
                // Draining may have freed room for input refused this round.
                let drained = self.drain(&mut engine);
                fed || drained
            };

            if !progressed {
                self.idle();
            }
        }
        if self.shared.state.lock().orphaned {
            self.close_orphaned();
        }
        log::info!("{} pump stopped", self.kind);
    }

    fn close_orphaned(&self) {
        self.engine.lock().close();
        let left = self.shared.state.lock().queue.clear();
        if left > 0 {
            log::warn!("{} session dropped, discarding {} queued item(s)", self.kind, left);
        }
        log::debug!("{} engine closed by orphaned pump", self.kind);
    }

    /// Blocks until something is enqueued, a consumer is registered or the
    /// session starts closing.
    fn idle(&self) {
        let mut state = self.shared.state.lock();
        if !state.running || state.wake_pending {
            return;
        }
        bump(&self.shared.counters.idle_waits);
        state.idle = true;
        log::trace!("{} pump idle", self.kind);
        while state.running && !state.wake_pending {
            self.shared.wake.wait(&mut state);
        }
        state.idle = false;
    }

    /// Submits `batch` in order. Returns whether any item was consumed, either
    /// accepted or rejected. Whatever is left goes back to the front of the
    /// shared queue.
    pub(crate) fn feed(&self, engine: &mut E, mut batch: VecDeque<Item<E>>) -> bool {
        let mut progressed = false;
        while let Some(item) = batch.pop_front() {
            match engine.submit(&item) {
                Submit::Accepted => {
                    progressed = true;
                    bump(&self.shared.counters.fed);
                    if matches!(item, WorkItem::Flush) {
                        log::debug!("{} flushing", self.kind);
                    } else {
                        self.end_of_stream.store(false, Ordering::Relaxed);
                    }
                }
                Submit::WouldBlock => {
                    bump(&self.shared.counters.backpressure);
                    log::debug!(
                        "{} full, requeueing {} item(s)",
                        self.kind,
                        batch.len() + 1
                    );
                    batch.push_front(item);
                    break;
                }
                Submit::Error(error) => {
                    progressed = true;
                    bump(&self.shared.counters.rejected);
                    let keep_feeding = engine.continue_after_error(&error);
                    log::warn!("{} rejected {}: {}", self.kind, item.label(), error);
                    drop(item);
                    self.emit_error(ErrorEvent::new(SUBMIT_CONTEXT, error));
                    if !keep_feeding {
                        break;
                    }
                }
            }
        }

        if !batch.is_empty() {
            self.shared.state.lock().queue.requeue_front(batch);
        }
        progressed
    }

    /// Pulls output until the engine has none. Returns whether anything was
    /// produced.
    pub(crate) fn drain(&self, engine: &mut E) -> bool {
        match self.kind {
            CodecKind::Decoder => self.drain_into(
                engine,
                &self.shared.frame_pool,
                &self.shared.consumers.frame,
                E::alloc_frame,
                E::produce_frame,
            ),
            CodecKind::Encoder => self.drain_into(
                engine,
                &self.shared.packet_pool,
                &self.shared.consumers.packet,
                E::alloc_packet,
                E::produce_packet,
            ),
        }
    }

    fn drain_into<T: Send + 'static>(
        &self,
        engine: &mut E,
        pool: &SharedPool<T>,
        slot: &Arc<ConsumerSlot<Pooled<T>>>,
        alloc: fn(&E) -> T,
        produce: fn(&mut E, &mut T) -> Produce,
    ) -> bool {
        let mut produced = false;
        // Nobody listening: leave the output in the engine.
        while slot.is_registered() {
            let mut unit = pool.acquire(|| alloc(engine));
            match produce(engine, &mut unit) {
                Produce::Ready => {
                    produced = true;
                    bump(&self.shared.counters.produced);
                    match self.dispatch.dispatch(slot, unit) {
                        Delivered::Consumed => bump(&self.shared.counters.delivered),
                        Delivered::Disabled => {
                            log::trace!("{} output returned to pool, channel disabled", self.kind)
                        }
                        Delivered::Panicked => {}
                        Delivered::Disconnected => {
                            log::warn!("dispatcher gone, stopping drain");
                            break;
                        }
                    }
                }
                Produce::NoOutput => break,
                Produce::EndOfStream => {
                    if !self.end_of_stream.swap(true, Ordering::Relaxed) {
                        log::debug!("{} reached end of stream", self.kind);
                    }
                    break;
                }
                Produce::Error(error) => {
                    drop(unit);
                    self.emit_error(ErrorEvent::new(PRODUCE_CONTEXT, error));
                    break;
                }
            }
        }
        produced
    }

    fn emit_error(&self, event: ErrorEvent) {
        let counters = &self.shared.counters;
        bump(&counters.errors);
        let slot = &self.shared.consumers.error;
        if !slot.is_registered() {
            bump(&counters.errors_dropped);
            log::trace!("no error consumer, dropping: {}", event);
            return;
        }
        if self.dispatch.dispatch(slot, event) != Delivered::Consumed {
            bump(&counters.errors_dropped);
        }
    }
}

#[cfg(test)]
#[path = "pump_test.rs"]
mod pump_test;
