//! Result dispatcher.
//!
//! Output units and error events are handed from the worker to a dedicated
//! dispatch thread through a capacity-1 channel. The worker waits for an
//! acknowledgement before issuing the next delivery, so each consumer sees at
//! most one invocation in flight and undelivered results never pile up.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{JoinHandle, ThreadId};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{ErrorEvent, PumpError};
use crate::pool::Pooled;
use crate::pump::Counters;

pub type Consumer<T> = Arc<dyn Fn(T) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Frame,
    Packet,
    Error,
}

/// Zero or one registered consumer for one channel.
pub struct ConsumerSlot<T> {
    inner: Mutex<SlotState<T>>,
}

struct SlotState<T> {
    consumer: Option<Consumer<T>>,
    generation: u64,
}

impl<T> ConsumerSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SlotState {
                consumer: None,
                generation: 0,
            }),
        }
    }

    /// Replaces the consumer and returns the generation of the new registration.
    pub fn set(&self, consumer: Option<Consumer<T>>) -> u64 {
        let mut inner = self.inner.lock();
        inner.consumer = consumer;
        inner.generation += 1;
        inner.generation
    }

    /// Registers the consumer built by `make`, which receives the generation it
    /// will be registered under. Nothing can dispatch to it before then.
    pub fn register_with(&self, make: impl FnOnce(u64) -> Consumer<T>) -> u64 {
        let mut inner = self.inner.lock();
        let generation = inner.generation + 1;
        inner.consumer = Some(make(generation));
        inner.generation = generation;
        generation
    }

    /// Clears the slot only if `generation` is still the current registration.
    pub fn clear_generation(&self, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.consumer.is_none() {
            return false;
        }
        inner.consumer = None;
        inner.generation += 1;
        true
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn current(&self) -> Option<Consumer<T>> {
        self.inner.lock().consumer.clone()
    }

    pub fn is_registered(&self) -> bool {
        self.inner.lock().consumer.is_some()
    }
}

impl<T> Default for ConsumerSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The three consumer slots of a session.
pub struct Consumers<F, P> {
    pub frame: Arc<ConsumerSlot<Pooled<F>>>,
    pub packet: Arc<ConsumerSlot<Pooled<P>>>,
    pub error: Arc<ConsumerSlot<ErrorEvent>>,
}

impl<F, P> Consumers<F, P> {
    pub fn new() -> Self {
        Self {
            frame: Arc::new(ConsumerSlot::new()),
            packet: Arc::new(ConsumerSlot::new()),
            error: Arc::new(ConsumerSlot::new()),
        }
    }

    pub fn clear(&self, channel: Channel) {
        match channel {
            Channel::Frame => self.frame.set(None),
            Channel::Packet => self.packet.set(None),
            Channel::Error => self.error.set(None),
        };
    }

    pub fn is_registered(&self, channel: Channel) -> bool {
        match channel {
            Channel::Frame => self.frame.is_registered(),
            Channel::Packet => self.packet.is_registered(),
            Channel::Error => self.error.is_registered(),
        }
    }
}

impl<F, P> Default for Consumers<F, P> {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened to one dispatched unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivered {
    Consumed,
    /// The channel had no consumer by the time the unit arrived; it was dropped.
    Disabled,
    Panicked,
    /// The dispatch thread is gone.
    Disconnected,
}

struct Delivery {
    job: Box<dyn FnOnce() -> bool + Send>,
    ack: oneshot::Sender<Delivered>,
}

/// Sending half used by the worker.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<Delivery>,
}

impl DispatchHandle {
    /// Delivers `unit` to whatever consumer `slot` holds when the dispatch
    /// thread picks it up, and blocks until that consumer returned.
    ///
    /// Must not be called from inside an async runtime.
    pub fn dispatch<T: Send + 'static>(&self, slot: &Arc<ConsumerSlot<T>>, unit: T) -> Delivered {
        let slot = Arc::clone(slot);
        let job = Box::new(move || match slot.current() {
            Some(consumer) => {
                consumer(unit);
                true
            }
            None => false,
        });
        let (ack, done) = oneshot::channel();
        if self.tx.blocking_send(Delivery { job, ack }).is_err() {
            return Delivered::Disconnected;
        }
        done.blocking_recv().unwrap_or(Delivered::Disconnected)
    }
}

/// Owns the dispatch thread.
pub struct Dispatcher {
    handle: Option<DispatchHandle>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl Dispatcher {
    pub(crate) fn spawn(name: String, counters: Arc<Counters>) -> Result<Self, PumpError> {
        let (tx, rx) = mpsc::channel(1);
        let thread = std::thread::Builder::new()
            .name(name)
            .spawn(move || Self::dispatch_loop(rx, counters))
            .map_err(|e| PumpError::Spawn("dispatch", e))?;
        Ok(Self {
            handle: Some(DispatchHandle { tx }),
            thread_id: thread.thread().id(),
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> Option<DispatchHandle> {
        self.handle.clone()
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn is_dispatch_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Stops the dispatch thread once every outstanding handle is dropped.
    pub fn shutdown(&mut self) {
        self.handle = None;
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == std::thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                log::error!("dispatch thread panicked");
            }
        }
    }

    fn dispatch_loop(mut rx: mpsc::Receiver<Delivery>, counters: Arc<Counters>) {
        while let Some(Delivery { job, ack }) = rx.blocking_recv() {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(true) => Delivered::Consumed,
                Ok(false) => Delivered::Disabled,
                Err(_) => {
                    counters.consumer_panics.fetch_add(1, Ordering::Relaxed);
                    log::error!("consumer callback panicked, continuing");
                    Delivered::Panicked
                }
            };
            let _ = ack.send(outcome);
        }
        log::debug!("dispatch loop finished");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod dispatch_test;
