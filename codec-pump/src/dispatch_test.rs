use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::{Channel, Consumer, ConsumerSlot, Consumers, Delivered, Dispatcher};
use crate::pool::{Pooled, SharedPool};
use crate::pump::Counters;

fn spawn_dispatcher() -> (Dispatcher, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let dispatcher = Dispatcher::spawn("test-dispatch".to_string(), Arc::clone(&counters)).unwrap();
    (dispatcher, counters)
}

#[test]
fn test_dispatch_runs_on_dispatch_thread() {
    let (dispatcher, _) = spawn_dispatcher();
    let handle = dispatcher.handle().unwrap();
    let slot = Arc::new(ConsumerSlot::new());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = Arc::clone(&seen);
    slot.set(Some(Arc::new(move |value: u32| {
        let name = std::thread::current().name().map(str::to_string);
        seen_clone.lock().push((value, name));
    })));

    assert_eq!(handle.dispatch(&slot, 1), Delivered::Consumed);
    assert_eq!(handle.dispatch(&slot, 2), Delivered::Consumed);

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, 1);
    assert_eq!(seen[1].0, 2);
    assert_eq!(seen[0].1.as_deref(), Some("test-dispatch"));
    assert!(!dispatcher.is_dispatch_thread());
}

#[test]
fn test_disabled_channel_returns_buffer_without_invoking() {
    let (dispatcher, _) = spawn_dispatcher();
    let handle = dispatcher.handle().unwrap();
    let consumers: Consumers<Vec<u8>, Vec<u8>> = Consumers::new();
    let pool = SharedPool::new(4);

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = Arc::clone(&calls);
    consumers.frame.set(Some(Arc::new(move |_frame: Pooled<Vec<u8>>| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
    })));
    consumers.clear(Channel::Frame);
    assert!(!consumers.is_registered(Channel::Frame));

    let loan = pool.acquire(|| vec![0u8; 8]);
    assert_eq!(pool.stats().on_loan, 1);
    assert_eq!(handle.dispatch(&consumers.frame, loan), Delivered::Disabled);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(pool.stats().on_loan, 0);
    assert_eq!(pool.stats().free, 1);
}

#[test]
fn test_at_most_one_delivery_in_flight() {
    let (dispatcher, _) = spawn_dispatcher();
    let slot = Arc::new(ConsumerSlot::new());
    let in_flight = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let in_flight_clone = Arc::clone(&in_flight);
    let overlaps_clone = Arc::clone(&overlaps);
    slot.set(Some(Arc::new(move |_: usize| {
        if in_flight_clone.fetch_add(1, Ordering::SeqCst) != 0 {
            overlaps_clone.fetch_add(1, Ordering::SeqCst);
        }
        std::thread::sleep(Duration::from_millis(2));
        in_flight_clone.fetch_sub(1, Ordering::SeqCst);
    })));

    let senders: Vec<_> = (0..4)
        .map(|t| {
            let handle = dispatcher.handle().unwrap();
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || {
                for i in 0..10 {
                    assert_eq!(handle.dispatch(&slot, t * 10 + i), Delivered::Consumed);
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn test_panicking_consumer_does_not_stop_dispatcher() {
    let (dispatcher, counters) = spawn_dispatcher();
    let handle = dispatcher.handle().unwrap();
    let slot = Arc::new(ConsumerSlot::new());
    slot.set(Some(Arc::new(|value: u32| {
        if value == 1 {
            panic!("bad unit");
        }
    })));

    assert_eq!(handle.dispatch(&slot, 1), Delivered::Panicked);
    assert_eq!(handle.dispatch(&slot, 2), Delivered::Consumed);
    assert_eq!(counters.consumer_panics.load(Ordering::Relaxed), 1);
}

#[test]
fn test_shutdown_joins_once_handles_are_dropped() {
    let (mut dispatcher, _) = spawn_dispatcher();
    let handle = dispatcher.handle().unwrap();

    drop(handle);
    dispatcher.shutdown();
    assert!(dispatcher.handle().is_none());
}

#[test]
fn test_clear_generation_ignores_newer_registration() {
    let slot: ConsumerSlot<u32> = ConsumerSlot::new();
    let first = slot.set(Some(Arc::new(|_: u32| {})));
    let second = slot.set(Some(Arc::new(|_: u32| {})));
    assert!(!slot.clear_generation(first));
    assert!(slot.is_registered());
    assert!(slot.clear_generation(second));
    assert!(!slot.is_registered());
}

#[test]
fn test_register_with_hands_out_final_generation() {
    let slot: Arc<ConsumerSlot<u32>> = Arc::new(ConsumerSlot::new());
    slot.set(Some(Arc::new(|_: u32| {})));

    let seen = Arc::new(Mutex::new(None));
    let seen_clone = Arc::clone(&seen);
    let weak = Arc::downgrade(&slot);
    let generation = slot.register_with(move |mine| -> Consumer<u32> {
        *seen_clone.lock() = Some(mine);
        Arc::new(move |_: u32| {
            // the slot is already at `mine` when the consumer first runs
            if let Some(slot) = weak.upgrade() {
                assert_eq!(slot.generation(), mine);
            }
        })
    });

    assert_eq!(*seen.lock(), Some(generation));
    assert_eq!(slot.generation(), generation);
    let (dispatcher, _) = spawn_dispatcher();
    let handle = dispatcher.handle().unwrap();
    assert_eq!(handle.dispatch(&slot, 1), Delivered::Consumed);
    assert!(slot.clear_generation(generation));
}
