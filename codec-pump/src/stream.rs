//! Async consumption: forwards a consumer slot into a bounded tokio channel.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;

use crate::dispatch::{Consumer, ConsumerSlot};

pub type UnitStream<T> = ReceiverStream<T>;

const FULL_BACKOFF: Duration = Duration::from_millis(1);

/// Registers a consumer on `slot` that pushes every unit into a channel of
/// `capacity` and returns the receiving end as a stream.
///
/// A full channel stalls the dispatcher, and with it the worker, until the
/// stream is polled again. The consumer gives up on a unit as soon as the
/// slot is cleared or re-registered, so closing a session never waits on a
/// stream nobody reads. Dropping the stream clears the slot.
pub fn forward<T: Send + 'static>(slot: &Arc<ConsumerSlot<T>>, capacity: usize) -> UnitStream<T> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let home: Weak<ConsumerSlot<T>> = Arc::downgrade(slot);

    slot.register_with(move |mine| -> Consumer<T> {
        Arc::new(move |unit: T| {
            let mut unit = unit;
            loop {
                match tx.try_send(unit) {
                    Ok(()) => return,
                    Err(TrySendError::Closed(_)) => {
                        if let Some(slot) = home.upgrade() {
                            if slot.clear_generation(mine) {
                                log::debug!("stream receiver dropped, channel disabled");
                            }
                        }
                        return;
                    }
                    Err(TrySendError::Full(back)) => {
                        let current = home.upgrade().map(|slot| slot.generation());
                        if current != Some(mine) {
                            return;
                        }
                        unit = back;
                        std::thread::sleep(FULL_BACKOFF);
                    }
                }
            }
        })
    });
    ReceiverStream::new(rx)
}
