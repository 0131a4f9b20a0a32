use std::collections::VecDeque;

/// FIFO of pending work items. Callers hold the session lock around every
/// method; the queue itself does no locking.
#[derive(Debug)]
pub struct WorkQueue<T> {
    items: VecDeque<T>,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub fn enqueue(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Takes the whole content, leaving the queue empty.
    pub fn drain_all(&mut self) -> VecDeque<T> {
        std::mem::take(&mut self.items)
    }

    /// Puts an unconsumed remainder back in front of anything enqueued since
    /// the last `drain_all`, keeping the original order.
    pub fn requeue_front(&mut self, mut remainder: VecDeque<T>) {
        if remainder.is_empty() {
            return;
        }
        remainder.append(&mut self.items);
        self.items = remainder;
    }

    pub fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod queue_test;
