//! Recycling pools for output frames and packets.
//!
//! Buffers are allocated lazily and handed out as [`Pooled`] loans. Returning
//! a loan keeps the free list within `slack` buffers of the number currently
//! on loan; anything beyond that is burned.

use std::fmt::{Debug, Formatter};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

pub const DEFAULT_POOL_SLACK: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub free: usize,
    pub on_loan: usize,
    pub allocated: u64,
    pub burned: u64,
}

pub struct BufferPool<T> {
    free: Vec<T>,
    on_loan: usize,
    slack: usize,
    allocated: u64,
    burned: u64,
}

impl<T> BufferPool<T> {
    pub fn new(slack: usize) -> Self {
        Self {
            free: Vec::new(),
            on_loan: 0,
            slack,
            allocated: 0,
            burned: 0,
        }
    }

    pub fn acquire(&mut self, alloc: impl FnOnce() -> T) -> T {
        self.on_loan += 1;
        match self.free.pop() {
            Some(buffer) => buffer,
            None => {
                self.allocated += 1;
                alloc()
            }
        }
    }

    pub fn release(&mut self, buffer: T) {
        self.on_loan = self.on_loan.saturating_sub(1);
        self.free.push(buffer);
        // A return grows the free list by one and shrinks the loan count by
        // one, so at most two buffers exceed the bound here.
        while self.free.len() > self.on_loan + self.slack {
            self.free.pop();
            self.burned += 1;
        }
    }

    /// Settles a loan whose buffer will never come back.
    pub fn forget(&mut self) {
        self.on_loan = self.on_loan.saturating_sub(1);
        while self.free.len() > self.on_loan + self.slack {
            self.free.pop();
            self.burned += 1;
        }
    }

    pub fn clear(&mut self) -> usize {
        let n = self.free.len();
        self.free.clear();
        n
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            free: self.free.len(),
            on_loan: self.on_loan,
            allocated: self.allocated,
            burned: self.burned,
        }
    }
}

/// A pool shared between the worker (which acquires) and whoever ends up
/// holding the loans (which release on drop).
pub struct SharedPool<T> {
    inner: Arc<Mutex<BufferPool<T>>>,
}

impl<T> SharedPool<T> {
    pub fn new(slack: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BufferPool::new(slack))),
        }
    }

    pub fn acquire(&self, alloc: impl FnOnce() -> T) -> Pooled<T> {
        let buffer = self.inner.lock().acquire(alloc);
        Pooled {
            buffer: Some(buffer),
            home: Arc::downgrade(&self.inner),
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats()
    }

    pub fn clear(&self) -> usize {
        self.inner.lock().clear()
    }
}

impl<T> Clone for SharedPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A buffer on loan from a [`SharedPool`]. Dropping it returns the buffer; if
/// the pool is gone the buffer is simply freed.
pub struct Pooled<T> {
    buffer: Option<T>,
    home: Weak<Mutex<BufferPool<T>>>,
}

impl<T> Pooled<T> {
    /// Takes the buffer out of the pool for good.
    pub fn detach(mut self) -> T {
        if let Some(home) = self.home.upgrade() {
            home.lock().forget();
        }
        self.home = Weak::new();
        match self.buffer.take() {
            Some(buffer) => buffer,
            None => unreachable!("pooled buffer is only taken once"),
        }
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.buffer {
            Some(buffer) => buffer,
            None => unreachable!("pooled buffer is only taken once"),
        }
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.buffer {
            Some(buffer) => buffer,
            None => unreachable!("pooled buffer is only taken once"),
        }
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            if let Some(home) = self.home.upgrade() {
                home.lock().release(buffer);
            }
        }
    }
}

impl<T: Debug> Debug for Pooled<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Pooled").field(&self.buffer).finish()
    }
}

#[cfg(test)]
#[path = "pool_test.rs"]
mod pool_test;
