//! Fixed-capacity, lock-free MPMC queue used on every pipeline edge.
//!
//! Neither side ever blocks: a full queue hands the item back to the caller
//! and an empty queue returns `None`. Stages that need to wait implement it
//! as a retry loop that re-checks their run flag, see [`BoundedQueue::push_while`].

use std::thread;
use crossbeam_queue::ArrayQueue;
use crate::config::defs::DEFAULT_QUEUE_CAPACITY;

pub struct BoundedQueue<T> {
    inner: ArrayQueue<T>,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items.
    ///
    /// # Panics
    /// If `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self { inner: ArrayQueue::new(capacity) }
    }

    /// Pushes `item`, or hands it back when the queue is full.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        self.inner.push(item)
    }

    pub fn try_pop(&self) -> Option<T> {
        self.inner.pop()
    }

    /// Retries `try_push` until it succeeds or `keep_going` turns false.
    ///
    /// The closure is checked before every attempt so a stop request is seen
    /// within one spin. On giving up the item is returned to the caller.
    pub fn push_while<F>(&self, item: T, keep_going: F) -> Result<(), T>
    where
        F: Fn() -> bool,
    {
        let mut item = item;
        loop {
            if !keep_going() {
                return Err(item);
            }
            match self.inner.push(item) {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    item = returned;
                    thread::yield_now();
                }
            }
        }
    }

    /// Pops and drops every queued item, returning how many were discarded.
    pub fn drain_and_discard(&self) -> usize {
        let mut n = 0;
        while self.inner.pop().is_some() {
            n += 1;
        }
        n
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

impl<T> Default for BoundedQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
