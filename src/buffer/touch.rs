//! Bounded MPSC touch buffer backed by a lock-free `ArrayQueue`.
//!
//! Lookups record their hit here so the hot read path never blocks on the
//! policy mutex. Whoever next holds the policy lock drains the queue in FIFO
//! order and applies the touches before tracking, untracking or choosing a
//! victim, so a single-threaded caller observes exact recency and frequency.
//!
//! If the queue is full when a push is attempted, the reference is returned to
//! the caller as `Err(entry)` so it can be applied synchronously.

use crossbeam_queue::ArrayQueue;

use crate::entry::EntryRef;

/// Bounded capacity of the touch queue.
const TOUCH_BUFFER_CAPACITY: usize = 128;

/// Bounded MPSC touch buffer.
///
/// Multiple reader threads may call [`push`] concurrently. Buffered references
/// keep their entries pinned until drained, which is at most one policy lock
/// acquisition away.
///
/// [`push`]: TouchBuffer::push
pub(crate) struct TouchBuffer {
    queue: ArrayQueue<EntryRef>,
}

impl TouchBuffer {
    /// Creates a new touch buffer with the default capacity.
    pub(crate) fn new() -> Self {
        TouchBuffer {
            queue: ArrayQueue::new(TOUCH_BUFFER_CAPACITY),
        }
    }

    /// Enqueues `entry`.
    ///
    /// Returns `Err(entry)` if the queue is full; the caller must then apply
    /// the touch itself.
    #[inline]
    pub(crate) fn push(&self, entry: EntryRef) -> Result<(), EntryRef> {
        self.queue.push(entry)
    }

    /// Drains all pending touches into `out`, oldest first.
    pub(crate) fn drain(&self, out: &mut Vec<EntryRef>) {
        while let Some(entry) = self.queue.pop() {
            out.push(entry);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

impl Default for TouchBuffer {
    fn default() -> Self {
        Self::new()
    }
}
