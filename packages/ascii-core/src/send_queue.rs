//! Bounded queue decoupling capture threads from socket writes.
//!
//! A mutex + condvar ring of fixed capacity (default [`SEND_QUEUE_CAPACITY`]),
//! chosen over a pure lock-free design because producers are few and the
//! sender is single. Enqueue never blocks: on a full queue, the newest item
//! is dropped with a rate-limited warning — acceptable for audio, whose
//! capture pipeline recovers from gaps, unlike backpressuring capture
//! itself. Dequeue blocks on the condvar with a cooperative shutdown check.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::protocol_constants::SEND_QUEUE_CAPACITY;

/// A pre-allocated batch record ready for transport write.
#[derive(Debug, Clone)]
pub struct SendSlot {
    pub bytes: Vec<u8>,
}

struct Inner {
    queue: VecDeque<SendSlot>,
    closed: bool,
}

/// Bounded MPSC-style queue with drop-newest overflow semantics.
pub struct SendQueue {
    capacity: usize,
    state: Mutex<Inner>,
    not_empty: Condvar,
    dropped: AtomicU64,
}

impl Default for SendQueue {
    fn default() -> Self {
        Self::new(SEND_QUEUE_CAPACITY)
    }
}

impl SendQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Non-blocking enqueue. Returns `false` (and counts a drop) if the
    /// queue was already at capacity.
    pub fn try_enqueue(&self, slot: SendSlot) -> bool {
        let mut inner = self.state.lock();
        if inner.queue.len() >= self.capacity {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped.is_power_of_two() {
                log::warn!("send queue full; dropped {dropped} item(s) so far");
            }
            return false;
        }
        inner.queue.push_back(slot);
        self.not_empty.notify_one();
        true
    }

    /// Blocks until an item is available, the queue is closed, or `cancel`
    /// fires. Returns `None` once closed with nothing left to drain.
    pub fn dequeue(&self, cancel: &tokio_util::sync::CancellationToken) -> Option<SendSlot> {
        let mut inner = self.state.lock();
        loop {
            if let Some(slot) = inner.queue.pop_front() {
                return Some(slot);
            }
            if inner.closed || cancel.is_cancelled() {
                return None;
            }
            self.not_empty
                .wait_for(&mut inner, Duration::from_millis(100));
        }
    }

    /// Marks the queue closed; a blocked `dequeue` wakes and drains what remains.
    pub fn close(&self) {
        let mut inner = self.state.lock();
        inner.closed = true;
        self.not_empty.notify_all();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
