//! Bounded FIFO shared by producers and one worker thread.
//!
//! Data and control messages travel through the same queue so that a flush
//! or shutdown request is ordered strictly after every payload pushed before
//! it. Only payloads count against the capacity; control messages are never
//! rejected.

use std::{
    collections::VecDeque,
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use outpost_core::{Feature, Payload};
use parking_lot::{Condvar, Mutex};
use tracing::warn;

/// Entry carried by a worker queue.
#[derive(Debug)]
pub enum Message {
    /// A payload to buffer and deliver.
    Item(Payload),
    /// Deliver whatever is buffered, regardless of batch limits.
    Flush,
    /// Deliver whatever is buffered, then exit the worker loop.
    Shutdown,
    /// Rendezvous point for a caller blocked in `flush()`.
    Marker(Arc<FlushMarker>),
}

/// One-shot latch released when the worker reaches it in the queue.
#[derive(Default)]
pub struct FlushMarker {
    reached: Mutex<bool>,
    cond: Condvar,
}

impl FlushMarker {
    /// Creates an unreached marker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases every waiter.
    pub fn signal(&self) {
        *self.reached.lock() = true;
        self.cond.notify_all();
    }

    /// Whether the marker has been reached.
    pub fn is_reached(&self) -> bool {
        *self.reached.lock()
    }

    /// Blocks until the marker is reached.
    pub fn wait(&self) {
        let mut reached = self.reached.lock();
        while !*reached {
            self.cond.wait(&mut reached);
        }
    }

    /// Blocks until the marker is reached or `timeout` elapses.
    ///
    /// Returns whether the marker was reached.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut reached = self.reached.lock();
        while !*reached {
            if self.cond.wait_until(&mut reached, deadline).timed_out() {
                break;
            }
        }
        *reached
    }
}

impl fmt::Debug for FlushMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushMarker").field("reached", &self.is_reached()).finish()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<Message>,
    items: usize,
    dropped: u64,
    overflow_reported: bool,
    interrupts: u64,
}

impl QueueState {
    fn take_front(&mut self) -> Option<Message> {
        let message = self.messages.pop_front()?;
        if matches!(message, Message::Item(_)) {
            self.items -= 1;
        }
        Some(message)
    }
}

/// Thread-safe FIFO with a capacity cap and drop-new-on-overflow policy.
///
/// Producers never block: `push` either enqueues under a short-held lock or
/// rejects the payload.
#[derive(Debug)]
pub struct BoundedQueue {
    feature: Feature,
    capacity: usize,
    state: Mutex<QueueState>,
    available: Condvar,
}

impl BoundedQueue {
    /// Creates an empty queue holding at most `capacity` payloads.
    pub fn new(feature: Feature, capacity: usize) -> Self {
        Self {
            feature,
            capacity,
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
        }
    }

    /// Enqueues a payload.
    ///
    /// Returns `false` and counts the payload as dropped when the queue is
    /// full. The first drop of a cycle is logged; later drops are silent
    /// until `end_cycle` is called.
    pub fn push(&self, payload: Payload) -> bool {
        let mut state = self.state.lock();
        if state.items >= self.capacity {
            state.dropped += 1;
            let first_in_cycle = !state.overflow_reported;
            state.overflow_reported = true;
            drop(state);

            if first_in_cycle {
                warn!(
                    feature = %self.feature,
                    capacity = self.capacity,
                    "queue full, dropping new payloads until the next delivery cycle"
                );
            }
            return false;
        }

        state.messages.push_back(Message::Item(payload));
        state.items += 1;
        drop(state);
        self.available.notify_one();
        true
    }

    /// Enqueues a control message. Never rejected.
    pub fn push_control(&self, message: Message) {
        let mut state = self.state.lock();
        if matches!(message, Message::Item(_)) {
            state.items += 1;
        }
        state.messages.push_back(message);
        drop(state);
        self.available.notify_one();
    }

    /// Removes the oldest message, blocking until one is available.
    ///
    /// Returns `None` only when `interrupt` wakes the consumer while the
    /// queue is empty.
    pub fn pop(&self) -> Option<Message> {
        let mut state = self.state.lock();
        let interrupts = state.interrupts;
        loop {
            if let Some(message) = state.take_front() {
                return Some(message);
            }
            if state.interrupts != interrupts {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Removes the oldest message, waiting at most `timeout`.
    ///
    /// Returns `None` on timeout or when `interrupt` wakes the consumer while
    /// the queue is empty. A timeout too large to form a deadline waits like
    /// `pop`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Message> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.pop();
        };
        let mut state = self.state.lock();
        let interrupts = state.interrupts;
        loop {
            if let Some(message) = state.take_front() {
                return Some(message);
            }
            if state.interrupts != interrupts {
                return None;
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return state.take_front();
            }
        }
    }

    /// Wakes a consumer blocked in `pop_timeout` without enqueueing anything.
    pub fn interrupt(&self) {
        self.state.lock().interrupts += 1;
        self.available.notify_all();
    }

    /// Number of payloads waiting. Control messages are not counted.
    pub fn size(&self) -> usize {
        self.state.lock().items
    }

    /// Whether no payloads are waiting.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Maximum number of payloads the queue holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total payloads rejected because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }

    /// Re-arms the overflow warning after a delivery cycle.
    pub fn end_cycle(&self) {
        self.state.lock().overflow_reported = false;
    }

    /// Discards every queued message.
    ///
    /// Pending flush markers are released so no caller stays blocked on a
    /// message that will never be processed. Returns the number of payloads
    /// discarded.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let discarded = state.items;
        let messages = std::mem::take(&mut state.messages);
        state.items = 0;
        drop(state);

        for message in messages {
            if let Message::Marker(marker) = message {
                marker.signal();
            }
        }
        discarded
    }
}
