//! Bounded output buffer between the pump and stream consumers.
//!
//! FIFO with drop-oldest overflow. A consumer already suspended in
//! [`OutputBuffer::pop`] receives a pushed event directly, bypassing the
//! queue. A consumer that gives up after an event was handed to it puts the
//! event back at the front, so cancelling a `pop` never loses data.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;

use crate::config::DEFAULT_BUFFER_CAPACITY;
use crate::models::event::OutputEvent;

#[derive(Debug)]
struct Inner {
    queue: VecDeque<OutputEvent>,
    waiters: VecDeque<oneshot::Sender<OutputEvent>>,
    capacity: usize,
    dropped: u64,
    closed: bool,
}

impl Inner {
    /// Enqueue at the back, evicting the oldest event when full.
    fn enqueue(&mut self, event: OutputEvent) {
        if self.queue.len() >= self.capacity {
            self.queue.pop_front();
            self.dropped += 1;
        }
        self.queue.push_back(event);
    }

    /// Return a handed-over event to the front. When full it is the oldest
    /// event, so it is the one dropped.
    fn requeue_front(&mut self, event: OutputEvent) {
        if self.queue.len() >= self.capacity {
            self.dropped += 1;
            return;
        }
        self.queue.push_front(event);
    }
}

/// Bounded, drop-oldest event queue with async consumers.
#[derive(Debug)]
pub struct OutputBuffer {
    inner: Mutex<Inner>,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl OutputBuffer {
    /// Create a buffer holding at most `capacity` events (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity.max(1)),
                waiters: VecDeque::new(),
                capacity: capacity.max(1),
                dropped: 0,
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an event. Returns `false` (and discards it) once closed.
    pub fn push(&self, event: OutputEvent) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            debug!("output buffer closed, discarding event");
            return false;
        }

        let mut event = event;
        while let Some(waiter) = inner.waiters.pop_front() {
            match waiter.send(event) {
                Ok(()) => return true,
                // Consumer went away before we got to it.
                Err(returned) => event = returned,
            }
        }

        inner.enqueue(event);
        true
    }

    /// Next event; `None` once closed and drained.
    pub async fn pop(&self) -> Option<OutputEvent> {
        let rx = {
            let mut inner = self.lock();
            if let Some(event) = inner.queue.pop_front() {
                return Some(event);
            }
            if inner.closed {
                return None;
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.push_back(tx);
            rx
        };

        let mut pending = PendingPop {
            buffer: self,
            rx: Some(rx),
        };
        let rx = pending.rx.as_mut()?;
        let result = rx.await;
        pending.rx = None;
        result.ok()
    }

    /// Dequeue without waiting.
    #[must_use]
    pub fn try_pop(&self) -> Option<OutputEvent> {
        self.lock().queue.pop_front()
    }

    /// Signal end-of-stream. Suspended consumers wake with `None`; queued
    /// events remain poppable. Idempotent.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.waiters.clear();
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether no events are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Events evicted by overflow so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Maximum number of queued events.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }
}

/// Cleans up a suspended `pop` that is dropped before completing.
struct PendingPop<'a> {
    buffer: &'a OutputBuffer,
    rx: Option<oneshot::Receiver<OutputEvent>>,
}

impl Drop for PendingPop<'_> {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        rx.close();
        if let Ok(event) = rx.try_recv() {
            self.buffer.lock().requeue_front(event);
        }
    }
}
