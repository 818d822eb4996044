//! Bounded-by-policy outbound frame queue with a blocking waiter.
//!
//! The queue itself never rejects on depth; the connection checks the
//! depth after each enqueue and closes slow clients. Frames enqueued
//! before `close` are still drained by the waiter; frames offered after
//! `close` are dropped.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug)]
struct Inner {
    frames: VecDeque<Bytes>,
    closed: bool,
}

/// FIFO queue of outbound frames feeding a connection's send loop.
#[derive(Debug)]
pub struct OutboundQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl OutboundQueue {
    #[must_use]
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(initial_capacity),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Appends a frame. Returns `false` if the queue has been closed.
    pub fn add(&self, frame: Bytes) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return false;
            }
            inner.frames.push_back(frame);
        }
        self.notify.notify_one();
        true
    }

    /// Waits until a frame is available or the queue is closed and
    /// drained. Returns `None` only once every pre-close frame has been
    /// delivered.
    pub async fn wait(&self) -> Option<Bytes> {
        loop {
            // Register interest before checking state so a concurrent
            // add/close cannot slip between the check and the await.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(frame) = inner.frames.pop_front() {
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Current queue depth in frames.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// Closes the queue and unblocks all waiters. Idempotent.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
        }
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
