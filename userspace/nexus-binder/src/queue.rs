// Copyright 2025 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-process and per-worker message queues.
//!
//! A queue is the identity anchor of the process that owns it: objects are
//! keyed by their owner's [`QueueId`], and foreign processes keep the owner
//! reachable by holding an [`Arc`] to its queue. Closing a queue wakes every
//! blocked pop and runs the drain callback on each residual message with the
//! queue lock dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::message::Message;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque, never-reused identifier of a [`MessageQueue`].
///
/// Wire descriptors carry this id in place of a raw owner pointer; `0` is
/// reserved as the null owner.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueueId(u64);

impl QueueId {
    /// The reserved null owner.
    pub const NULL: QueueId = QueueId(0);

    /// Rebuilds an id from its wire representation.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Wire representation of the id.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Callback invoked for every message still queued when the queue closes.
pub(crate) type DrainFn = Box<dyn Fn(Box<Message>) + Send + Sync>;

/// Outcome of a failed [`MessageQueue::pop`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PopError {
    /// The queue is empty and was created non-blocking.
    Empty,
    /// The queue was closed; no further messages will arrive.
    Closed,
}

struct Inner {
    messages: VecDeque<Box<Message>>,
    closed: bool,
}

/// Unbounded FIFO with blocking pop, head insertion, and close-time drain.
pub struct MessageQueue {
    id: QueueId,
    non_block: bool,
    inner: Mutex<Inner>,
    ready: Condvar,
    drain: DrainFn,
}

impl MessageQueue {
    /// Creates a queue. `non_block` makes every pop return immediately.
    pub(crate) fn new(non_block: bool, drain: DrainFn) -> Arc<Self> {
        Arc::new(Self {
            id: QueueId(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed)),
            non_block,
            inner: Mutex::new(Inner { messages: VecDeque::new(), closed: false }),
            ready: Condvar::new(),
            drain,
        })
    }

    /// Stable identity of this queue.
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    /// True when no messages are queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().messages.is_empty()
    }

    /// Takes a reference for cross-process use; fails once the queue is
    /// closed. The reference is released by dropping the returned [`Arc`].
    pub(crate) fn acquire(self: &Arc<Self>) -> Option<Arc<Self>> {
        if self.inner.lock().closed {
            return None;
        }
        Some(Arc::clone(self))
    }

    /// Appends `msg`; returns it to the caller when the queue is closed.
    pub(crate) fn push_tail(&self, msg: Box<Message>) -> Result<(), Box<Message>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(msg);
        }
        inner.messages.push_back(msg);
        drop(inner);
        self.ready.notify_one();
        Ok(())
    }

    /// Re-inserts `msg` at the head so the next pop observes it before any
    /// concurrently appended message.
    pub(crate) fn push_head(&self, msg: Box<Message>) -> Result<(), Box<Message>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(msg);
        }
        inner.messages.push_front(msg);
        drop(inner);
        self.ready.notify_one();
        Ok(())
    }

    /// Removes the head message. An empty queue blocks the caller only when
    /// `blocking` is set and the queue was not created non-blocking.
    pub(crate) fn pop(&self, blocking: bool) -> Result<Box<Message>, PopError> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(msg) = inner.messages.pop_front() {
                return Ok(msg);
            }
            if inner.closed {
                return Err(PopError::Closed);
            }
            if self.non_block || !blocking {
                return Err(PopError::Empty);
            }
            self.ready.wait(&mut inner);
        }
    }

    /// Closes the queue: wakes all blocked pops and hands every residual
    /// message to the drain callback. Idempotent.
    pub(crate) fn close(&self) {
        let residual = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            std::mem::take(&mut inner.messages)
        };
        self.ready.notify_all();
        if !residual.is_empty() {
            log::debug!("queue {}: draining {} residual messages", self.id.0, residual.len());
        }
        for msg in residual {
            (self.drain)(msg);
        }
    }
}
