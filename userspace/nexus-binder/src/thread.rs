// Copyright 2025 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Worker records.
//!
//! A worker is created lazily the first time an OS thread drives the
//! dispatcher for its process. It owns a private queue for replies and
//! thread-directed work, the stack of transactions it is currently
//! servicing, and the looper flags consumed by the thread-pool controller.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::message::Message;
use crate::queue::{DrainFn, MessageQueue};

/// Looper flags; a worker is active once it entered the read loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct LooperState {
    /// Set by `BC_REGISTER_LOOPER`: this worker answers a spawn request.
    pub registered: bool,
    /// Set by `BC_ENTER_LOOPER`, cleared by `BC_EXIT_LOOPER`.
    pub entered: bool,
}

pub(crate) struct ThreadInner {
    pub state: LooperState,
    /// Outstanding synchronous calls awaiting a reply.
    pub pending_replies: u32,
    /// Synchronous requests being serviced, most recent last; the tail
    /// is the request whose reply is expected next.
    pub incoming_transactions: Vec<Box<Message>>,
    /// Most recent per-command failure, surfaced on the next read.
    pub last_error: Option<u32>,
}

/// A worker thread registered with a process.
pub(crate) struct Thread {
    tid: u64,
    queue: Arc<MessageQueue>,
    pub inner: Mutex<ThreadInner>,
}

impl Thread {
    pub fn new(tid: u64, non_block: bool, drain: DrainFn) -> Arc<Self> {
        Arc::new(Self {
            tid,
            queue: MessageQueue::new(non_block, drain),
            inner: Mutex::new(ThreadInner {
                state: LooperState::default(),
                pending_replies: 0,
                incoming_transactions: Vec::new(),
                last_error: None,
            }),
        })
    }

    pub fn tid(&self) -> u64 {
        self.tid
    }

    /// The worker's private queue.
    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    /// Records a per-command failure for the next read to surface.
    pub fn set_last_error(&self, code: u32) {
        self.inner.lock().last_error = Some(code);
    }

    pub fn take_last_error(&self) -> Option<u32> {
        self.inner.lock().last_error.take()
    }

    pub fn pending_replies(&self) -> u32 {
        self.inner.lock().pending_replies
    }

    pub fn inc_pending_replies(&self) {
        self.inner.lock().pending_replies += 1;
    }

    pub fn dec_pending_replies(&self) {
        let mut inner = self.inner.lock();
        inner.pending_replies = inner.pending_replies.saturating_sub(1);
    }

    /// Pushes a request this worker started servicing.
    pub fn push_incoming(&self, msg: Box<Message>) {
        self.inner.lock().incoming_transactions.push(msg);
    }

    /// Pops the request whose reply comes next.
    pub fn pop_incoming(&self) -> Option<Box<Message>> {
        self.inner.lock().incoming_transactions.pop()
    }

    /// Drains the serviced-request stack for teardown.
    pub fn take_incoming(&self) -> Vec<Box<Message>> {
        std::mem::take(&mut self.inner.lock().incoming_transactions)
    }
}
