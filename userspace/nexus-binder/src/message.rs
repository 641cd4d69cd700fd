// Copyright 2025 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-flight messages and their payload buffers.

use std::sync::Arc;

use crate::error::{DispatchError, Result};
use crate::object::ObjectId;
use crate::queue::MessageQueue;

/// Kind of a queued message; drives read-side dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MessageKind {
    /// A request travelling to a target object's owner.
    Transaction,
    /// A reply travelling back to a waiting worker.
    Reply,
    /// Acknowledgement that a written command was accepted.
    TransactionComplete,
    /// Owner-side request to record a death notifier.
    RequestDeathNotification,
    /// Owner-side request to remove a death notifier.
    ClearDeathNotification,
    /// An observed object died.
    DeadBinder,
}

/// A message queued for delivery.
///
/// Transactions and replies carry a payload in `buf`; the remaining kinds are
/// bare. `reply_queue` is present on every synchronous transaction and
/// names the queue the eventual reply or synthetic death notice goes to.
pub(crate) struct Message {
    pub kind: MessageKind,
    /// Target object, `ObjectId::NULL` for replies and acknowledgements.
    pub object: ObjectId,
    pub code: u32,
    pub flags: u32,
    pub sender_pid: u32,
    pub sender_euid: u32,
    /// Death-notifier cookie; meaningful for notifier and dead-binder kinds.
    pub cookie: u64,
    pub reply_queue: Option<Arc<MessageQueue>>,
    pub buf: MessageBuf,
}

impl core::fmt::Debug for Message {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind)
            .field("object", &self.object)
            .field("code", &self.code)
            .field("flags", &self.flags)
            .field("data_len", &self.buf.data.len())
            .finish()
    }
}

impl Message {
    /// Allocates a message with room for `data_size` payload bytes and
    /// `offsets` offset entries. Fails with `NoMemory` when the allocator
    /// cannot satisfy the reservation.
    pub fn alloc(kind: MessageKind, data_size: usize, offsets: usize) -> Result<Box<Self>> {
        let mut msg = Self::bare(kind);
        msg.buf.reset(data_size, offsets)?;
        Ok(msg)
    }

    /// Allocates a payload-less message. Infallible.
    pub fn bare(kind: MessageKind) -> Box<Self> {
        Box::new(Self {
            kind,
            object: ObjectId::NULL,
            code: 0,
            flags: 0,
            sender_pid: 0,
            sender_euid: 0,
            cookie: 0,
            reply_queue: None,
            buf: MessageBuf::empty(),
        })
    }

    /// True when no reply is expected for this message.
    pub fn is_one_way(&self) -> bool {
        self.flags & crate::defs::TF_ONE_WAY != 0
    }

    /// Bytes this message serialises to on the read side.
    pub fn serialized_size(&self) -> usize {
        use crate::defs::{OPCODE_SIZE, TRANSACTION_HEADER_SIZE};
        match self.kind {
            MessageKind::Transaction | MessageKind::Reply => {
                OPCODE_SIZE + TRANSACTION_HEADER_SIZE + self.buf.data.len() + self.buf.offsets_size()
            }
            _ => OPCODE_SIZE,
        }
    }
}

/// Payload storage for a transaction or reply.
///
/// The buffer is reused across the request/reply turnaround: `reset` keeps
/// whatever capacity the request already reserved, mirroring the
/// reallocate-only-if-larger reply path of the protocol.
pub(crate) struct MessageBuf {
    pub data: Vec<u8>,
    /// Byte offsets of embedded descriptors, in payload order.
    pub offsets: Vec<u64>,
    /// Owner queues carried alongside translated descriptors, parallel to
    /// `offsets`. Holding the `Arc` keeps each owner reachable while the
    /// message is in flight.
    pub owners: Vec<Arc<MessageQueue>>,
}

impl MessageBuf {
    fn empty() -> Self {
        Self { data: Vec::new(), offsets: Vec::new(), owners: Vec::new() }
    }

    /// Clears the buffer and reserves room for a new payload, reusing the
    /// existing allocation when it is large enough.
    pub fn reset(&mut self, data_size: usize, offsets: usize) -> Result<()> {
        self.data.clear();
        self.offsets.clear();
        self.owners.clear();
        if data_size > self.data.capacity() {
            self.data.try_reserve_exact(data_size).map_err(|_| DispatchError::NoMemory)?;
        }
        if offsets > self.offsets.capacity() {
            self.offsets.try_reserve_exact(offsets).map_err(|_| DispatchError::NoMemory)?;
        }
        Ok(())
    }

    /// Size of the offsets array on the wire.
    pub fn offsets_size(&self) -> usize {
        self.offsets.len() * crate::defs::OFFSET_SIZE
    }
}
