// Copyright 2025 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! The write/read command protocol.
//!
//! `write_commands` parses a packed batch of `BC_*` records, routes
//! transactions and notifier requests to their target queues, and applies
//! looper transitions. Malformed framing aborts the batch; per-command
//! protocol failures only stash a `BR_*` code in the worker's `last_error`
//! and parsing continues, so the return value is always the number of bytes
//! consumed.
//!
//! `read_commands` drains the worker's sources into the caller's buffer:
//! an opportunistic spawn probe, the stashed `last_error`, then messages,
//! preferring the private queue whenever it holds work or a reply is
//! outstanding so a waiting caller can never be starved by inbound traffic.

use std::sync::Arc;

use log::warn;

use crate::defs::{
    get_u32, get_u64, put_u32, put_u64, NotifierPayload, TransactionHeader,
    BC_CLEAR_DEATH_NOTIFICATION, BC_ENTER_LOOPER, BC_EXIT_LOOPER, BC_REGISTER_LOOPER, BC_REPLY,
    BC_REQUEST_DEATH_NOTIFICATION, BC_TRANSACTION, BR_CLEAR_DEATH_NOTIFICATION_DONE,
    BR_DEAD_BINDER, BR_DEAD_REPLY, BR_FAILED_REPLY, BR_REPLY, BR_SPAWN_LOOPER, BR_TRANSACTION,
    BR_TRANSACTION_COMPLETE, NOTIFIER_PAYLOAD_SIZE, OFFSET_SIZE, OPCODE_SIZE,
    TRANSACTION_HEADER_SIZE,
};
use crate::device::Device;
use crate::error::{DispatchError, Result};
use crate::message::{Message, MessageKind};
use crate::object::{Notifier, ObjectEvent, ObjectId};
use crate::process::{LooperCommand, Process};
use crate::queue::{PopError, QueueId};
use crate::thread::Thread;
use crate::translate;

/// Parses and executes one write batch; returns the bytes consumed.
pub(crate) fn write_commands(
    device: &Device,
    process: &Process,
    thread: &Arc<Thread>,
    euid: u32,
    buf: &[u8],
) -> Result<usize> {
    let mut pos = 0;
    while pos + OPCODE_SIZE <= buf.len() {
        let opcode = get_u32(buf, pos);
        pos += OPCODE_SIZE;
        match opcode {
            BC_TRANSACTION | BC_REPLY => {
                let header =
                    TransactionHeader::decode(&buf[pos..]).ok_or(DispatchError::Fault)?;
                pos += TRANSACTION_HEADER_SIZE;
                if !header.sizes_valid() {
                    return Err(DispatchError::InvalidArgument);
                }
                let data_size = header.data_size as usize;
                let offsets_size = header.offsets_size as usize;
                if buf.len() - pos < data_size + offsets_size {
                    return Err(DispatchError::Fault);
                }
                let data = &buf[pos..pos + data_size];
                let offsets = &buf[pos + data_size..pos + data_size + offsets_size];
                pos += data_size + offsets_size;
                if let Err(code) =
                    write_transaction(device, process, thread, opcode, &header, data, offsets, euid)
                {
                    thread.set_last_error(code);
                }
            }
            BC_REQUEST_DEATH_NOTIFICATION | BC_CLEAR_DEATH_NOTIFICATION => {
                let payload =
                    NotifierPayload::decode(&buf[pos..]).ok_or(DispatchError::Fault)?;
                pos += NOTIFIER_PAYLOAD_SIZE;
                if let Err(code) = write_notifier(process, opcode, &payload) {
                    thread.set_last_error(code);
                }
            }
            BC_ENTER_LOOPER | BC_EXIT_LOOPER | BC_REGISTER_LOOPER => {
                let cmd = match opcode {
                    BC_ENTER_LOOPER => LooperCommand::Enter,
                    BC_EXIT_LOOPER => LooperCommand::Exit,
                    _ => LooperCommand::Register,
                };
                if !process.looper_transition(thread, cmd) {
                    thread.set_last_error(BR_FAILED_REPLY);
                }
            }
            other => {
                warn!("write batch aborted on unknown opcode {other}");
                return Err(DispatchError::InvalidArgument);
            }
        }
    }
    Ok(pos)
}

/// Routes one `BC_TRANSACTION`/`BC_REPLY`. A returned code is the caller's
/// per-command failure; the allocated message is dropped on every such edge.
#[allow(clippy::too_many_arguments)]
fn write_transaction(
    device: &Device,
    process: &Process,
    thread: &Arc<Thread>,
    opcode: u32,
    header: &TransactionHeader,
    data: &[u8],
    offsets: &[u8],
    euid: u32,
) -> core::result::Result<(), u32> {
    let offsets_count = offsets.len() / OFFSET_SIZE;

    let (target_queue, mut msg) = if opcode == BC_TRANSACTION {
        let target =
            ObjectId::new(QueueId::from_raw(header.target_owner), header.target_key);
        let obj = if target.is_null() {
            device.context_manager().ok_or(BR_FAILED_REPLY)?
        } else {
            process.find_object(target).ok_or(BR_FAILED_REPLY)?
        };
        let mut msg = Message::alloc(MessageKind::Transaction, data.len(), offsets_count)
            .map_err(|_| BR_FAILED_REPLY)?;
        msg.object = obj.id();
        (Arc::clone(obj.owner()), msg)
    } else {
        // Reply to the request most recently picked up by this worker; its
        // buffer is reused when large enough.
        let mut previous = thread.pop_incoming().ok_or(BR_FAILED_REPLY)?;
        let reply_queue = previous.reply_queue.take().ok_or(BR_FAILED_REPLY)?;
        previous.buf.reset(data.len(), offsets_count).map_err(|_| BR_FAILED_REPLY)?;
        previous.kind = MessageKind::Reply;
        previous.object = ObjectId::NULL;
        previous.cookie = 0;
        (reply_queue, previous)
    };

    msg.code = header.code;
    msg.flags = header.flags;
    msg.sender_pid = process.pid();
    msg.sender_euid = euid;
    msg.reply_queue =
        if header.is_one_way() { None } else { Some(Arc::clone(thread.queue())) };

    msg.buf.data.extend_from_slice(data);
    for index in 0..offsets_count {
        msg.buf.offsets.push(get_u64(offsets, index * OFFSET_SIZE));
    }
    translate::write_side(process, &mut msg.buf).map_err(|_| BR_FAILED_REPLY)?;

    let target = target_queue.acquire().ok_or(BR_DEAD_REPLY)?;
    if target.push_tail(msg).is_err() {
        return Err(BR_DEAD_REPLY);
    }

    if opcode == BC_TRANSACTION && !header.is_one_way() {
        thread.inc_pending_replies();
    }

    // The acknowledgement lands on the worker's own queue before this call
    // returns, so completion is observed ahead of any concurrent reply.
    let mut ack = Message::bare(MessageKind::TransactionComplete);
    ack.code = header.code;
    ack.flags = header.flags;
    if thread.queue().push_tail(ack).is_err() {
        return Err(BR_FAILED_REPLY);
    }
    Ok(())
}

/// Forwards a death-notification request to the observed object's owner.
fn write_notifier(
    process: &Process,
    opcode: u32,
    payload: &NotifierPayload,
) -> core::result::Result<(), u32> {
    let owner = QueueId::from_raw(payload.owner);
    if owner == process.queue_id() {
        // Death of one's own export is not observable.
        return Err(BR_FAILED_REPLY);
    }
    let obj =
        process.find_object(ObjectId::new(owner, payload.key)).ok_or(BR_FAILED_REPLY)?;

    let mut msg = Message::bare(if opcode == BC_REQUEST_DEATH_NOTIFICATION {
        MessageKind::RequestDeathNotification
    } else {
        MessageKind::ClearDeathNotification
    });
    msg.object = obj.id();
    msg.cookie = payload.cookie;
    msg.reply_queue = Some(Arc::clone(process.queue()));

    let target = obj.owner().acquire().ok_or(BR_DEAD_REPLY)?;
    if target.push_tail(msg).is_err() {
        return Err(BR_DEAD_REPLY);
    }
    Ok(())
}

/// Drains messages into `buf`; returns the bytes produced.
pub(crate) fn read_commands(
    process: &Process,
    thread: &Arc<Thread>,
    buf: &mut [u8],
) -> Result<usize> {
    let mut produced = 0;

    if buf.len() >= OPCODE_SIZE && process.spawn_probe() {
        put_u32(buf, produced, BR_SPAWN_LOOPER);
        produced += OPCODE_SIZE;
    }

    if buf.len() - produced >= OPCODE_SIZE {
        if let Some(code) = thread.take_last_error() {
            put_u32(buf, produced, code);
            produced += OPCODE_SIZE;
        }
    }

    while buf.len() - produced >= OPCODE_SIZE {
        // A worker with queued private work or an outstanding reply drains
        // its own queue first; an idle worker picks up process-wide work.
        let use_private = !thread.queue().is_empty() || thread.pending_replies() > 0;
        let queue =
            if use_private { Arc::clone(thread.queue()) } else { Arc::clone(process.queue()) };
        let msg = match queue.pop(produced == 0) {
            Ok(msg) => msg,
            Err(PopError::Empty) => break,
            Err(PopError::Closed) => {
                if produced > 0 {
                    break;
                }
                return Err(DispatchError::DeadReply);
            }
        };
        match deliver(process, thread, use_private, msg, &mut buf[produced..]) {
            Ok(n) => produced += n,
            Err(Delivery::Requeue(msg)) => {
                // Undelivered; put it back where the next pop finds it first.
                let _ = queue.push_head(msg);
                break;
            }
            Err(Delivery::Fatal(err)) => return Err(err),
        }
    }

    Ok(produced)
}

enum Delivery {
    /// The caller's buffer cannot hold the message; re-queue at the head.
    Requeue(Box<Message>),
    Fatal(DispatchError),
}

fn deliver(
    process: &Process,
    thread: &Arc<Thread>,
    from_private: bool,
    mut msg: Box<Message>,
    out: &mut [u8],
) -> core::result::Result<usize, Delivery> {
    match msg.kind {
        MessageKind::Transaction | MessageKind::Reply => {
            deliver_transaction(process, thread, msg, out)
        }
        MessageKind::RequestDeathNotification => {
            let obj = process
                .find_local(msg.object.key)
                .ok_or(Delivery::Fatal(DispatchError::Fault))?;
            let notify_queue =
                msg.reply_queue.take().ok_or(Delivery::Fatal(DispatchError::Fault))?;
            obj.add_notifier(Notifier {
                event: ObjectEvent::ObjectDead,
                cookie: msg.cookie,
                notify_queue,
            });
            Ok(0)
        }
        MessageKind::ClearDeathNotification => {
            let obj = process
                .find_local(msg.object.key)
                .ok_or(Delivery::Fatal(DispatchError::Fault))?;
            let notify_queue =
                msg.reply_queue.take().ok_or(Delivery::Fatal(DispatchError::Fault))?;
            if obj.remove_notifier(msg.cookie, notify_queue.id()) {
                put_u32(out, 0, BR_CLEAR_DEATH_NOTIFICATION_DONE);
                Ok(OPCODE_SIZE)
            } else {
                Ok(0)
            }
        }
        MessageKind::DeadBinder => {
            put_u32(out, 0, BR_DEAD_BINDER);
            if from_private {
                // A redirected reply: the synchronous call it answers is over.
                thread.dec_pending_replies();
            }
            Ok(OPCODE_SIZE)
        }
        MessageKind::TransactionComplete => {
            put_u32(out, 0, BR_TRANSACTION_COMPLETE);
            Ok(OPCODE_SIZE)
        }
    }
}

fn deliver_transaction(
    process: &Process,
    thread: &Arc<Thread>,
    mut msg: Box<Message>,
    out: &mut [u8],
) -> core::result::Result<usize, Delivery> {
    let needed = msg.serialized_size();
    if needed > out.len() {
        return Err(Delivery::Requeue(msg));
    }

    // Translation mutates the payload, so it must come after the space check:
    // a re-queued message is delivered byte-identical on the next read.
    translate::read_side(process, &mut msg.buf).map_err(Delivery::Fatal)?;

    let opcode =
        if msg.kind == MessageKind::Transaction { BR_TRANSACTION } else { BR_REPLY };
    let header = TransactionHeader {
        target_owner: msg.object.owner.raw(),
        target_key: msg.object.key,
        code: msg.code,
        flags: msg.flags,
        sender_pid: msg.sender_pid,
        sender_euid: msg.sender_euid,
        data_size: msg.buf.data.len() as u32,
        offsets_size: msg.buf.offsets_size() as u32,
    };
    put_u32(out, 0, opcode);
    header.encode(&mut out[OPCODE_SIZE..]);
    let mut at = OPCODE_SIZE + TRANSACTION_HEADER_SIZE;
    out[at..at + msg.buf.data.len()].copy_from_slice(&msg.buf.data);
    at += msg.buf.data.len();
    for &off in &msg.buf.offsets {
        put_u64(out, at, off);
        at += OFFSET_SIZE;
    }
    debug_assert_eq!(at, needed);

    match msg.kind {
        // The worker now services this request; its later reply is routed
        // through the stack entry.
        MessageKind::Transaction if !msg.is_one_way() => thread.push_incoming(msg),
        MessageKind::Reply => thread.dec_pending_replies(),
        _ => {}
    }
    Ok(needed)
}
