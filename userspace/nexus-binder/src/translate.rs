// Copyright 2025 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Handle translation for embedded object descriptors.
//!
//! Descriptors cross a process boundary in two steps. On the write side the
//! sender's exports are rewritten from `Binder` to `Handle` tags and the
//! owner's queue id is smuggled through the cookie field; the sender-chosen
//! cookie stays behind in the sender's registry. On the read side a `Handle`
//! either comes home (owner is the receiver: restore tag and cookie) or
//! materialises a reference entry in the receiver's registry.

use std::sync::Arc;

use log::warn;

use crate::defs::{
    FlatObject, TAG_BINDER, TAG_HANDLE, TAG_WEAK_BINDER, TAG_WEAK_HANDLE,
};
use crate::error::{DispatchError, Result};
use crate::message::MessageBuf;
use crate::object::ObjectId;
use crate::process::Process;
use crate::queue::QueueId;

/// Rewrites every embedded descriptor of an outgoing payload (sender view).
///
/// Fills `buf.owners` with one owner handle per descriptor so the in-flight
/// message keeps each owner queue reachable. Fails with `FailedReply` on an
/// out-of-range offset, an unknown handle, or a tag the sender may not emit.
pub(crate) fn write_side(process: &Process, buf: &mut MessageBuf) -> Result<()> {
    buf.owners.clear();
    for index in 0..buf.offsets.len() {
        let off = buf.offsets[index] as usize;
        let mut descriptor =
            FlatObject::decode(&buf.data, off).ok_or(DispatchError::FailedReply)?;
        match descriptor.tag {
            TAG_BINDER | TAG_WEAK_BINDER => {
                // The sender exports one of its own objects; record the
                // export cookie and smuggle the owner id to the reader.
                let obj = process.export_object(descriptor.binder, descriptor.cookie);
                descriptor.tag =
                    if descriptor.tag == TAG_BINDER { TAG_HANDLE } else { TAG_WEAK_HANDLE };
                descriptor.cookie = obj.id().owner.raw();
                descriptor.encode(&mut buf.data, off);
                buf.owners.push(Arc::clone(obj.owner()));
            }
            TAG_HANDLE | TAG_WEAK_HANDLE => {
                // Passing along a reference it already holds.
                let id = ObjectId::new(QueueId::from_raw(descriptor.cookie), descriptor.binder);
                let obj = process.find_object(id).ok_or(DispatchError::FailedReply)?;
                buf.owners.push(Arc::clone(obj.owner()));
            }
            other => {
                warn!("rejecting outgoing descriptor with tag {other}");
                return Err(DispatchError::FailedReply);
            }
        }
    }
    Ok(())
}

/// Rewrites every embedded descriptor of an arriving payload (receiver view).
///
/// `Binder` tags can no longer occur here; seeing one, an owner id that does
/// not match the carried owner handle, or a homecoming descriptor for an
/// object the receiver never exported is a `Fault`.
pub(crate) fn read_side(process: &Process, buf: &mut MessageBuf) -> Result<()> {
    for index in 0..buf.offsets.len() {
        let off = buf.offsets[index] as usize;
        let mut descriptor = FlatObject::decode(&buf.data, off).ok_or(DispatchError::Fault)?;
        match descriptor.tag {
            TAG_HANDLE | TAG_WEAK_HANDLE => {
                let owner_id = QueueId::from_raw(descriptor.cookie);
                if owner_id == process.queue_id() {
                    // The object came back to its exporter; restore the
                    // original tag and cookie.
                    let id = ObjectId::new(owner_id, descriptor.binder);
                    let obj = process.find_object(id).ok_or(DispatchError::Fault)?;
                    descriptor.tag = if descriptor.tag == TAG_HANDLE {
                        TAG_BINDER
                    } else {
                        TAG_WEAK_BINDER
                    };
                    descriptor.cookie = obj.real_cookie();
                    descriptor.encode(&mut buf.data, off);
                } else {
                    let owner = buf.owners.get(index).ok_or(DispatchError::Fault)?;
                    if owner.id() != owner_id {
                        return Err(DispatchError::Fault);
                    }
                    process.objects().lock().insert_or_get(
                        Arc::clone(owner),
                        descriptor.binder,
                        0,
                    );
                }
            }
            other => {
                warn!("rejecting incoming descriptor with tag {other}");
                return Err(DispatchError::Fault);
            }
        }
    }
    Ok(())
}
