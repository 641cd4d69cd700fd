// Copyright 2025 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Control surface exposed to the device-file collaborator.
//!
//! The collaborator owns the file plumbing and ioctl decoding; it hands this
//! module byte buffers, the caller's identity, and the non-blocking mode
//! flag, and gets back consumed/produced counters it can copy out.

use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::defs::PROTOCOL_VERSION;
use crate::error::{DispatchError, Result};
use crate::object::BinderObject;
use crate::process::Process;
use crate::router;

/// Identity of the calling thread, supplied by the collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Credentials {
    /// OS thread id; keys the worker record within the process.
    pub tid: u64,
    /// Effective uid, stamped on outgoing transactions.
    pub euid: u32,
}

/// A resumable write/read batch.
///
/// The consumed counters advance by however much each phase processed, so a
/// host can re-issue the same struct after partial progress.
pub struct BinderWriteRead<'a> {
    /// Packed `BC_*` command stream.
    pub write_buf: &'a [u8],
    /// Bytes of `write_buf` already processed.
    pub write_consumed: usize,
    /// Destination for `BR_*` records.
    pub read_buf: &'a mut [u8],
    /// Bytes of `read_buf` already filled.
    pub read_consumed: usize,
}

impl<'a> BinderWriteRead<'a> {
    /// Starts a fresh batch over the given buffers.
    pub fn new(write_buf: &'a [u8], read_buf: &'a mut [u8]) -> Self {
        Self { write_buf, write_consumed: 0, read_buf, read_consumed: 0 }
    }
}

struct ManagerSlot {
    object: Arc<BinderObject>,
    euid: u32,
}

/// One dispatcher instance; the anchor for the context-manager binding.
#[derive(Default)]
pub struct Device {
    context_mgr: Mutex<Option<ManagerSlot>>,
}

impl Device {
    /// Creates a dispatcher with no context manager bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a process. `non_block` makes every queue the process owns
    /// return immediately instead of blocking.
    pub fn open(&self, pid: u32, non_block: bool) -> Arc<Process> {
        debug!("process {pid} attached (non_block={non_block})");
        Process::new(pid, non_block)
    }

    /// Detaches a process: closes its queues, unblocks its workers, and
    /// fans out death notifications for its exports.
    pub fn release(&self, process: Arc<Process>) {
        process.release();
    }

    /// Runs a write batch followed by a read batch for the calling thread.
    pub fn write_read(
        &self,
        process: &Arc<Process>,
        creds: Credentials,
        bwr: &mut BinderWriteRead<'_>,
    ) -> Result<()> {
        let thread = process.thread_for(creds.tid);
        if bwr.write_consumed < bwr.write_buf.len() {
            let consumed = router::write_commands(
                self,
                process,
                &thread,
                creds.euid,
                &bwr.write_buf[bwr.write_consumed..],
            )?;
            bwr.write_consumed += consumed;
        }
        if bwr.read_consumed < bwr.read_buf.len() {
            let produced =
                router::read_commands(process, &thread, &mut bwr.read_buf[bwr.read_consumed..])?;
            bwr.read_consumed += produced;
        }
        Ok(())
    }

    /// Sets the looper-pool budget for `process`.
    pub fn set_max_threads(&self, process: &Process, max_threads: u32) {
        process.set_max_threads(max_threads);
    }

    /// Binds the context manager. Only the first caller binds; later calls
    /// fail with `PermissionDenied` under a different euid and `Busy`
    /// otherwise.
    pub fn set_context_manager(&self, process: &Process, euid: u32) -> Result<()> {
        let mut slot = self.context_mgr.lock();
        match &*slot {
            Some(manager) if manager.euid != euid => {
                warn!("euid {euid} tried to rebind the context manager");
                Err(DispatchError::PermissionDenied)
            }
            Some(_) => Err(DispatchError::Busy),
            None => {
                let object = process.export_object(0, 0);
                debug!("context manager bound by process {} (euid {euid})", process.pid());
                *slot = Some(ManagerSlot { object, euid });
                Ok(())
            }
        }
    }

    /// Tears down the worker record for `tid`; its in-flight requests are
    /// answered with synthetic death notices.
    pub fn thread_exit(&self, process: &Process, tid: u64) -> Result<()> {
        if process.remove_thread(tid) {
            Ok(())
        } else {
            Err(DispatchError::InvalidArgument)
        }
    }

    /// Protocol revision implemented by this dispatcher.
    pub fn version(&self) -> u32 {
        PROTOCOL_VERSION
    }

    pub(crate) fn context_manager(&self) -> Option<Arc<BinderObject>> {
        self.context_mgr.lock().as_ref().map(|slot| Arc::clone(&slot.object))
    }
}
