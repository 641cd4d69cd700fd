// Copyright 2025 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Process records and their lifecycle.
//!
//! One record exists per open handle on the device. Release closes every
//! queue the process owns, redirects in-flight synchronous requests back to
//! their callers as synthetic death notices, and fans a `DeadBinder` out to
//! every notifier registered on the process's exports.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::message::{Message, MessageKind};
use crate::object::{BinderObject, ObjectId, ObjectRegistry};
use crate::queue::{MessageQueue, QueueId};
use crate::thread::Thread;

/// Looper commands handled by the thread-pool controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LooperCommand {
    Enter,
    Exit,
    Register,
}

struct ProcessInner {
    threads: BTreeMap<u64, Arc<Thread>>,
    max_threads: u32,
    num_loopers: u32,
    pending_loopers: u32,
}

/// State kept for one process attached to the dispatcher.
pub struct Process {
    pid: u32,
    non_block: bool,
    queue: Arc<MessageQueue>,
    /// Worker table plus pool counters; the `thread_lock` of the model.
    inner: Mutex<ProcessInner>,
    /// Object registry; the `obj_lock` of the model.
    objects: Mutex<ObjectRegistry>,
}

impl Process {
    pub(crate) fn new(pid: u32, non_block: bool) -> Arc<Self> {
        Arc::new(Self {
            pid,
            non_block,
            queue: MessageQueue::new(non_block, Box::new(redirect_dead)),
            inner: Mutex::new(ProcessInner {
                threads: BTreeMap::new(),
                max_threads: 0,
                num_loopers: 0,
                pending_loopers: 0,
            }),
            objects: Mutex::new(ObjectRegistry::default()),
        })
    }

    /// Pid the process opened the device with.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The process-wide queue for work not addressed to a specific worker.
    pub(crate) fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    /// Registry of every object this process exports or references.
    pub(crate) fn objects(&self) -> &Mutex<ObjectRegistry> {
        &self.objects
    }

    /// Looks up an object by full id.
    pub(crate) fn find_object(&self, id: ObjectId) -> Option<Arc<BinderObject>> {
        self.objects.lock().find(id)
    }

    /// Looks up one of this process's own exports.
    pub(crate) fn find_local(&self, key: u64) -> Option<Arc<BinderObject>> {
        self.find_object(ObjectId::new(self.queue.id(), key))
    }

    /// Registers an export of this process, or returns the existing entry.
    pub(crate) fn export_object(&self, key: u64, real_cookie: u64) -> Arc<BinderObject> {
        self.objects.lock().insert_or_get(Arc::clone(&self.queue), key, real_cookie)
    }

    /// Returns the worker record for `tid`, creating it on first use.
    pub(crate) fn thread_for(&self, tid: u64) -> Arc<Thread> {
        if let Some(thread) = self.inner.lock().threads.get(&tid) {
            return Arc::clone(thread);
        }
        // Created outside the table lock; a racing creator wins below.
        let fresh = Thread::new(tid, self.non_block, Box::new(redirect_dead));
        let mut inner = self.inner.lock();
        Arc::clone(inner.threads.entry(tid).or_insert(fresh))
    }

    /// Emits a spawn request when work is visibly backing up and the pool
    /// budget allows another looper. At most one request per read call.
    pub(crate) fn spawn_probe(&self) -> bool {
        if self.queue.len() <= 1 {
            return false;
        }
        let mut inner = self.inner.lock();
        if inner.num_loopers + inner.pending_loopers < inner.max_threads {
            inner.pending_loopers += 1;
            true
        } else {
            false
        }
    }

    /// Applies a looper transition for `thread`; `false` means the command
    /// was rejected and the caller records `BR_FAILED_REPLY`.
    pub(crate) fn looper_transition(&self, thread: &Thread, cmd: LooperCommand) -> bool {
        let accepted = {
            let mut t = thread.inner.lock();
            match cmd {
                LooperCommand::Enter | LooperCommand::Register if t.state.entered => false,
                LooperCommand::Register if t.state.registered => false,
                LooperCommand::Enter => {
                    t.state.entered = true;
                    true
                }
                LooperCommand::Register => {
                    t.state.registered = true;
                    true
                }
                LooperCommand::Exit if t.state.entered => {
                    t.state.entered = false;
                    true
                }
                LooperCommand::Exit => false,
            }
        };
        if accepted {
            let mut inner = self.inner.lock();
            match cmd {
                LooperCommand::Enter => inner.num_loopers += 1,
                LooperCommand::Exit => inner.num_loopers = inner.num_loopers.saturating_sub(1),
                LooperCommand::Register => {
                    inner.pending_loopers = inner.pending_loopers.saturating_sub(1)
                }
            }
        }
        accepted
    }

    /// Updates the pool budget.
    pub(crate) fn set_max_threads(&self, max_threads: u32) {
        self.inner.lock().max_threads = max_threads;
    }

    /// Tears down one worker: closes its queue, redirects the requests it
    /// was servicing, and releases its looper slot.
    pub(crate) fn remove_thread(&self, tid: u64) -> bool {
        let thread = match self.inner.lock().threads.remove(&tid) {
            Some(thread) => thread,
            None => return false,
        };
        self.free_thread(thread);
        true
    }

    fn free_thread(&self, thread: Arc<Thread>) {
        debug!("process {}: worker {} gone", self.pid, thread.tid());
        thread.queue().close();
        for msg in thread.take_incoming() {
            redirect_dead(msg);
        }
        let entered = {
            let mut t = thread.inner.lock();
            let entered = t.state.entered;
            t.state.entered = false;
            entered
        };
        if entered {
            let mut inner = self.inner.lock();
            inner.num_loopers = inner.num_loopers.saturating_sub(1);
        }
    }

    /// Releases the process: closes all queues and fans out death
    /// notifications for every export.
    pub(crate) fn release(&self) {
        debug!("releasing process {}", self.pid);
        self.queue.close();

        let threads = std::mem::take(&mut self.inner.lock().threads);
        for (_, thread) in threads {
            self.free_thread(thread);
        }

        let objects = self.objects.lock().drain();
        for obj in objects {
            if obj.id().owner != self.queue.id() {
                // A reference into another process; nothing to notify.
                continue;
            }
            for notifier in obj.take_notifiers() {
                let mut msg = Message::bare(MessageKind::DeadBinder);
                msg.object = obj.id();
                msg.cookie = notifier.cookie;
                if notifier.notify_queue.push_tail(msg).is_err() {
                    debug!("death notice for {:?} dropped: observer gone", obj.id());
                }
            }
        }
    }

    /// Queue id shorthand used by the translator.
    pub(crate) fn queue_id(&self) -> QueueId {
        self.queue.id()
    }
}

/// Drain hook shared by every queue the dispatcher creates: a synchronous
/// request stranded on a dying queue is rewritten into a `DeadBinder` and
/// forwarded to its reply queue so the caller unblocks with a failure
/// instead of hanging. Runs with the closing queue's lock dropped.
pub(crate) fn redirect_dead(mut msg: Box<Message>) {
    if msg.kind != MessageKind::Transaction {
        return;
    }
    let reply_queue = match msg.reply_queue.take() {
        Some(queue) => queue,
        // One-way; nobody is waiting.
        None => return,
    };
    msg.kind = MessageKind::DeadBinder;
    let _ = reply_queue.push_tail(msg);
}
