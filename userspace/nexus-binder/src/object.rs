// Copyright 2025 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-process object registry.
//!
//! Every binder object is identified by `(owner queue, local key)`. An entry
//! whose owner is the registry's own process is an export; any other owner
//! marks a reference into a foreign process. Only exports carry death
//! notifiers.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::queue::{MessageQueue, QueueId};

/// Identity of a binder object: the owner's queue id plus an owner-local key.
///
/// Ordered lexicographically, which makes it directly usable as the registry
/// key.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectId {
    /// Queue id of the exporting process.
    pub owner: QueueId,
    /// Opaque value meaningful only to the owner.
    pub key: u64,
}

impl ObjectId {
    /// The null object; addresses the context manager in transaction targets.
    pub const NULL: ObjectId = ObjectId { owner: QueueId::NULL, key: 0 };

    /// Builds an id from its parts.
    pub const fn new(owner: QueueId, key: u64) -> Self {
        Self { owner, key }
    }

    /// True for the null object.
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

/// Events a notifier can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ObjectEvent {
    /// The object's owner process was released.
    ObjectDead,
}

/// A death subscription held by a foreign process.
pub(crate) struct Notifier {
    pub event: ObjectEvent,
    pub cookie: u64,
    pub notify_queue: Arc<MessageQueue>,
}

/// A registered binder object.
///
/// The owner queue handle anchors the object's identity and keeps the owner
/// queue reachable for routing. The notifier map has its own lock so death
/// subscription churn never contends with registry lookups.
pub(crate) struct BinderObject {
    id: ObjectId,
    owner: Arc<MessageQueue>,
    real_cookie: u64,
    notifiers: Mutex<BTreeMap<(u64, QueueId), Notifier>>,
}

impl BinderObject {
    fn new(owner: Arc<MessageQueue>, key: u64, real_cookie: u64) -> Arc<Self> {
        Arc::new(Self {
            id: ObjectId::new(owner.id(), key),
            owner,
            real_cookie,
            notifiers: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Queue of the owning process.
    pub fn owner(&self) -> &Arc<MessageQueue> {
        &self.owner
    }

    /// Cookie recorded when the owner exported the object.
    pub fn real_cookie(&self) -> u64 {
        self.real_cookie
    }

    /// Records a death subscription. Re-registering the same
    /// `(cookie, notify queue)` pair collapses to a single entry.
    pub fn add_notifier(&self, notifier: Notifier) {
        let key = (notifier.cookie, notifier.notify_queue.id());
        self.notifiers.lock().insert(key, notifier);
    }

    /// Removes the subscription matching `(ObjectDead, cookie, queue)`;
    /// reports whether one was present.
    pub fn remove_notifier(&self, cookie: u64, queue: QueueId) -> bool {
        let mut map = self.notifiers.lock();
        match map.get(&(cookie, queue)) {
            Some(notifier) if notifier.event == ObjectEvent::ObjectDead => {
                map.remove(&(cookie, queue));
                true
            }
            _ => false,
        }
    }

    /// Drains all subscriptions for the owner-release fan-out.
    pub fn take_notifiers(&self) -> Vec<Notifier> {
        let mut map = self.notifiers.lock();
        std::mem::take(&mut *map).into_values().collect()
    }

    #[cfg(test)]
    fn notifier_count(&self) -> usize {
        self.notifiers.lock().len()
    }
}

/// Ordered map of all objects a process knows about, exports and references
/// alike. Guarded externally by the process object lock.
#[derive(Default)]
pub(crate) struct ObjectRegistry {
    objects: BTreeMap<ObjectId, Arc<BinderObject>>,
}

impl ObjectRegistry {
    /// Looks up an object by its full id.
    pub fn find(&self, id: ObjectId) -> Option<Arc<BinderObject>> {
        self.objects.get(&id).cloned()
    }

    /// Returns the existing entry for `(owner, key)` or inserts a new one.
    /// `real_cookie` is recorded only when this call creates the entry; a
    /// racing earlier insert wins and its cookie stands.
    pub fn insert_or_get(
        &mut self,
        owner: Arc<MessageQueue>,
        key: u64,
        real_cookie: u64,
    ) -> Arc<BinderObject> {
        let id = ObjectId::new(owner.id(), key);
        Arc::clone(
            self.objects.entry(id).or_insert_with(|| BinderObject::new(owner, key, real_cookie)),
        )
    }

    /// Removes an object from the registry.
    pub fn erase(&mut self, id: ObjectId) -> Option<Arc<BinderObject>> {
        self.objects.remove(&id)
    }

    /// Erases and returns every object, ordered by id.
    pub fn drain(&mut self) -> Vec<Arc<BinderObject>> {
        let ids: Vec<ObjectId> = self.objects.keys().copied().collect();
        ids.into_iter().filter_map(|id| self.erase(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }
}
