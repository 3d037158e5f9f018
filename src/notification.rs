// Copyright (c) 2025 - Cowboy AI, Inc.
//! Correlation / Notification Containers
//!
//! A request that issued a command waits here for the confirmation event the
//! device eventually produces on another connection.
//!
//! # Lifecycle
//!
//! ```text
//! add(id) ──► Waiter ──wait()──► value | Timeout
//!    │
//!    └──► find(id) ──► Notifier ──deliver(value)── (never blocks)
//!
//! remove(id) is always called by the waiting side
//! ```
//!
//! A slot accepts at most one value. Delivering into a filled slot, a removed
//! slot or a slot whose waiter is gone drops the value silently.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::errors::{CqrsError, CqrsResult};
use crate::events::{ResourceDeleted, ResourceEvent, ResourceRetrieved, ResourceUpdated};

struct Slot<T> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

/// Delivering side of a correlation entry
pub struct Notifier<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Notifier<T> {
    /// Place `value` into the slot without blocking
    ///
    /// Returns `false` when the value was dropped.
    pub fn deliver(&self, value: T) -> bool {
        match self.slot.sender.lock().take() {
            Some(sender) => sender.send(value).is_ok(),
            None => false,
        }
    }
}

/// Waiting side of a correlation entry
pub struct Waiter<T> {
    correlation_id: String,
    receiver: oneshot::Receiver<T>,
}

impl<T> Waiter<T> {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Wait for the delivered value
    ///
    /// Fails with `Timeout` when nothing arrives in time and with `NotFound`
    /// when the entry was removed before a value was delivered.
    pub async fn wait(self, timeout: Duration) -> CqrsResult<T> {
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(CqrsError::NotFound(format!(
                "correlation id '{}' was removed before delivery",
                self.correlation_id
            ))),
            Err(_) => Err(CqrsError::Timeout(format!(
                "no confirmation for correlation id '{}' within {:?}",
                self.correlation_id, timeout
            ))),
        }
    }
}

/// Single-slot rendezvous points keyed by correlation id
pub struct NotificationContainer<T> {
    slots: DashMap<String, Arc<Slot<T>>>,
}

impl<T> Default for NotificationContainer<T> {
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<T> fmt::Debug for NotificationContainer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationContainer")
            .field("entries", &self.slots.len())
            .finish()
    }
}

impl<T> NotificationContainer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the entry for `correlation_id`
    ///
    /// Must happen before the triggering command is issued. Fails with
    /// `InvalidArgument` if the id is empty or already waited on.
    pub fn add(&self, correlation_id: impl Into<String>) -> CqrsResult<Waiter<T>> {
        let correlation_id = correlation_id.into();
        if correlation_id.is_empty() {
            return Err(CqrsError::InvalidArgument("invalid correlation id".to_string()));
        }
        match self.slots.entry(correlation_id.clone()) {
            Entry::Occupied(_) => Err(CqrsError::InvalidArgument(format!(
                "correlation id '{correlation_id}' already exists"
            ))),
            Entry::Vacant(vacant) => {
                let (sender, receiver) = oneshot::channel();
                vacant.insert(Arc::new(Slot {
                    sender: Mutex::new(Some(sender)),
                }));
                Ok(Waiter {
                    correlation_id,
                    receiver,
                })
            }
        }
    }

    /// Locate the entry, `None` when nobody waits
    pub fn find(&self, correlation_id: &str) -> Option<Notifier<T>> {
        self.slots.get(correlation_id).map(|slot| Notifier {
            slot: Arc::clone(slot.value()),
        })
    }

    pub fn remove(&self, correlation_id: &str) {
        self.slots.remove(correlation_id);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// One container per confirmation kind, keyed the same way
#[derive(Debug, Default)]
pub struct NotificationContainers {
    pub updated: NotificationContainer<ResourceUpdated>,
    pub retrieved: NotificationContainer<ResourceRetrieved>,
    pub deleted: NotificationContainer<ResourceDeleted>,
}

impl NotificationContainers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward a confirmation event to its waiter
    ///
    /// Returns `true` only when a waiter received the event.
    pub fn notify(&self, event: &ResourceEvent) -> bool {
        let correlation_id = event.correlation_id();
        match event {
            ResourceEvent::ResourceUpdated(e) => self
                .updated
                .find(correlation_id)
                .is_some_and(|n| n.deliver(e.clone())),
            ResourceEvent::ResourceRetrieved(e) => self
                .retrieved
                .find(correlation_id)
                .is_some_and(|n| n.deliver(e.clone())),
            ResourceEvent::ResourceDeleted(e) => self
                .deleted
                .find(correlation_id)
                .is_some_and(|n| n.deliver(e.clone())),
            _ => false,
        }
    }
}
