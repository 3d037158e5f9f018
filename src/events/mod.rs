// Copyright (c) 2025 - Cowboy AI, Inc.
//! Resource Events
//!
//! Events are immutable facts about one resource aggregate. The payloads in
//! [`resource`] are wrapped by the [`ResourceEvent`] tagged union, and each
//! stored event is carried in a [`StoredEvent`] envelope holding
//! `{group_id, aggregate_id, version, event_type}`.
//!
//! # Identity
//!
//! ```text
//! group_id     = device id
//! aggregate_id = ResourceId::to_uuid()
//! version      = 0, 1, 2, ... per aggregate, gap-free from the last snapshot
//! ```
//!
//! # Reading events
//!
//! Stores and buses hand events to consumers through [`EventIter`], a lazy,
//! non-restartable sequence. Decoding happens on pull; the first failure
//! terminates the sequence and stays available through [`EventIter::err`].

pub mod resource;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{CqrsError, CqrsResult};

pub use resource::{
    AuditContext, Content, EventMetadata, Resource, ResourceChanged, ResourceDeletePending,
    ResourceDeleted, ResourceId, ResourcePublished, ResourceRetrievePending, ResourceRetrieved,
    ResourceStateSnapshotTaken, ResourceUnpublished, ResourceUpdatePending, ResourceUpdated,
    Status,
};

/// Resource Domain Events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceEvent {
    ResourcePublished(ResourcePublished),
    ResourceUnpublished(ResourceUnpublished),
    ResourceUpdatePending(ResourceUpdatePending),
    ResourceUpdated(ResourceUpdated),
    ResourceRetrievePending(ResourceRetrievePending),
    ResourceRetrieved(ResourceRetrieved),
    ResourceDeletePending(ResourceDeletePending),
    ResourceDeleted(ResourceDeleted),
    ResourceChanged(ResourceChanged),
    ResourceStateSnapshotTaken(ResourceStateSnapshotTaken),
}

impl ResourceEvent {
    /// Stable name of the event kind
    pub fn event_type(&self) -> &'static str {
        use ResourceEvent::*;
        match self {
            ResourcePublished(_) => "resource_published",
            ResourceUnpublished(_) => "resource_unpublished",
            ResourceUpdatePending(_) => "resource_update_pending",
            ResourceUpdated(_) => "resource_updated",
            ResourceRetrievePending(_) => "resource_retrieve_pending",
            ResourceRetrieved(_) => "resource_retrieved",
            ResourceDeletePending(_) => "resource_delete_pending",
            ResourceDeleted(_) => "resource_deleted",
            ResourceChanged(_) => "resource_changed",
            ResourceStateSnapshotTaken(_) => "resource_state_snapshot_taken",
        }
    }

    pub fn is_snapshot(&self) -> bool {
        matches!(self, ResourceEvent::ResourceStateSnapshotTaken(_))
    }

    pub fn resource_id(&self) -> &ResourceId {
        use ResourceEvent::*;
        match self {
            ResourcePublished(e) => &e.resource_id,
            ResourceUnpublished(e) => &e.resource_id,
            ResourceUpdatePending(e) => &e.resource_id,
            ResourceUpdated(e) => &e.resource_id,
            ResourceRetrievePending(e) => &e.resource_id,
            ResourceRetrieved(e) => &e.resource_id,
            ResourceDeletePending(e) => &e.resource_id,
            ResourceDeleted(e) => &e.resource_id,
            ResourceChanged(e) => &e.resource_id,
            ResourceStateSnapshotTaken(e) => &e.resource_id,
        }
    }

    pub fn event_metadata(&self) -> &EventMetadata {
        use ResourceEvent::*;
        match self {
            ResourcePublished(e) => &e.event_metadata,
            ResourceUnpublished(e) => &e.event_metadata,
            ResourceUpdatePending(e) => &e.event_metadata,
            ResourceUpdated(e) => &e.event_metadata,
            ResourceRetrievePending(e) => &e.event_metadata,
            ResourceRetrieved(e) => &e.event_metadata,
            ResourceDeletePending(e) => &e.event_metadata,
            ResourceDeleted(e) => &e.event_metadata,
            ResourceChanged(e) => &e.event_metadata,
            ResourceStateSnapshotTaken(e) => &e.event_metadata,
        }
    }

    pub fn audit_context(&self) -> &AuditContext {
        use ResourceEvent::*;
        match self {
            ResourcePublished(e) => &e.audit_context,
            ResourceUnpublished(e) => &e.audit_context,
            ResourceUpdatePending(e) => &e.audit_context,
            ResourceUpdated(e) => &e.audit_context,
            ResourceRetrievePending(e) => &e.audit_context,
            ResourceRetrieved(e) => &e.audit_context,
            ResourceDeletePending(e) => &e.audit_context,
            ResourceDeleted(e) => &e.audit_context,
            ResourceChanged(e) => &e.audit_context,
            ResourceStateSnapshotTaken(e) => &e.audit_context,
        }
    }

    pub fn version(&self) -> u64 {
        self.event_metadata().version
    }

    pub fn correlation_id(&self) -> &str {
        &self.audit_context().correlation_id
    }
}

/// Stored event envelope
///
/// The envelope fields are derived from the payload on construction, so they
/// can never disagree with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Device id
    pub group_id: String,

    /// Resource aggregate id
    pub aggregate_id: String,

    /// Version within the aggregate stream
    pub version: u64,

    /// Event type name (see [`ResourceEvent::event_type`])
    pub event_type: String,

    pub is_snapshot: bool,

    pub timestamp: DateTime<Utc>,

    /// The actual domain event
    pub data: ResourceEvent,
}

impl StoredEvent {
    pub fn new(data: ResourceEvent) -> Self {
        let resource_id = data.resource_id();
        let metadata = data.event_metadata();
        Self {
            group_id: resource_id.device_id.clone(),
            aggregate_id: resource_id.aggregate_id(),
            version: metadata.version,
            event_type: data.event_type().to_string(),
            is_snapshot: data.is_snapshot(),
            timestamp: metadata.timestamp,
            data,
        }
    }

    /// Encode for the wire or a durable log
    pub fn to_bytes(&self) -> CqrsResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CqrsError::Serialization(e.to_string()))
    }

    pub fn from_bytes(payload: &[u8]) -> CqrsResult<Self> {
        serde_json::from_slice(payload).map_err(|e| CqrsError::Deserialization(e.to_string()))
    }

    /// Encode a batch as a single payload
    pub fn batch_to_bytes(events: &[StoredEvent]) -> CqrsResult<Vec<u8>> {
        serde_json::to_vec(events).map_err(|e| CqrsError::Serialization(e.to_string()))
    }

    pub fn batch_from_bytes(payload: &[u8]) -> CqrsResult<Vec<StoredEvent>> {
        serde_json::from_slice(payload).map_err(|e| CqrsError::Deserialization(e.to_string()))
    }
}

impl From<ResourceEvent> for StoredEvent {
    fn from(data: ResourceEvent) -> Self {
        StoredEvent::new(data)
    }
}

/// Lazy, finite, non-restartable sequence of events
///
/// Items are decoded on pull. The first failure ends the sequence; the
/// error is kept and returned by [`EventIter::err`] and [`EventIter::finish`].
pub struct EventIter {
    inner: Box<dyn Iterator<Item = CqrsResult<StoredEvent>> + Send>,
    err: Option<CqrsError>,
    done: bool,
}

impl EventIter {
    pub fn new<I>(items: I) -> Self
    where
        I: IntoIterator<Item = CqrsResult<StoredEvent>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            inner: Box::new(items.into_iter()),
            err: None,
            done: false,
        }
    }

    pub fn from_events(events: Vec<StoredEvent>) -> Self {
        Self::new(events.into_iter().map(Ok))
    }

    /// Decode raw payloads lazily
    pub fn from_payloads(payloads: Vec<Vec<u8>>) -> Self {
        Self::new(payloads.into_iter().map(|p| StoredEvent::from_bytes(&p)))
    }

    pub fn empty() -> Self {
        Self::from_events(Vec::new())
    }

    /// Error that terminated the sequence, if any
    pub fn err(&self) -> Option<&CqrsError> {
        self.err.as_ref()
    }

    /// Drain the rest of the sequence and return its terminal error
    pub fn finish(mut self) -> CqrsResult<()> {
        while self.next().is_some() {}
        match self.err.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Iterator for EventIter {
    type Item = StoredEvent;

    fn next(&mut self) -> Option<StoredEvent> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Some(Ok(event)) => Some(event),
            Some(Err(err)) => {
                self.err = Some(err);
                self.done = true;
                None
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

impl std::fmt::Debug for EventIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventIter")
            .field("done", &self.done)
            .field("err", &self.err)
            .finish()
    }
}
