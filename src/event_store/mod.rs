// Copyright (c) 2025 - Cowboy AI, Inc.
//! Event Store Abstraction
//!
//! This module defines the append-only, per-aggregate event log that the
//! resource aggregate writes to and projections replay from.
//!
//! # Architecture
//!
//! ```text
//! Command → Aggregate → Events → EventStore::save (optimistic concurrency)
//!                                    ↓
//!                     load_from_snapshot / load_from_version
//!                                    ↓
//!                               Projections
//! ```
//!
//! # Contract
//!
//! 1. **Append-Only**: events are never rewritten; only history below a
//!    snapshot may be purged by maintenance
//! 2. **Ordered**: versions per aggregate start at 0 and are gap-free
//! 3. **Optimistic Concurrency**: a version that is already taken yields
//!    [`SaveStatus::ConcurrencyException`], not an error
//! 4. **Routed Replay**: loaded events are handed to an [`EventHandler`]
//!    once per aggregate, in ascending version order
//!
//! # Example
//!
//! ```rust,no_run
//! use cim_resource_aggregate::event_store::{EventCollector, EventStore, MemoryEventStore, SnapshotQuery};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryEventStore::new();
//! let collector = EventCollector::new();
//! store
//!     .load_from_snapshot(&[SnapshotQuery::group("device-1")], &collector)
//!     .await?;
//! println!("{} events", collector.events().len());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::{CqrsError, CqrsResult};
use crate::events::{EventIter, StoredEvent};

pub mod maintenance;
pub mod memory;
pub mod nats;

pub use maintenance::{perform_maintenance, BackupHandler, MaintenanceStore, MaintenanceTask};
pub use memory::MemoryEventStore;
pub use nats::NatsEventStore;

/// Outcome of [`EventStore::save`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    /// All events were appended
    Ok,

    /// Another writer already claimed the version; nothing was written
    ConcurrencyException,
}

impl SaveStatus {
    pub fn is_conflict(self) -> bool {
        self == SaveStatus::ConcurrencyException
    }
}

/// Selects events of one aggregate relative to a version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionQuery {
    pub group_id: String,
    pub aggregate_id: String,
    pub version: u64,
}

impl VersionQuery {
    pub fn new(group_id: impl Into<String>, aggregate_id: impl Into<String>, version: u64) -> Self {
        Self {
            group_id: group_id.into(),
            aggregate_id: aggregate_id.into(),
            version,
        }
    }
}

/// Selects aggregates to replay from their latest snapshot
///
/// No filter selects every aggregate; a group filter selects every
/// aggregate of one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SnapshotQuery {
    pub group_id: Option<String>,
    pub aggregate_id: Option<String>,
}

impl SnapshotQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn group(group_id: impl Into<String>) -> Self {
        Self {
            group_id: Some(group_id.into()),
            aggregate_id: None,
        }
    }

    pub fn aggregate(group_id: impl Into<String>, aggregate_id: impl Into<String>) -> Self {
        Self {
            group_id: Some(group_id.into()),
            aggregate_id: Some(aggregate_id.into()),
        }
    }

    /// Does an aggregate fall under this query
    pub fn matches(&self, group_id: &str, aggregate_id: &str) -> bool {
        self.group_id.as_deref().map_or(true, |g| g == group_id)
            && self.aggregate_id.as_deref().map_or(true, |a| a == aggregate_id)
    }
}

/// Consumer of loaded or delivered events
///
/// Stores call it once per aggregate; buses call it once per published batch.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, iter: EventIter) -> CqrsResult<()>;
}

/// Event Store trait for persisting and replaying resource events
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append events to one aggregate
    ///
    /// Events must be non-empty, belong to `(group_id, aggregate_id)`, have
    /// contiguous ascending versions and only the first may be a snapshot.
    /// The first version must be exactly the next free version of the
    /// aggregate, otherwise nothing is written and
    /// [`SaveStatus::ConcurrencyException`] is returned.
    async fn save(
        &self,
        group_id: &str,
        aggregate_id: &str,
        events: &[StoredEvent],
    ) -> CqrsResult<SaveStatus>;

    /// Events with version strictly greater than the query version
    async fn load_from_version(
        &self,
        queries: &[VersionQuery],
        handler: &dyn EventHandler,
    ) -> CqrsResult<()>;

    /// Replay matching aggregates starting at their latest snapshot
    async fn load_from_snapshot(
        &self,
        queries: &[SnapshotQuery],
        handler: &dyn EventHandler,
    ) -> CqrsResult<()>;

    /// Events with version strictly lower than the query version
    async fn load_up_to_version(
        &self,
        _queries: &[VersionQuery],
        _handler: &dyn EventHandler,
    ) -> CqrsResult<()> {
        Err(CqrsError::Unimplemented(
            "load up to version is not supported".to_string(),
        ))
    }

    /// Purge history below the query version
    ///
    /// The latest snapshot below the cutoff and everything after it are
    /// retained, so replay from snapshot keeps working.
    async fn remove_up_to_version(&self, _queries: &[VersionQuery]) -> CqrsResult<()> {
        Err(CqrsError::Unimplemented(
            "remove up to version is not supported".to_string(),
        ))
    }
}

/// Check the input of [`EventStore::save`]
pub fn validate_events_before_save(
    group_id: &str,
    aggregate_id: &str,
    events: &[StoredEvent],
) -> CqrsResult<()> {
    let first = events
        .first()
        .ok_or_else(|| CqrsError::InvalidArgument("cannot save empty events".to_string()))?;
    if group_id.is_empty() || aggregate_id.is_empty() {
        return Err(CqrsError::InvalidArgument(
            "group id and aggregate id are required".to_string(),
        ));
    }
    for (idx, event) in events.iter().enumerate() {
        if event.group_id != group_id || event.aggregate_id != aggregate_id {
            return Err(CqrsError::InvalidArgument(format!(
                "event {} belongs to {}/{}, not {}/{}",
                idx, event.group_id, event.aggregate_id, group_id, aggregate_id
            )));
        }
        if event.version != first.version + idx as u64 {
            return Err(CqrsError::InvalidArgument(format!(
                "event versions must ascend by one, got {} at position {}",
                event.version, idx
            )));
        }
        if idx > 0 && event.is_snapshot {
            return Err(CqrsError::InvalidArgument(
                "only the first event can be a snapshot".to_string(),
            ));
        }
    }
    Ok(())
}

/// Handler that keeps every event it receives
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Mutex<Vec<StoredEvent>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StoredEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<StoredEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

#[async_trait]
impl EventHandler for EventCollector {
    async fn handle(&self, iter: EventIter) -> CqrsResult<()> {
        let mut received = Vec::new();
        let mut iter = iter;
        received.extend(iter.by_ref());
        self.events.lock().extend(received);
        iter.finish()
    }
}
