// Copyright (c) 2025 - Cowboy AI, Inc.
//! In-process Event Store
//!
//! Keeps every aggregate log in a concurrent map keyed by aggregate id. The
//! version check and the append happen under the same map entry lock, so
//! concurrent writers of one aggregate see exactly one winner while writers
//! of different aggregates never contend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::maintenance::{MaintenanceStore, MaintenanceTask};
use super::{
    validate_events_before_save, EventHandler, EventStore, SaveStatus, SnapshotQuery,
    VersionQuery,
};
use crate::errors::{CqrsError, CqrsResult};
use crate::events::{EventIter, StoredEvent};

#[derive(Debug, Default)]
struct AggregateLog {
    group_id: String,

    /// Next free version, survives purges
    next_version: u64,

    events: BTreeMap<u64, StoredEvent>,
}

impl AggregateLog {
    fn latest_snapshot_at_or_below(&self, version: u64) -> Option<u64> {
        self.events
            .range(..=version)
            .rev()
            .find(|(_, e)| e.is_snapshot)
            .map(|(v, _)| *v)
    }

    fn from_latest_snapshot(&self) -> Vec<StoredEvent> {
        let start = self
            .events
            .iter()
            .rev()
            .find(|(_, e)| e.is_snapshot)
            .map(|(v, _)| *v)
            .unwrap_or(0);
        self.events.range(start..).map(|(_, e)| e.clone()).collect()
    }
}

/// Event store held in process memory
///
/// # Example
///
/// ```rust
/// use cim_resource_aggregate::event_store::MemoryEventStore;
///
/// let store = MemoryEventStore::new();
/// assert_eq!(store.aggregate_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    aggregates: DashMap<String, AggregateLog>,
    tasks: Mutex<BTreeMap<(String, String), MaintenanceTask>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aggregate_count(&self) -> usize {
        self.aggregates.len()
    }

    /// All stored events of one aggregate, ascending
    pub fn events_of(&self, aggregate_id: &str) -> Vec<StoredEvent> {
        self.aggregates
            .get(aggregate_id)
            .map(|log| log.events.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the batches a query selects, taken before any await
    fn select<F>(&self, mut select: F) -> Vec<(String, Vec<StoredEvent>)>
    where
        F: FnMut(&str, &AggregateLog) -> Option<Vec<StoredEvent>>,
    {
        self.aggregates
            .iter()
            .filter_map(|entry| {
                select(entry.key(), entry.value())
                    .filter(|events| !events.is_empty())
                    .map(|events| (entry.key().clone(), events))
            })
            .collect()
    }

    fn select_versions<F>(&self, queries: &[VersionQuery], filter: F) -> Vec<(String, Vec<StoredEvent>)>
    where
        F: Fn(u64, u64) -> bool,
    {
        let mut batches = Vec::new();
        for query in queries {
            let Some(log) = self.aggregates.get(&query.aggregate_id) else {
                continue;
            };
            if !query.group_id.is_empty() && log.group_id != query.group_id {
                continue;
            }
            let events: Vec<StoredEvent> = log
                .events
                .iter()
                .filter(|(v, _)| filter(**v, query.version))
                .map(|(_, e)| e.clone())
                .collect();
            if !events.is_empty() {
                batches.push((query.aggregate_id.clone(), events));
            }
        }
        batches
    }
}

/// Hand each aggregate batch to the handler
///
/// A failing aggregate does not stop the others; the first error is returned.
async fn dispatch(
    batches: Vec<(String, Vec<StoredEvent>)>,
    handler: &dyn EventHandler,
) -> CqrsResult<()> {
    let mut first_err = None;
    for (aggregate_id, events) in batches {
        debug!(aggregate_id = %aggregate_id, count = events.len(), "replaying aggregate");
        if let Err(err) = handler.handle(EventIter::from_events(events)).await {
            warn!(aggregate_id = %aggregate_id, error = %err, "replay of aggregate failed");
            first_err.get_or_insert(err);
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn save(
        &self,
        group_id: &str,
        aggregate_id: &str,
        events: &[StoredEvent],
    ) -> CqrsResult<SaveStatus> {
        validate_events_before_save(group_id, aggregate_id, events)?;

        let first = events[0].version;
        let mut log = match self.aggregates.entry(aggregate_id.to_string()) {
            Entry::Occupied(entry) => {
                let log = entry.into_ref();
                if log.group_id != group_id {
                    return Err(CqrsError::InvalidArgument(format!(
                        "aggregate {} belongs to group {}, not {}",
                        aggregate_id, log.group_id, group_id
                    )));
                }
                log
            }
            // a conflicting first save leaves no trace of the aggregate
            Entry::Vacant(_) if first != 0 => {
                debug!(aggregate_id = %aggregate_id, version = first, "unknown aggregate");
                return Ok(SaveStatus::ConcurrencyException);
            }
            Entry::Vacant(entry) => entry.insert(AggregateLog {
                group_id: group_id.to_string(),
                ..Default::default()
            }),
        };

        if first != log.next_version {
            debug!(
                aggregate_id = %aggregate_id,
                version = first,
                expected = log.next_version,
                "version already taken"
            );
            return Ok(SaveStatus::ConcurrencyException);
        }

        for event in events {
            log.events.insert(event.version, event.clone());
        }
        log.next_version = first + events.len() as u64;
        Ok(SaveStatus::Ok)
    }

    async fn load_from_version(
        &self,
        queries: &[VersionQuery],
        handler: &dyn EventHandler,
    ) -> CqrsResult<()> {
        let batches = self.select_versions(queries, |v, from| v > from);
        dispatch(batches, handler).await
    }

    async fn load_from_snapshot(
        &self,
        queries: &[SnapshotQuery],
        handler: &dyn EventHandler,
    ) -> CqrsResult<()> {
        let all = SnapshotQuery::all();
        let queries = if queries.is_empty() {
            std::slice::from_ref(&all)
        } else {
            queries
        };
        let batches = self.select(|aggregate_id, log| {
            queries
                .iter()
                .any(|q| q.matches(&log.group_id, aggregate_id))
                .then(|| log.from_latest_snapshot())
        });
        dispatch(batches, handler).await
    }

    async fn load_up_to_version(
        &self,
        queries: &[VersionQuery],
        handler: &dyn EventHandler,
    ) -> CqrsResult<()> {
        let batches = self.select_versions(queries, |v, to| v < to);
        dispatch(batches, handler).await
    }

    async fn remove_up_to_version(&self, queries: &[VersionQuery]) -> CqrsResult<()> {
        for query in queries {
            let Some(mut log) = self.aggregates.get_mut(&query.aggregate_id) else {
                continue;
            };
            if !query.group_id.is_empty() && log.group_id != query.group_id {
                continue;
            }
            let Some(keep_from) = log.latest_snapshot_at_or_below(query.version) else {
                debug!(aggregate_id = %query.aggregate_id, "no snapshot below cutoff, nothing purged");
                continue;
            };
            let kept = log.events.split_off(&keep_from);
            log.events = kept;
        }
        Ok(())
    }
}

#[async_trait]
impl MaintenanceStore for MemoryEventStore {
    async fn insert_task(&self, task: MaintenanceTask) -> CqrsResult<()> {
        let mut tasks = self.tasks.lock();
        let key = (task.group_id.clone(), task.aggregate_id.clone());
        match tasks.get(&key) {
            Some(existing) if existing.version >= task.version => {}
            _ => {
                tasks.insert(key, task);
            }
        }
        Ok(())
    }

    async fn query_tasks(&self, limit: usize) -> CqrsResult<Vec<MaintenanceTask>> {
        Ok(self.tasks.lock().values().take(limit).cloned().collect())
    }

    async fn remove_task(&self, task: &MaintenanceTask) -> CqrsResult<()> {
        let mut tasks = self.tasks.lock();
        let key = (task.group_id.clone(), task.aggregate_id.clone());
        if tasks.get(&key).is_some_and(|t| t.version <= task.version) {
            tasks.remove(&key);
        }
        Ok(())
    }
}
