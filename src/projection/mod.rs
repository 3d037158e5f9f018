// Copyright (c) 2025 - Cowboy AI, Inc.
//! Projections: live read models over the event store
//!
//! A [`Projection`] keeps one model per `(group_id, aggregate_id)`. Models are
//! built by replaying the store from the latest snapshot and kept current by
//! batches arriving from the event bus.
//!
//! # Version Tracking
//!
//! Every model tracks the last applied version and whether it has a base
//! (version 0 or a snapshot). An incoming event is:
//!
//! ```text
//! base (v == 0 on a fresh model, or a newer snapshot)  → apply, v becomes the base
//! v == last + 1                                        → apply
//! v <= last                                            → ignore (redelivery)
//! anything else                                        → gap, reload from the store
//! ```
//!
//! Consecutive events of one aggregate within a batch are applied under a
//! single hold of the model's lock, so readers see the model before or after
//! the batch, never halfway through it.
//!
//! # Reference-Counted Registration
//!
//! [`ResourceProjection`] multiplexes many registrations of the same device
//! onto one model set and one bus subscription, see [`TopicManager`].

pub mod resource_model;
pub mod resource_projection;
pub mod topic_manager;

pub use resource_model::ResourceModel;
pub use resource_projection::{ResourceProjection, TopicsFn};
pub use topic_manager::TopicManager;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::errors::CqrsResult;
use crate::event_store::{EventHandler, EventStore, SnapshotQuery, VersionQuery};
use crate::events::{EventIter, StoredEvent};

/// Read model fed by a [`Projection`]
pub trait ProjectionModel: Send + 'static {
    /// Fold one event; a snapshot replaces the whole state
    fn apply(&mut self, event: &StoredEvent) -> CqrsResult<()>;
}

/// Creates the model of `(group_id, aggregate_id)`
pub type ProjectionFactory<M> = Arc<dyn Fn(&str, &str) -> CqrsResult<M> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Apply,
    Ignore,
    Reload,
}

struct Tracked<M> {
    model: M,
    version: u64,
    has_base: bool,
}

impl<M> Tracked<M> {
    fn step(&self, event: &StoredEvent) -> Step {
        let is_base = (!self.has_base && event.version == 0)
            || (event.is_snapshot && (!self.has_base || event.version > self.version));
        if is_base || (self.has_base && event.version == self.version + 1) {
            Step::Apply
        } else if self.has_base && event.version <= self.version {
            Step::Ignore
        } else {
            Step::Reload
        }
    }
}

/// Replay request produced by a gap
struct Reload {
    group_id: String,
    aggregate_id: String,
    after: Option<u64>,
}

/// Consecutive events of one aggregate within a batch
struct Run {
    group_id: String,
    aggregate_id: String,
    events: Vec<StoredEvent>,
}

impl Run {
    fn is_for(&self, event: &StoredEvent) -> bool {
        self.group_id == event.group_id && self.aggregate_id == event.aggregate_id
    }
}

/// Models of many aggregates, projected from one event store
pub struct Projection<M> {
    store: Arc<dyn EventStore>,
    factory: ProjectionFactory<M>,
    models: DashMap<(String, String), Arc<Mutex<Tracked<M>>>>,
}

impl<M: ProjectionModel> Projection<M> {
    pub fn new(store: Arc<dyn EventStore>, factory: ProjectionFactory<M>) -> Self {
        Self {
            store,
            factory,
            models: DashMap::new(),
        }
    }

    fn tracked(&self, group_id: &str, aggregate_id: &str) -> CqrsResult<Arc<Mutex<Tracked<M>>>> {
        let key = (group_id.to_string(), aggregate_id.to_string());
        if let Some(tracked) = self.models.get(&key) {
            return Ok(Arc::clone(tracked.value()));
        }
        let model = (self.factory)(group_id, aggregate_id)
            .map_err(|e| e.context("cannot create model"))?;
        let tracked = self.models.entry(key).or_insert_with(|| {
            debug!(device_id = %group_id, aggregate_id = %aggregate_id, "new model");
            Arc::new(Mutex::new(Tracked {
                model,
                version: 0,
                has_base: false,
            }))
        });
        Ok(Arc::clone(tracked.value()))
    }

    /// Apply a run under one lock, returning a reload request on a gap
    fn apply_run(&self, run: Run) -> CqrsResult<Option<Reload>> {
        let model = self.tracked(&run.group_id, &run.aggregate_id)?;
        let mut tracked = model.lock();
        let mut stalled = false;
        for event in &run.events {
            match tracked.step(event) {
                Step::Ignore => {}
                Step::Reload => {
                    if !stalled {
                        debug!(
                            device_id = %event.group_id,
                            aggregate_id = %event.aggregate_id,
                            known = tracked.version,
                            received = event.version,
                            "version gap, model needs reload"
                        );
                    }
                    stalled = true;
                }
                Step::Apply => {
                    tracked.model.apply(event).map_err(|e| {
                        e.context(format_args!(
                            "cannot apply version {} of {}",
                            event.version, event.aggregate_id
                        ))
                    })?;
                    tracked.version = event.version;
                    tracked.has_base = true;
                    if event.is_snapshot {
                        stalled = false;
                    }
                }
            }
        }
        Ok(stalled.then(|| Reload {
            group_id: run.group_id,
            aggregate_id: run.aggregate_id,
            after: tracked.has_base.then_some(tracked.version),
        }))
    }

    /// Apply a batch, returning the aggregates that need a reload
    fn handle_events(&self, iter: &mut EventIter) -> CqrsResult<Vec<Reload>> {
        let mut runs: Vec<Run> = Vec::new();
        for event in iter {
            match runs.last_mut() {
                Some(run) if run.is_for(&event) => run.events.push(event),
                _ => runs.push(Run {
                    group_id: event.group_id.clone(),
                    aggregate_id: event.aggregate_id.clone(),
                    events: vec![event],
                }),
            }
        }

        let mut reloads = Vec::new();
        for run in runs {
            if let Some(reload) = self.apply_run(run)? {
                reloads.push(reload);
            }
        }
        Ok(reloads)
    }

    /// Apply a live batch and reload the aggregates it left with a gap
    pub async fn handle_with_reload(&self, mut iter: EventIter) -> CqrsResult<()> {
        let reloads = self
            .handle_events(&mut iter)
            .map_err(|e| e.context("cannot handle events with reload"))?;
        iter.finish()?;

        let mut from_version = Vec::new();
        let mut from_snapshot = Vec::new();
        for reload in reloads {
            match reload.after {
                Some(version) => from_version.push(VersionQuery::new(
                    reload.group_id,
                    reload.aggregate_id,
                    version,
                )),
                None => from_snapshot.push(SnapshotQuery::aggregate(
                    reload.group_id,
                    reload.aggregate_id,
                )),
            }
        }
        if !from_version.is_empty() {
            self.store
                .load_from_version(&from_version, self)
                .await
                .map_err(|e| e.context("cannot reload events"))?;
        }
        if !from_snapshot.is_empty() {
            self.project(&from_snapshot).await?;
        }
        Ok(())
    }

    /// Replay the store from the latest snapshots matching `queries`
    pub async fn project(&self, queries: &[SnapshotQuery]) -> CqrsResult<()> {
        self.store.load_from_snapshot(queries, self).await
    }

    /// Drop the models matching `queries`
    pub fn forget(&self, queries: &[SnapshotQuery]) {
        self.models
            .retain(|(group_id, aggregate_id), _| !queries.iter().any(|q| q.matches(group_id, aggregate_id)));
    }

    /// Visit the models matching `queries` in key order; no queries visits all
    pub fn models<F>(&self, queries: &[SnapshotQuery], mut visit: F)
    where
        F: FnMut(&M),
    {
        let mut matching: Vec<_> = self
            .models
            .iter()
            .filter(|entry| {
                let (group_id, aggregate_id) = entry.key();
                queries.is_empty() || queries.iter().any(|q| q.matches(group_id, aggregate_id))
            })
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        matching.sort_by(|a, b| a.0.cmp(&b.0));
        for (_, tracked) in matching {
            visit(&tracked.lock().model);
        }
    }

    /// Last applied version of a model that has a base
    pub fn version(&self, group_id: &str, aggregate_id: &str) -> Option<u64> {
        let key = (group_id.to_string(), aggregate_id.to_string());
        let tracked = self.models.get(&key)?;
        let tracked = tracked.lock();
        tracked.has_base.then_some(tracked.version)
    }
}

#[async_trait]
impl<M: ProjectionModel> EventHandler for Projection<M> {
    async fn handle(&self, mut iter: EventIter) -> CqrsResult<()> {
        let reloads = self.handle_events(&mut iter)?;
        if !reloads.is_empty() {
            debug!(pending = reloads.len(), "replayed events still leave gaps");
        }
        iter.finish()
    }
}
