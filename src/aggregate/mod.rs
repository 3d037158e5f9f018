// Copyright (c) 2025 - Cowboy AI, Inc.
//! Event-Sourced Aggregates
//!
//! This module provides the aggregate pattern for the resource engine:
//! - Models are rebuilt by folding their own events, starting at the latest
//!   snapshot
//! - Commands are decided against the rebuilt model at an explicit version
//! - New events are appended with optimistic concurrency; a conflict reloads
//!   the model and recomputes the command
//!
//! # Command Flow
//!
//! ```text
//! Command ─► load_from_snapshot ─► model ─► [snapshot?] ─► handle_command ─► save
//!                  ▲                                                         │
//!                  └──────────────── ConcurrencyException ◄──────────────────┘
//! ```
//!
//! # Versioning
//!
//! The next version is `last + 1`, or `0` for an aggregate without events.
//! When at least `num_events_in_snapshot` events were replayed after the last
//! snapshot and the model agrees, a snapshot is saved at the next version and
//! the command events follow it.
//!
//! # Time as Parameter
//!
//! Models never call `Utc::now()`; every command carries its own timestamp.

pub mod commands;
pub mod content;
pub mod resource_state;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::AggregateConfig;
use crate::errors::{CqrsError, CqrsResult};
use crate::event_store::{EventHandler, EventStore, SnapshotQuery, VersionQuery};
use crate::events::{EventIter, ResourceEvent, ResourceId, StoredEvent};

pub use commands::*;
pub use content::{convert_content, ContentFormat};
pub use resource_state::{allow_all, ResourceState, ResourceStateView, VerifyAccess};
pub use retry::RetryPolicy;

/// Model driven by an [`Aggregate`]
pub trait AggregateModel: Send + 'static {
    type Command: Send + Sync;

    /// Fold one stored event into the model
    fn apply(&mut self, event: &StoredEvent) -> CqrsResult<()>;

    /// Decide a command at `new_version`
    ///
    /// Returned events are already applied to the model. An empty result is
    /// a valid outcome and stores nothing.
    fn handle_command(
        &mut self,
        command: &Self::Command,
        new_version: u64,
    ) -> CqrsResult<Vec<ResourceEvent>>;

    /// Snapshot of the current state at `version`, `None` when not eligible
    fn take_snapshot(&self, version: u64) -> Option<ResourceEvent>;
}

/// Creates a fresh model for every attempt
pub type ModelFactory<M> = Arc<dyn Fn() -> CqrsResult<M> + Send + Sync>;

struct Loaded<M> {
    model: M,
    last_version: Option<u64>,
    since_snapshot: u64,
}

impl<M> Loaded<M> {
    fn next_version(&self) -> u64 {
        self.last_version.map_or(0, |v| v + 1)
    }
}

struct Replay<M> {
    loaded: Mutex<Loaded<M>>,
}

#[async_trait]
impl<M: AggregateModel> EventHandler for Replay<M> {
    async fn handle(&self, mut iter: EventIter) -> CqrsResult<()> {
        {
            let mut loaded = self.loaded.lock();
            for event in iter.by_ref() {
                loaded.model.apply(&event)?;
                loaded.last_version = Some(event.version);
                if event.is_snapshot {
                    loaded.since_snapshot = 0;
                } else {
                    loaded.since_snapshot += 1;
                }
            }
        }
        iter.finish()
    }
}

/// Command handling for one `(group_id, aggregate_id)`
pub struct Aggregate<M: AggregateModel> {
    group_id: String,
    aggregate_id: String,
    num_events_in_snapshot: u64,
    retry: RetryPolicy,
    store: Arc<dyn EventStore>,
    factory: ModelFactory<M>,
}

impl<M: AggregateModel> Aggregate<M> {
    pub fn new(
        group_id: impl Into<String>,
        aggregate_id: impl Into<String>,
        config: &AggregateConfig,
        store: Arc<dyn EventStore>,
        factory: ModelFactory<M>,
    ) -> CqrsResult<Self> {
        let group_id = group_id.into();
        let aggregate_id = aggregate_id.into();
        if group_id.is_empty() {
            return Err(CqrsError::InvalidArgument(
                "cannot create aggregate: invalid group id".to_string(),
            ));
        }
        if aggregate_id.is_empty() {
            return Err(CqrsError::InvalidArgument(
                "cannot create aggregate: invalid aggregate id".to_string(),
            ));
        }
        if config.num_events_in_snapshot < 1 {
            return Err(CqrsError::InvalidArgument(
                "cannot create aggregate: num_events_in_snapshot < 1".to_string(),
            ));
        }
        Ok(Self {
            group_id,
            aggregate_id,
            num_events_in_snapshot: config.num_events_in_snapshot,
            retry: config.retry,
            store,
            factory,
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    async fn load(&self) -> CqrsResult<Loaded<M>> {
        let replay = Replay {
            loaded: Mutex::new(Loaded {
                model: (self.factory)()?,
                last_version: None,
                since_snapshot: 0,
            }),
        };
        self.store
            .load_from_snapshot(
                &[SnapshotQuery::aggregate(&self.group_id, &self.aggregate_id)],
                &replay,
            )
            .await
            .map_err(|e| e.context("cannot load aggregate model"))?;
        Ok(replay.loaded.into_inner())
    }

    /// One attempt; `None` signals a concurrency conflict
    async fn try_handle(
        &self,
        command: &M::Command,
        mut loaded: Loaded<M>,
    ) -> CqrsResult<Option<Vec<StoredEvent>>> {
        let mut new_version = loaded.next_version();
        let mut saved = Vec::new();

        if loaded.since_snapshot >= self.num_events_in_snapshot {
            if let Some(snapshot) = loaded.model.take_snapshot(new_version) {
                let snapshot = StoredEvent::new(snapshot);
                let status = self
                    .store
                    .save(&self.group_id, &self.aggregate_id, std::slice::from_ref(&snapshot))
                    .await
                    .map_err(|e| e.context("cannot save snapshot"))?;
                if status.is_conflict() {
                    return Ok(None);
                }
                debug!(
                    aggregate_id = %self.aggregate_id,
                    version = new_version,
                    "snapshot saved"
                );
                new_version += 1;
                saved.push(snapshot);
            }
        }

        let events: Vec<StoredEvent> = loaded
            .model
            .handle_command(command, new_version)?
            .into_iter()
            .map(StoredEvent::new)
            .collect();

        if !events.is_empty() {
            let status = self
                .store
                .save(&self.group_id, &self.aggregate_id, &events)
                .await
                .map_err(|e| e.context("cannot save events"))?;
            if status.is_conflict() {
                return Ok(None);
            }
        }

        saved.extend(events);
        Ok(Some(saved))
    }

    /// Decide and persist a command, retrying on concurrency conflicts
    ///
    /// Returns every event written, a snapshot first when one was taken.
    pub async fn handle_command(&self, command: &M::Command) -> CqrsResult<Vec<StoredEvent>> {
        let mut retry = 0;
        loop {
            if retry > 0 {
                self.retry.wait(retry).await.map_err(|e| {
                    e.context(format_args!("aggregate {} cannot handle command", self.aggregate_id))
                })?;
            }
            let loaded = self.load().await?;
            if let Some(events) = self.try_handle(command, loaded).await? {
                return Ok(events);
            }
            retry += 1;
            debug!(
                aggregate_id = %self.aggregate_id,
                retry,
                "concurrent write detected, reloading"
            );
        }
    }

    /// Current model rebuilt from the store
    pub async fn load_model(&self) -> CqrsResult<M> {
        Ok(self.load().await?.model)
    }
}

/// Aggregate of one device resource
///
/// Besides handling commands it purges history made redundant by a freshly
/// saved snapshot.
pub struct ResourceAggregate {
    resource_id: ResourceId,
    store: Arc<dyn EventStore>,
    inner: Aggregate<ResourceState>,
}

impl ResourceAggregate {
    pub fn new(
        resource_id: ResourceId,
        config: &AggregateConfig,
        store: Arc<dyn EventStore>,
        verify_access: VerifyAccess,
    ) -> CqrsResult<Self> {
        let factory: ModelFactory<ResourceState> =
            Arc::new(move || Ok(ResourceState::new(verify_access.clone())));
        let inner = Aggregate::new(
            resource_id.device_id.clone(),
            resource_id.aggregate_id(),
            config,
            store.clone(),
            factory,
        )?;
        Ok(Self {
            resource_id,
            store,
            inner,
        })
    }

    pub fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }

    pub async fn handle_command(&self, command: &ResourceCommand) -> CqrsResult<Vec<StoredEvent>> {
        if command.resource_id() != &self.resource_id {
            return Err(CqrsError::InvalidArgument(format!(
                "command for {} sent to aggregate of {}",
                command.resource_id(),
                self.resource_id
            )));
        }
        let events = self.inner.handle_command(command).await?;
        self.clean_up_to_snapshot(&events).await;
        Ok(events)
    }

    /// Current state rebuilt from the store
    pub async fn state(&self) -> CqrsResult<ResourceState> {
        self.inner.load_model().await
    }

    async fn clean_up_to_snapshot(&self, events: &[StoredEvent]) {
        let Some(snapshot) = events.iter().rev().find(|e| e.is_snapshot) else {
            return;
        };
        let query = VersionQuery::new(&snapshot.group_id, &snapshot.aggregate_id, snapshot.version);
        match self.store.remove_up_to_version(&[query]).await {
            Ok(()) | Err(CqrsError::Unimplemented(_)) => {}
            Err(err) => warn!(
                resource_id = %self.resource_id,
                version = snapshot.version,
                error = %err,
                "cannot purge events below snapshot"
            ),
        }
    }
}
