// Copyright (c) 2025 - Cowboy AI, Inc.
//! Backup-then-purge maintenance of old history
//!
//! Writers queue a [`MaintenanceTask`] for an aggregate once a snapshot makes
//! the older events redundant. [`perform_maintenance`] later drains the queue:
//! it loads the history below the task version, hands it to a
//! [`BackupHandler`], and purges it only after the backup succeeded.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{EventCollector, EventStore, VersionQuery};
use crate::errors::CqrsResult;
use crate::events::StoredEvent;

/// Queued request to back up and purge history below `version`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceTask {
    pub group_id: String,
    pub aggregate_id: String,
    pub version: u64,
}

impl MaintenanceTask {
    pub fn new(group_id: impl Into<String>, aggregate_id: impl Into<String>, version: u64) -> Self {
        Self {
            group_id: group_id.into(),
            aggregate_id: aggregate_id.into(),
            version,
        }
    }

    fn query(&self) -> VersionQuery {
        VersionQuery::new(&self.group_id, &self.aggregate_id, self.version)
    }
}

/// Queue of maintenance tasks kept next to the events
///
/// Inserting a task for an aggregate that already has one keeps the higher
/// version.
#[async_trait]
pub trait MaintenanceStore: Send + Sync {
    async fn insert_task(&self, task: MaintenanceTask) -> CqrsResult<()>;

    async fn query_tasks(&self, limit: usize) -> CqrsResult<Vec<MaintenanceTask>>;

    /// Remove the task unless a newer one replaced it meanwhile
    async fn remove_task(&self, task: &MaintenanceTask) -> CqrsResult<()>;
}

/// Receives history right before it is purged
#[async_trait]
pub trait BackupHandler: Send + Sync {
    async fn backup(&self, task: &MaintenanceTask, events: Vec<StoredEvent>) -> CqrsResult<()>;
}

/// Process up to `limit` queued tasks, returns how many were completed
///
/// Stops at the first failure; the failed task stays queued.
pub async fn perform_maintenance<S>(
    store: &S,
    limit: usize,
    backup: &dyn BackupHandler,
) -> CqrsResult<usize>
where
    S: EventStore + MaintenanceStore + ?Sized,
{
    let tasks = store.query_tasks(limit).await?;
    let mut done = 0;

    for task in tasks {
        let collector = EventCollector::new();
        store
            .load_up_to_version(&[task.query()], &collector)
            .await?;
        let events = collector.take();
        debug!(
            aggregate_id = %task.aggregate_id,
            version = task.version,
            count = events.len(),
            "backing up history"
        );

        backup.backup(&task, events).await?;
        store.remove_up_to_version(&[task.query()]).await?;
        store.remove_task(&task).await?;
        done += 1;
    }

    if done > 0 {
        info!(tasks = done, "maintenance completed");
    }
    Ok(done)
}
