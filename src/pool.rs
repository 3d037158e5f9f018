// Copyright (c) 2025 - Cowboy AI, Inc.
//! Task submission
//!
//! Components that dispatch work in the background depend only on
//! [`TaskSubmitter`]: submitted work runs to completion independently of the
//! submitter. Saturation policy belongs to the implementation the caller
//! chooses.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::errors::{CqrsError, CqrsResult};

/// Runs submitted futures in the background
pub trait TaskSubmitter: Send + Sync {
    fn submit(&self, task: BoxFuture<'static, ()>) -> CqrsResult<()>;
}

/// Spawns every task on the current tokio runtime
#[derive(Debug, Clone, Default)]
pub struct TokioSpawner;

impl TaskSubmitter for TokioSpawner {
    fn submit(&self, task: BoxFuture<'static, ()>) -> CqrsResult<()> {
        tokio::spawn(task);
        Ok(())
    }
}

/// Spawns tasks with at most `limit` of them running at once
///
/// Tasks beyond the limit are queued on the semaphore, not rejected.
#[derive(Debug, Clone)]
pub struct BoundedSpawner {
    permits: Arc<Semaphore>,
}

impl BoundedSpawner {
    pub fn new(limit: usize) -> CqrsResult<Self> {
        if limit == 0 {
            return Err(CqrsError::Configuration(
                "bounded spawner needs at least one permit".to_string(),
            ));
        }
        Ok(Self {
            permits: Arc::new(Semaphore::new(limit)),
        })
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl TaskSubmitter for BoundedSpawner {
    fn submit(&self, task: BoxFuture<'static, ()>) -> CqrsResult<()> {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            match permits.acquire_owned().await {
                Ok(_permit) => task.await,
                Err(e) => warn!(error = %e, "task dropped, spawner closed"),
            }
        });
        Ok(())
    }
}
