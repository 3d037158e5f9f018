// Copyright (c) 2025 - Cowboy AI, Inc.
//! Retry policy for optimistic concurrency conflicts

use std::time::Duration;

use crate::errors::{CqrsError, CqrsResult};

/// How often and how fast a conflicting command is recomputed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub limit: u32,

    /// Pause before each retry
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 8,
            delay: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(limit: u32, delay: Duration) -> Self {
        Self { limit, delay }
    }

    /// Wait before retry number `retry` (1-based), or fail once the limit is reached
    pub async fn wait(&self, retry: u32) -> CqrsResult<()> {
        if retry > self.limit {
            return Err(CqrsError::RetryExhausted(format!(
                "gave up after {} retries",
                self.limit
            )));
        }
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}
