// Copyright (c) 2025 - Cowboy AI, Inc.
//! Configuration
//!
//! Plain structs with defaults and `with_*` builders. [`ResourceAggregateConfig::from_env`]
//! reads the few knobs a deployment usually overrides:
//!
//! | Variable             | Field                                  | Default                 |
//! |----------------------|----------------------------------------|-------------------------|
//! | `NATS_URL`           | `nats.servers` (comma separated)       | `nats://localhost:4222` |
//! | `NATS_STREAM`        | `jetstream.stream_name`                | `RESOURCE_EVENTS`       |
//! | `SNAPSHOT_THRESHOLD` | `aggregate.num_events_in_snapshot`     | `16`                    |
//! | `RETRY_LIMIT`        | `aggregate.retry.limit`                | `8`                     |

use std::str::FromStr;

use crate::aggregate::RetryPolicy;
use crate::errors::{CqrsError, CqrsResult};

pub use crate::jetstream::JetStreamConfig;
pub use crate::nats::NatsConfig;

/// Command handling knobs shared by every aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateConfig {
    /// Events replayed after the last snapshot before a new one is taken
    pub num_events_in_snapshot: u64,

    pub retry: RetryPolicy,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            num_events_in_snapshot: 16,
            retry: RetryPolicy::default(),
        }
    }
}

impl AggregateConfig {
    pub fn with_snapshot_threshold(mut self, num_events_in_snapshot: u64) -> Self {
        self.num_events_in_snapshot = num_events_in_snapshot;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Everything a resource engine process needs
#[derive(Debug, Clone, Default)]
pub struct ResourceAggregateConfig {
    pub nats: NatsConfig,
    pub jetstream: JetStreamConfig,
    pub aggregate: AggregateConfig,
}

fn parse<T: FromStr>(name: &str, value: &str) -> CqrsResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| CqrsError::Configuration(format!("invalid {name} '{value}': {e}")))
}

impl ResourceAggregateConfig {
    /// Load from the process environment
    pub fn from_env() -> CqrsResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from any variable source, unset variables keep their default
    pub fn from_lookup<F>(lookup: F) -> CqrsResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("NATS_URL") {
            let servers: Vec<&str> = url.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
            if servers.is_empty() {
                return Err(CqrsError::Configuration("NATS_URL is empty".to_string()));
            }
            config.nats = config.nats.with_servers(servers);
        }
        if let Some(stream) = lookup("NATS_STREAM") {
            if stream.trim().is_empty() {
                return Err(CqrsError::Configuration("NATS_STREAM is empty".to_string()));
            }
            config.jetstream = config.jetstream.with_stream_name(stream.trim());
        }
        if let Some(threshold) = lookup("SNAPSHOT_THRESHOLD") {
            let threshold: u64 = parse("SNAPSHOT_THRESHOLD", &threshold)?;
            if threshold == 0 {
                return Err(CqrsError::Configuration(
                    "SNAPSHOT_THRESHOLD must be at least 1".to_string(),
                ));
            }
            config.aggregate.num_events_in_snapshot = threshold;
        }
        if let Some(limit) = lookup("RETRY_LIMIT") {
            config.aggregate.retry.limit = parse("RETRY_LIMIT", &limit)?;
        }

        Ok(config)
    }
}
