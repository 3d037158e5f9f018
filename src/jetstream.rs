// Copyright (c) 2025 - Cowboy AI, Inc.

//! Stream layout of the resource event log
//!
//! All aggregates share one JetStream stream. Each aggregate writes to its own
//! subject `<prefix>.<group>.<aggregate>` (see [`crate::subjects`]), so the
//! last sequence of that subject doubles as the expected-version token for
//! optimistic concurrency. Purging history below a snapshot is a subject
//! purge, which the stream must therefore allow.
//!
//! ```rust,no_run
//! use cim_resource_aggregate::jetstream::{ensure_event_stream, JetStreamConfig, StorageType};
//!
//! # async fn run() -> cim_resource_aggregate::CqrsResult<()> {
//! let client = async_nats::connect("nats://localhost:4222").await
//!     .map_err(|e| cim_resource_aggregate::CqrsError::NatsConnection(e.to_string()))?;
//! let config = JetStreamConfig::default().with_storage(StorageType::Memory);
//! ensure_event_stream(async_nats::jetstream::new(client), &config).await?;
//! # Ok(())
//! # }
//! ```

use async_nats::jetstream::{self, stream::Stream};
use std::time::Duration;

use crate::errors::{CqrsError, CqrsResult};
use crate::subjects;

const GIB: i64 = 1024 * 1024 * 1024;

/// Settings of the stream that backs `NatsEventStore`
#[derive(Debug, Clone)]
pub struct JetStreamConfig {
    pub stream_name: String,

    /// First token of every aggregate subject
    pub subject_prefix: String,

    /// Events older than this are dropped; `Duration::ZERO` keeps history
    /// until a snapshot purge removes it
    pub max_age: Duration,

    /// Upper bound of the whole log, in bytes
    pub max_bytes: i64,

    /// Window in which a re-sent event id is dropped as a duplicate
    pub duplicate_window: Duration,

    pub storage: StorageType,

    /// Replica count, >1 only on clustered servers
    pub replicas: usize,

    pub retention: RetentionPolicy,
}

impl Default for JetStreamConfig {
    fn default() -> Self {
        Self {
            stream_name: "RESOURCE_EVENTS".to_string(),
            subject_prefix: subjects::EVENT_STORE_ROOT.to_string(),
            max_age: Duration::ZERO,
            max_bytes: 10 * GIB,
            duplicate_window: Duration::from_secs(120),
            storage: StorageType::File,
            replicas: 1,
            retention: RetentionPolicy::Limits,
        }
    }
}

impl JetStreamConfig {
    pub fn with_stream_name(mut self, name: impl Into<String>) -> Self {
        self.stream_name = name.into();
        self
    }

    pub fn with_subject_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subject_prefix = prefix.into();
        self
    }

    pub fn with_storage(mut self, storage: StorageType) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// The single wildcard covering every aggregate subject
    pub fn subjects(&self) -> Vec<String> {
        vec![subjects::all_aggregates_filter(&self.subject_prefix)]
    }

    fn stream_config(&self) -> jetstream::stream::Config {
        jetstream::stream::Config {
            name: self.stream_name.clone(),
            subjects: self.subjects(),
            max_age: self.max_age,
            max_bytes: self.max_bytes,
            duplicate_window: self.duplicate_window,
            storage: self.storage.into(),
            num_replicas: self.replicas,
            retention: self.retention.into(),
            // snapshot purges remove whole subject prefixes
            deny_purge: false,
            ..Default::default()
        }
    }
}

/// Where the stream keeps its messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// Survives server restarts
    File,
    /// Used by tests and throwaway deployments
    Memory,
}

impl From<StorageType> for jetstream::stream::StorageType {
    fn from(storage: StorageType) -> Self {
        match storage {
            StorageType::File => Self::File,
            StorageType::Memory => Self::Memory,
        }
    }
}

/// When the server may discard events on its own
///
/// Work-queue retention is not offered: replay needs every event to stay
/// readable after it was consumed once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Only `max_age` and `max_bytes` remove events
    Limits,
    /// Events are kept while some consumer has interest
    Interest,
}

impl From<RetentionPolicy> for jetstream::stream::RetentionPolicy {
    fn from(retention: RetentionPolicy) -> Self {
        match retention {
            RetentionPolicy::Limits => Self::Limits,
            RetentionPolicy::Interest => Self::Interest,
        }
    }
}

/// Get the event stream, creating it on first use
pub async fn ensure_event_stream(
    jetstream: jetstream::Context,
    config: &JetStreamConfig,
) -> CqrsResult<Stream> {
    jetstream
        .get_or_create_stream(config.stream_config())
        .await
        .map_err(|e| CqrsError::NatsConnection(format!("stream {}: {e}", config.stream_name)))
}
