// Copyright (c) 2025 - Cowboy AI, Inc.
//! Shared NATS connection
//!
//! One connection serves both halves of the system: JetStream for the durable
//! event log and core subjects for the live resource-event bus.

use async_nats::{jetstream, Client, ConnectOptions, Event, Subscriber};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::{CqrsError, CqrsResult};

/// How to reach the NATS servers
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// Seed URLs; the client picks one and learns the rest of the cluster
    pub servers: Vec<String>,
    /// Connection name shown by `nats server report connections`
    pub name: String,
    pub connect_timeout: Duration,
    /// Bound on JetStream API round trips (stream lookups, publish acks)
    pub request_timeout: Duration,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            servers: vec!["nats://localhost:4222".to_string()],
            name: "resource-aggregate".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl NatsConfig {
    pub fn with_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.servers = servers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn connect_options(&self) -> ConnectOptions {
        let name = self.name.clone();
        ConnectOptions::new()
            .name(&self.name)
            .connection_timeout(self.connect_timeout)
            .request_timeout(Some(self.request_timeout))
            .event_callback(move |event| {
                let name = name.clone();
                async move {
                    match event {
                        Event::Connected => info!(client = %name, "NATS connection restored"),
                        other => warn!(client = %name, event = %other, "NATS connection event"),
                    }
                }
            })
    }
}

/// Cloneable handle on the shared connection
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
}

impl NatsClient {
    pub async fn new(config: &NatsConfig) -> CqrsResult<Self> {
        let client =
            async_nats::connect_with_options(config.servers.join(","), config.connect_options())
                .await
                .map_err(|e| {
                    CqrsError::NatsConnection(format!("{}: {e}", config.servers.join(",")))
                })?;

        info!(servers = ?config.servers, client = %config.name, "connected to NATS");
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Fire-and-forget publish of an encoded event batch
    pub async fn publish(&self, subject: &str, payload: Vec<u8>) -> CqrsResult<()> {
        let size = payload.len();
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| CqrsError::NatsPublish(format!("{subject}: {e}")))?;

        debug!(subject = %subject, bytes = size, "published");
        Ok(())
    }

    /// Join `queue` on `subject`; each message goes to one member of the queue
    pub async fn queue_subscribe(&self, subject: &str, queue: &str) -> CqrsResult<Subscriber> {
        let subscriber = self
            .client
            .queue_subscribe(subject.to_string(), queue.to_string())
            .await
            .map_err(|e| CqrsError::NatsSubscribe(format!("{subject}: {e}")))?;

        debug!(subject = %subject, queue = %queue, "subscribed");
        Ok(subscriber)
    }

    /// Wait until the server has seen every publish issued so far
    pub async fn flush(&self) -> CqrsResult<()> {
        self.client
            .flush()
            .await
            .map_err(|e| CqrsError::NatsPublish(e.to_string()))
    }

    pub fn jetstream(&self) -> jetstream::Context {
        jetstream::new(self.client.clone())
    }
}
