// Copyright (c) 2025 - Cowboy AI, Inc.
//! Event Bus
//!
//! Persisted events are published to topics; projections subscribe to the
//! topics of the devices they follow.
//!
//! # Contract
//!
//! ```text
//! EventPublisher::publish(topics, group_id, aggregate_id, events)
//! EventSubscriber::subscribe(subscription_id, topics, handler) ─► Observer
//! Observer::set_topics(topics) / Observer::close()
//! ```
//!
//! Each publish delivers one batch per subscription. Subscriptions sharing a
//! subscription id form a queue group: a batch reaches only one of them.
//! Delivery is at-least-once from the handler's point of view, so handlers
//! tolerate duplicates and reordering.

pub mod memory;
pub mod nats;

pub use memory::MemoryEventBus;
pub use nats::NatsEventBus;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use crate::errors::CqrsResult;
use crate::event_store::EventHandler;
use crate::events::StoredEvent;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        topics: &[String],
        group_id: &str,
        aggregate_id: &str,
        events: &[StoredEvent],
    ) -> CqrsResult<()>;
}

/// Live subscription handle
#[async_trait]
pub trait Observer: Send + Sync {
    /// Replace the subscribed topic set
    async fn set_topics(&self, topics: Vec<String>) -> CqrsResult<()>;

    async fn close(&self) -> CqrsResult<()>;
}

#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn subscribe(
        &self,
        subscription_id: &str,
        topics: Vec<String>,
        handler: Arc<dyn EventHandler>,
    ) -> CqrsResult<Box<dyn Observer>>;
}

/// Publish persisted events of one aggregate
///
/// Nothing is published for an empty batch. A failure is logged and
/// returned; the events stay durably stored regardless.
pub async fn publish_events(
    publisher: &dyn EventPublisher,
    topics: &[String],
    events: &[StoredEvent],
) -> CqrsResult<()> {
    let Some(first) = events.first() else {
        return Ok(());
    };
    publisher
        .publish(topics, &first.group_id, &first.aggregate_id, events)
        .await
        .inspect_err(|e| {
            error!(
                device_id = %first.group_id,
                aggregate_id = %first.aggregate_id,
                error = %e,
                "cannot publish events"
            )
        })
}
