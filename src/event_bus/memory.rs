// Copyright (c) 2025 - Cowboy AI, Inc.
//! In-process event bus
//!
//! Delivers batches inline, before `publish` returns, which keeps tests
//! deterministic. Topic patterns follow NATS wildcard rules.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, error};

use super::{EventPublisher, EventSubscriber, Observer};
use crate::errors::CqrsResult;
use crate::event_store::EventHandler;
use crate::events::{EventIter, StoredEvent};
use crate::subjects::subject_matches;

struct Subscription {
    subscription_id: String,
    topics: RwLock<Vec<String>>,
    handler: Arc<dyn EventHandler>,
}

impl Subscription {
    fn wants(&self, topics: &[String]) -> bool {
        let patterns = self.topics.read();
        patterns
            .iter()
            .any(|pattern| topics.iter().any(|topic| subject_matches(pattern, topic)))
    }
}

#[derive(Default)]
struct Shared {
    next_id: AtomicU64,
    subscriptions: DashMap<u64, Arc<Subscription>>,
    topic_updates: AtomicUsize,
}

/// In-process publish/subscribe
#[derive(Clone, Default)]
pub struct MemoryEventBus {
    shared: Arc<Shared>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open subscriptions
    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.len()
    }

    /// How many times an observer replaced its topic set
    pub fn topic_updates(&self) -> usize {
        self.shared.topic_updates.load(Ordering::SeqCst)
    }

    /// Topics currently subscribed across all observers
    pub fn subscribed_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .shared
            .subscriptions
            .iter()
            .flat_map(|s| s.topics.read().clone())
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish(
        &self,
        topics: &[String],
        group_id: &str,
        aggregate_id: &str,
        events: &[StoredEvent],
    ) -> CqrsResult<()> {
        let mut ids: Vec<u64> = self.shared.subscriptions.iter().map(|s| *s.key()).collect();
        ids.sort_unstable();

        let mut served_queues = HashSet::new();
        let mut targets = Vec::new();
        for id in ids {
            let Some(subscription) = self.shared.subscriptions.get(&id).map(|s| Arc::clone(s.value()))
            else {
                continue;
            };
            if subscription.wants(topics)
                && served_queues.insert(subscription.subscription_id.clone())
            {
                targets.push(subscription);
            }
        }

        debug!(
            device_id = %group_id,
            aggregate_id = %aggregate_id,
            events = events.len(),
            subscribers = targets.len(),
            "publishing events"
        );
        for subscription in targets {
            let batch = EventIter::from_events(events.to_vec());
            if let Err(e) = subscription.handler.handle(batch).await {
                error!(
                    subscription_id = %subscription.subscription_id,
                    error = %e,
                    "subscriber failed to handle events"
                );
            }
        }
        Ok(())
    }
}

struct MemoryObserver {
    id: u64,
    shared: Arc<Shared>,
}

#[async_trait]
impl Observer for MemoryObserver {
    async fn set_topics(&self, topics: Vec<String>) -> CqrsResult<()> {
        if let Some(subscription) = self.shared.subscriptions.get(&self.id) {
            *subscription.topics.write() = topics;
        }
        self.shared.topic_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> CqrsResult<()> {
        self.shared.subscriptions.remove(&self.id);
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for MemoryEventBus {
    async fn subscribe(
        &self,
        subscription_id: &str,
        topics: Vec<String>,
        handler: Arc<dyn EventHandler>,
    ) -> CqrsResult<Box<dyn Observer>> {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        self.shared.subscriptions.insert(
            id,
            Arc::new(Subscription {
                subscription_id: subscription_id.to_string(),
                topics: RwLock::new(topics),
                handler,
            }),
        );
        Ok(Box::new(MemoryObserver {
            id,
            shared: Arc::clone(&self.shared),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::EventCollector;
    use crate::events::{AuditContext, EventMetadata, ResourceEvent, ResourceId, ResourceUnpublished};
    use chrono::{DateTime, Utc};

    fn event() -> StoredEvent {
        let ts = DateTime::parse_from_rfc3339("2026-01-19T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        StoredEvent::new(ResourceEvent::ResourceUnpublished(ResourceUnpublished {
            resource_id: ResourceId::new("dev-1", "/a"),
            audit_context: AuditContext::default(),
            event_metadata: EventMetadata::new("c", 0, 1, ts),
        }))
    }

    #[tokio::test]
    async fn test_queue_group_receives_once() {
        let bus = MemoryEventBus::new();
        let first = Arc::new(EventCollector::new());
        let second = Arc::new(EventCollector::new());
        let other = Arc::new(EventCollector::new());
        let _a = bus
            .subscribe("projection", vec!["devices.>".to_string()], first.clone())
            .await
            .unwrap();
        let _b = bus
            .subscribe("projection", vec!["devices.>".to_string()], second.clone())
            .await
            .unwrap();
        let _c = bus
            .subscribe("audit", vec!["devices.dev-1.resources".to_string()], other.clone())
            .await
            .unwrap();

        let topics = vec!["devices.dev-1.resources".to_string()];
        bus.publish(&topics, "dev-1", "agg", &[event()]).await.unwrap();

        assert_eq!(first.events().len() + second.events().len(), 1);
        assert_eq!(other.events().len(), 1);
    }

    #[tokio::test]
    async fn test_set_topics_and_close() {
        let bus = MemoryEventBus::new();
        let collector = Arc::new(EventCollector::new());
        let observer = bus.subscribe("p", vec![], collector.clone()).await.unwrap();
        let topics = vec!["devices.dev-1.resources".to_string()];

        bus.publish(&topics, "dev-1", "agg", &[event()]).await.unwrap();
        assert!(collector.events().is_empty());

        observer.set_topics(topics.clone()).await.unwrap();
        bus.publish(&topics, "dev-1", "agg", &[event()]).await.unwrap();
        assert_eq!(collector.events().len(), 1);
        assert_eq!(bus.topic_updates(), 1);

        observer.close().await.unwrap();
        assert_eq!(bus.subscription_count(), 0);
    }
}
