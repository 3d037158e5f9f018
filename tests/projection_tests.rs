// Copyright (c) 2025 - Cowboy AI, Inc.
//! Integration tests for device projections
//!
//! Events are written through `ResourceAggregate` into the in-memory store
//! and delivered through the in-memory bus, which hands batches over before
//! `publish` returns. Tests verify:
//! 1. Registration replays history and follows live events
//! 2. Reference counting of devices and topics
//! 3. Gap detection and reload from the store
//! 4. Rollback of failed registrations

mod fixtures;

use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use cim_resource_aggregate::aggregate::allow_all;
use cim_resource_aggregate::event_bus::{publish_events, EventSubscriber, Observer};
use cim_resource_aggregate::event_store::EventHandler;
use cim_resource_aggregate::projection::TopicsFn;
use cim_resource_aggregate::{
    subjects, AggregateConfig, CqrsError, CqrsResult, EventStore, MemoryEventBus,
    MemoryEventStore, ResourceAggregate, ResourceCommand, ResourceId, ResourceModel,
    ResourceProjection, StoredEvent,
};

use fixtures::*;

struct Harness {
    store: Arc<MemoryEventStore>,
    bus: MemoryEventBus,
    projection: ResourceProjection<ResourceModel>,
}

impl Harness {
    async fn new() -> Self {
        Self::with_topics(Arc::new(subjects::device_topics)).await
    }

    async fn with_topics(topics_fn: TopicsFn) -> Self {
        let store = Arc::new(MemoryEventStore::new());
        let bus = MemoryEventBus::new();
        let projection = ResourceProjection::new(
            "projection-tests",
            store.clone(),
            &bus,
            ResourceModel::factory(None),
            topics_fn,
        )
        .await
        .unwrap();
        Self {
            store,
            bus,
            projection,
        }
    }

    /// Store a command's events without publishing them
    async fn write(&self, command: &ResourceCommand) -> Vec<StoredEvent> {
        let store: Arc<dyn EventStore> = self.store.clone();
        ResourceAggregate::new(
            command.resource_id().clone(),
            &AggregateConfig::default(),
            store,
            allow_all(),
        )
        .unwrap()
        .handle_command(command)
        .await
        .unwrap()
    }

    async fn publish(&self, events: &[StoredEvent]) {
        let topics = subjects::device_topics(&events[0].group_id);
        publish_events(&self.bus, &topics, events).await.unwrap();
    }

    /// Store and publish
    async fn send(&self, command: &ResourceCommand) -> Vec<StoredEvent> {
        let events = self.write(command).await;
        if !events.is_empty() {
            self.publish(&events).await;
        }
        events
    }

    fn model(&self, resource_id: &ResourceId) -> Option<ResourceModel> {
        self.projection
            .models(&resource_id.device_id, Some(resource_id.aggregate_id().as_str()))
            .into_iter()
            .next()
    }
}

// ============================================================================
// Replay and live delivery
// ============================================================================

#[tokio::test]
async fn test_register_replays_device_history() {
    let h = Harness::new().await;
    h.write(&publish(&light())).await;
    h.write(&publish(&switch())).await;
    h.write(&update(&light(), "c1")).await;

    assert!(h.projection.register(DEVICE_ID_1).await.unwrap());

    let models = h.projection.models(DEVICE_ID_1, None);
    assert_eq!(models.len(), 2);
    let light_model = h.model(&light()).unwrap();
    assert!(light_model.is_published());
    assert_eq!(light_model.version(), Some(1));
    assert!(light_model.pending().contains_key("c1"));
    assert_eq!(light_model.resource().href, HREF_LIGHT);
}

#[tokio::test]
async fn test_live_events_follow_registered_devices_only() {
    let h = Harness::new().await;
    h.projection.register(DEVICE_ID_1).await.unwrap();

    h.send(&publish(&light())).await;
    h.send(&notify_changed(&light(), CONNECTION_A, 7)).await;
    let other = ResourceId::new(DEVICE_ID_2, HREF_LIGHT);
    h.send(&publish(&other)).await;

    let model = h.model(&light()).unwrap();
    assert_eq!(model.version(), Some(1));
    assert_eq!(model.latest_change().unwrap().event_metadata.sequence, 7);
    assert!(h.projection.models(DEVICE_ID_2, None).is_empty());
}

#[tokio::test]
async fn test_redelivered_batch_is_ignored() {
    let h = Harness::new().await;
    h.projection.register(DEVICE_ID_1).await.unwrap();

    let published = h.send(&publish(&light())).await;
    h.send(&update(&light(), "c1")).await;
    h.publish(&published).await;

    let model = h.model(&light()).unwrap();
    assert_eq!(model.version(), Some(1));
    assert_eq!(model.pending().len(), 1);
}

#[tokio::test]
async fn test_gap_reloads_missing_versions() {
    let h = Harness::new().await;
    h.write(&publish(&light())).await;
    h.projection.register(DEVICE_ID_1).await.unwrap();

    // versions 1 and 2 never reach the bus
    h.write(&notify_changed(&light(), CONNECTION_A, 1)).await;
    h.write(&update(&light(), "c1")).await;
    h.send(&notify_changed(&light(), CONNECTION_A, 3)).await;

    let model = h.model(&light()).unwrap();
    assert_eq!(model.version(), Some(3));
    assert!(model.pending().contains_key("c1"));
    assert_eq!(model.latest_change().unwrap().event_metadata.sequence, 3);
}

#[tokio::test]
async fn test_force_update_replays_one_aggregate() {
    let h = Harness::new().await;
    h.projection.register(DEVICE_ID_1).await.unwrap();
    h.write(&publish(&light())).await;
    h.write(&publish(&switch())).await;

    h.projection
        .force_update(DEVICE_ID_1, &light().aggregate_id())
        .await
        .unwrap();

    assert!(h.model(&light()).is_some());
    assert!(h.model(&switch()).is_none());

    let err = h
        .projection
        .force_update(DEVICE_ID_2, &light().aggregate_id())
        .await
        .unwrap_err();
    assert!(matches!(err, CqrsError::NotFound(_)));
}

// ============================================================================
// Reference counting
// ============================================================================

#[tokio::test]
async fn test_registrations_are_reference_counted() {
    let h = Harness::new().await;
    h.write(&publish(&light())).await;

    assert!(h.projection.register(DEVICE_ID_1).await.unwrap());
    assert!(!h.projection.register(DEVICE_ID_1).await.unwrap());
    assert_eq!(h.projection.ref_count(DEVICE_ID_1).await, 2);
    assert_eq!(h.projection.topics().await, subjects::device_topics(DEVICE_ID_1));
    assert_eq!(h.bus.topic_updates(), 1);

    h.projection.unregister(DEVICE_ID_1).await.unwrap();
    assert_eq!(h.projection.ref_count(DEVICE_ID_1).await, 1);
    assert_eq!(h.projection.models(DEVICE_ID_1, None).len(), 1);
    assert_eq!(h.bus.topic_updates(), 1);

    h.projection.unregister(DEVICE_ID_1).await.unwrap();
    assert_eq!(h.projection.ref_count(DEVICE_ID_1).await, 0);
    assert!(h.projection.topics().await.is_empty());
    assert!(h.projection.models(DEVICE_ID_1, None).is_empty());
    assert!(h.bus.subscribed_topics().is_empty());
    assert_eq!(h.bus.topic_updates(), 2);

    let err = h.projection.unregister(DEVICE_ID_1).await.unwrap_err();
    assert!(matches!(err, CqrsError::NotFound(_)));
}

#[tokio::test]
async fn test_shared_topics_outlive_one_device() {
    let topics_fn: TopicsFn = Arc::new(|device_id: &str| {
        let mut topics = subjects::device_topics(device_id);
        topics.push("devices.broadcast".to_string());
        topics
    });
    let h = Harness::with_topics(topics_fn).await;

    h.projection.register(DEVICE_ID_1).await.unwrap();
    h.projection.register(DEVICE_ID_2).await.unwrap();
    let topics = h.projection.topics().await;
    assert_eq!(topics.len(), 3);
    assert_eq!(topics.iter().filter(|t| *t == "devices.broadcast").count(), 1);
    assert_eq!(h.bus.topic_updates(), 2);

    h.projection.unregister(DEVICE_ID_1).await.unwrap();
    let topics = h.projection.topics().await;
    assert!(topics.contains(&"devices.broadcast".to_string()));
    assert!(!topics.contains(&subjects::device_topics(DEVICE_ID_1)[0]));
    assert_eq!(h.bus.topic_updates(), 3);
}

#[tokio::test]
async fn test_identical_topic_sets_update_the_bus_once() {
    let topics_fn: TopicsFn = Arc::new(|_: &str| vec!["devices.broadcast".to_string()]);
    let h = Harness::with_topics(topics_fn).await;

    h.projection.register(DEVICE_ID_1).await.unwrap();
    assert_eq!(h.bus.topic_updates(), 1);
    h.projection.register(DEVICE_ID_2).await.unwrap();
    assert_eq!(h.bus.topic_updates(), 1);

    h.projection.unregister(DEVICE_ID_1).await.unwrap();
    assert_eq!(h.bus.topic_updates(), 1);
    assert_eq!(h.projection.topics().await, vec!["devices.broadcast"]);

    h.projection.unregister(DEVICE_ID_2).await.unwrap();
    assert_eq!(h.bus.topic_updates(), 2);
    assert!(h.bus.subscribed_topics().is_empty());
}

#[tokio::test]
async fn test_reregistration_after_release_replays_again() {
    let h = Harness::new().await;
    h.write(&publish(&light())).await;
    h.projection.register(DEVICE_ID_1).await.unwrap();
    h.projection.unregister(DEVICE_ID_1).await.unwrap();

    h.write(&update(&light(), "c1")).await;
    assert!(h.projection.register(DEVICE_ID_1).await.unwrap());

    assert_eq!(h.model(&light()).unwrap().version(), Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_register_racing_release_keeps_models() {
    let h = Arc::new(Harness::new().await);
    h.write(&publish(&light())).await;

    for _ in 0..50 {
        h.projection.register(DEVICE_ID_1).await.unwrap();
        let leaving = tokio::spawn({
            let h = Arc::clone(&h);
            async move { h.projection.unregister(DEVICE_ID_1).await }
        });
        let joining = tokio::spawn({
            let h = Arc::clone(&h);
            async move { h.projection.register(DEVICE_ID_1).await }
        });
        leaving.await.unwrap().unwrap();
        joining.await.unwrap().unwrap();

        // one registration is live whichever call won
        assert_eq!(h.projection.ref_count(DEVICE_ID_1).await, 1);
        assert!(h.model(&light()).is_some());
        h.projection.unregister(DEVICE_ID_1).await.unwrap();
    }
}

#[tokio::test]
async fn test_empty_device_id_is_invalid() {
    let h = Harness::new().await;
    let err = h.projection.register("").await.unwrap_err();
    assert!(matches!(err, CqrsError::InvalidArgument(_)));
}

// ============================================================================
// Rollback
// ============================================================================

struct RefusingObserver;

#[async_trait]
impl Observer for RefusingObserver {
    async fn set_topics(&self, _topics: Vec<String>) -> CqrsResult<()> {
        Err(CqrsError::NatsSubscribe("permissions violation".to_string()))
    }

    async fn close(&self) -> CqrsResult<()> {
        Ok(())
    }
}

struct RefusingSubscriber;

#[async_trait]
impl EventSubscriber for RefusingSubscriber {
    async fn subscribe(
        &self,
        _subscription_id: &str,
        _topics: Vec<String>,
        _handler: Arc<dyn EventHandler>,
    ) -> CqrsResult<Box<dyn Observer>> {
        Ok(Box::new(RefusingObserver))
    }
}

#[tokio::test]
async fn test_failed_subscription_rolls_back_registration() {
    let store = Arc::new(MemoryEventStore::new());
    let projection = ResourceProjection::new(
        "projection-tests",
        store,
        &RefusingSubscriber,
        ResourceModel::factory(None),
        Arc::new(subjects::device_topics),
    )
    .await
    .unwrap();

    let err = projection.register(DEVICE_ID_1).await.unwrap_err();
    assert!(matches!(err, CqrsError::NatsSubscribe(_)), "got {err}");
    assert_eq!(projection.ref_count(DEVICE_ID_1).await, 0);
    assert!(projection.topics().await.is_empty());

    let err = projection.unregister(DEVICE_ID_1).await.unwrap_err();
    assert!(matches!(err, CqrsError::NotFound(_)));
}
