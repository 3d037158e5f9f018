// Copyright (c) 2025 - Cowboy AI, Inc.
//! Tests for the NATS backed event store and event bus
//!
//! Configuration and error tests run everywhere. Tests marked `#[ignore]`
//! need a JetStream enabled server at `nats://localhost:4222`:
//!
//! ```text
//! nats-server -js
//! cargo test --test nats_tests -- --ignored
//! ```

mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use uuid::Uuid;

use cim_resource_aggregate::aggregate::allow_all;
use cim_resource_aggregate::event_store::{EventCollector, SnapshotQuery, VersionQuery};
use cim_resource_aggregate::jetstream::{JetStreamConfig, StorageType};
use cim_resource_aggregate::{
    AggregateConfig, CqrsError, EventStore, MemoryEventStore, NatsClient, NatsConfig,
    NatsEventBus, NatsEventStore, NotificationContainers, Operator, ResourceAggregate,
    ResourceId, ResourceModel, ResourceProjection, SaveStatus,
};

use fixtures::*;

/// User Story: Connection Configuration
///
/// As an operator
/// I want sensible connection defaults
/// So that a local development server works without setup
#[test]
fn test_nats_config_default() {
    let config = NatsConfig::default();

    assert_eq!(config.servers, vec!["nats://localhost:4222"]);
    assert_eq!(config.name, "resource-aggregate");
    assert_eq!(config.connect_timeout, Duration::from_secs(10));
    assert_eq!(config.request_timeout, Duration::from_secs(5));
}

#[test]
fn test_nats_config_builders() {
    let config = NatsConfig::default()
        .with_servers(["nats://a:4222", "nats://b:4222"])
        .with_name("projector-1");

    assert_eq!(config.servers, vec!["nats://a:4222", "nats://b:4222"]);
    assert_eq!(config.name, "projector-1");
}

#[test]
fn test_jetstream_config_captures_every_aggregate() {
    let config = JetStreamConfig::default().with_subject_prefix("test-events");

    assert_eq!(config.stream_name, "RESOURCE_EVENTS");
    assert_eq!(config.subjects(), vec!["test-events.>"]);
}

/// User Story: Error Reporting
///
/// As a developer
/// I want clear infrastructure errors
/// So that I can tell transport failures from domain failures
#[test]
fn test_infrastructure_error_messages() {
    let conn_err = CqrsError::NatsConnection("connection refused".to_string());
    let pub_err = CqrsError::NatsPublish("publish timeout".to_string());
    let sub_err = CqrsError::NatsSubscribe("invalid subject".to_string());
    let ser_err = CqrsError::Serialization("invalid JSON".to_string());

    assert_eq!(conn_err.to_string(), "NATS connection error: connection refused");
    assert_eq!(pub_err.to_string(), "NATS publish error: publish timeout");
    assert_eq!(sub_err.to_string(), "NATS subscribe error: invalid subject");
    assert_eq!(ser_err.to_string(), "Serialization error: invalid JSON");
}

// Integration tests that require NATS server running

fn isolated_stream() -> JetStreamConfig {
    let suffix = Uuid::now_v7().simple().to_string();
    JetStreamConfig::default()
        .with_stream_name(format!("TEST_{suffix}"))
        .with_subject_prefix(format!("test-{suffix}"))
        .with_storage(StorageType::Memory)
}

async fn connect() -> NatsClient {
    NatsClient::new(&NatsConfig::default()).await.unwrap()
}

#[tokio::test]
#[ignore = "requires NATS server"]
async fn test_jetstream_store_detects_conflicts() {
    let client = connect().await;
    let store = NatsEventStore::connect_with_config(&client, isolated_stream())
        .await
        .unwrap();
    let events = aggregate_events().await;
    let (group, aggregate) = (&events[0].group_id, &events[0].aggregate_id);

    assert_eq!(store.save(group, aggregate, &events[..1]).await.unwrap(), SaveStatus::Ok);
    assert_eq!(
        store.save(group, aggregate, &events[..1]).await.unwrap(),
        SaveStatus::ConcurrencyException
    );
    assert_eq!(store.save(group, aggregate, &events[1..]).await.unwrap(), SaveStatus::Ok);

    let collector = EventCollector::new();
    store
        .load_from_snapshot(&[SnapshotQuery::group(DEVICE_ID_1)], &collector)
        .await
        .unwrap();
    let versions: Vec<u64> = collector.events().iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![0, 1, 2]);
}

#[tokio::test]
#[ignore = "requires NATS server"]
async fn test_jetstream_snapshot_purges_older_history() {
    let client = connect().await;
    let store: Arc<dyn EventStore> = Arc::new(
        NatsEventStore::connect_with_config(&client, isolated_stream())
            .await
            .unwrap(),
    );
    let agg = ResourceAggregate::new(
        light(),
        &AggregateConfig::default().with_snapshot_threshold(2),
        store.clone(),
        allow_all(),
    )
    .unwrap();

    agg.handle_command(&publish(&light())).await.unwrap();
    agg.handle_command(&notify_changed(&light(), CONNECTION_A, 1)).await.unwrap();
    let events = agg
        .handle_command(&notify_changed(&light(), CONNECTION_A, 2))
        .await
        .unwrap();
    assert!(events[0].is_snapshot);

    let collector = EventCollector::new();
    store
        .load_up_to_version(
            &[VersionQuery::new(DEVICE_ID_1, light().aggregate_id(), 10)],
            &collector,
        )
        .await
        .unwrap();
    let versions: Vec<u64> = collector.events().iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![2, 3]);
}

#[tokio::test]
#[ignore = "requires NATS server"]
async fn test_jetstream_racing_batches_leave_one_whole_batch() {
    let client = connect().await;
    let store = NatsEventStore::connect_with_config(&client, isolated_stream())
        .await
        .unwrap();
    let events = aggregate_events().await;
    let (group, aggregate) = (&events[0].group_id, &events[0].aggregate_id);

    let (long, short) = tokio::join!(
        store.save(group, aggregate, &events[..3]),
        store.save(group, aggregate, &events[..1]),
    );
    let (long, short) = (long.unwrap(), short.unwrap());
    assert_ne!(long.is_conflict(), short.is_conflict());

    let collector = EventCollector::new();
    store.load_from_snapshot(&[], &collector).await.unwrap();
    let versions: Vec<u64> = collector.events().iter().map(|e| e.version).collect();
    let expected = if long.is_conflict() { vec![0] } else { vec![0, 1, 2] };
    assert_eq!(versions, expected);
}

#[tokio::test]
#[ignore = "requires NATS server"]
async fn test_jetstream_group_replay_stays_within_device() {
    let client = connect().await;
    let store: Arc<dyn EventStore> = Arc::new(
        NatsEventStore::connect_with_config(&client, isolated_stream())
            .await
            .unwrap(),
    );
    let dotted = ResourceId::new("a.b", HREF_LIGHT);
    let underscored = ResourceId::new("a_b", HREF_LIGHT);
    for resource_id in [&dotted, &underscored] {
        ResourceAggregate::new(resource_id.clone(), &AggregateConfig::default(), store.clone(), allow_all())
            .unwrap()
            .handle_command(&publish(resource_id))
            .await
            .unwrap();
    }

    let collector = EventCollector::new();
    store
        .load_from_snapshot(&[SnapshotQuery::group("a.b")], &collector)
        .await
        .unwrap();

    let events = collector.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].aggregate_id, dotted.aggregate_id());
}

/// Events of one aggregate produced against the in-memory store
async fn aggregate_events() -> Vec<cim_resource_aggregate::StoredEvent> {
    let memory: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
    let agg = ResourceAggregate::new(light(), &AggregateConfig::default(), memory, allow_all()).unwrap();
    let mut events = agg.handle_command(&publish(&light())).await.unwrap();
    events.extend(agg.handle_command(&update(&light(), "c1")).await.unwrap());
    events.extend(agg.handle_command(&confirm_update(&light(), "c1")).await.unwrap());
    events
}

#[tokio::test]
#[ignore = "requires NATS server"]
async fn test_update_resource_round_trip_over_nats() {
    let client = connect().await;
    let store = Arc::new(
        NatsEventStore::connect_with_config(&client, isolated_stream())
            .await
            .unwrap(),
    );
    let bus = NatsEventBus::new(client.clone());
    let notifications = Arc::new(NotificationContainers::new());

    let projection = ResourceProjection::new(
        "nats-tests",
        store.clone(),
        &bus,
        ResourceModel::factory(Some(notifications.clone())),
        Arc::new(cim_resource_aggregate::subjects::device_topics),
    )
    .await
    .unwrap();
    assert!(projection.register(DEVICE_ID_1).await.unwrap());
    client.flush().await.unwrap();

    let operator = Operator::new(
        store.clone(),
        Arc::new(bus.clone()),
        notifications,
        AggregateConfig::default(),
    )
    .with_timeout(Duration::from_secs(5));
    operator.handle(&publish(&light())).await.unwrap();

    let request = update_request(&light(), "nats-c1");
    let confirm = confirm_update(&light(), "nats-c1");
    let (updated, confirmed) = tokio::join!(operator.update_resource(request), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        operator.handle(&confirm).await
    });

    confirmed.unwrap();
    let updated = updated.unwrap();
    assert_eq!(updated.audit_context.correlation_id, "nats-c1");

    projection.unregister(DEVICE_ID_1).await.unwrap();
    projection.close().await.unwrap();
}
