// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for Resource Histories
//!
//! Random command sequences are run against the resource model and the
//! aggregate. The properties checked here must hold for every sequence:
//!
//! 1. **Snapshot Equivalence**: state restored from any eligible snapshot
//!    plus the events after it equals the state of the full replay
//! 2. **Gap-Free Versions**: stored versions ascend by one, even across
//!    snapshots and purges
//! 3. **Redelivery Tolerance**: a projection fed duplicated and reordered
//!    batches ends at the same state as the aggregate

use std::sync::Arc;

use proptest::prelude::*;
use proptest::sample::Index;

use cim_resource_aggregate::aggregate::{allow_all, AggregateModel, ResourceState};
use cim_resource_aggregate::{
    AggregateConfig, EventIter, EventStore, MemoryEventStore, Projection, ResourceAggregate,
    ResourceCommand, ResourceEvent, ResourceModel, StoredEvent,
};

use crate::fixtures::*;

// ============================================================================
// Command Generation
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Change { connection: usize, sequence: u64 },
    Update(u8),
    Confirm(u8),
    Unpublish,
    Publish,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..2, 0u64..8)
            .prop_map(|(connection, sequence)| Op::Change { connection, sequence }),
        2 => (0u8..3).prop_map(Op::Update),
        2 => (0u8..3).prop_map(Op::Confirm),
        1 => Just(Op::Unpublish),
        1 => Just(Op::Publish),
    ]
}

fn command(op: &Op) -> ResourceCommand {
    let resource_id = light();
    match op {
        Op::Change {
            connection,
            sequence,
        } => notify_changed(&resource_id, [CONNECTION_A, CONNECTION_B][*connection], *sequence),
        Op::Update(c) => update(&resource_id, &format!("c{c}")),
        Op::Confirm(c) => confirm_update(&resource_id, &format!("c{c}")),
        Op::Unpublish => unpublish(&resource_id),
        Op::Publish => publish(&resource_id),
    }
}

fn commands(ops: &[Op]) -> Vec<ResourceCommand> {
    std::iter::once(publish(&light()))
        .chain(ops.iter().map(command))
        .collect()
}

/// Accepted events of a command sequence run against a bare model
fn history(ops: &[Op]) -> Vec<ResourceEvent> {
    let mut state = ResourceState::default();
    let mut events = Vec::new();
    for cmd in commands(ops) {
        if let Ok(produced) = state.handle_command(&cmd, events.len() as u64) {
            events.extend(produced);
        }
    }
    events
}

fn replay<'a>(events: impl IntoIterator<Item = &'a ResourceEvent>) -> ResourceState {
    let mut state = ResourceState::default();
    for event in events {
        state.replay(event).unwrap();
    }
    state
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Property: Snapshot Equivalence
    ///
    /// For every prefix that may be snapshotted:
    /// replay(snapshot(prefix) ++ rest) == replay(prefix ++ rest)
    #[test]
    fn prop_snapshot_replay_matches_full_replay(ops in prop::collection::vec(op(), 0..40)) {
        let events = history(&ops);
        let full = replay(&events);

        for cut in 1..=events.len() {
            let before = replay(&events[..cut]);
            let Some(snapshot) = before.take_snapshot(cut as u64) else {
                continue;
            };
            let mut restored = ResourceState::default();
            restored.replay(&snapshot).unwrap();
            for event in &events[cut..] {
                restored.replay(event).unwrap();
            }
            prop_assert_eq!(restored.view(), full.view());
        }
    }

    /// Property: Gap-Free Versions
    ///
    /// Whatever the snapshot threshold, the retained log starts at version 0
    /// or at a snapshot, ascends by one, and rebuilds the same state as the
    /// accepted events.
    #[test]
    fn prop_stored_versions_are_gap_free(
        ops in prop::collection::vec(op(), 0..30),
        threshold in 1u64..5,
    ) {
        let (stored, rebuilt, accepted) = runtime().block_on(async {
            let store = Arc::new(MemoryEventStore::new());
            let aggregate = ResourceAggregate::new(
                light(),
                &AggregateConfig::default().with_snapshot_threshold(threshold),
                store.clone(),
                allow_all(),
            )
            .unwrap();

            let mut accepted = Vec::new();
            for cmd in commands(&ops) {
                if let Ok(events) = aggregate.handle_command(&cmd).await {
                    accepted.extend(events.into_iter().filter(|e| !e.is_snapshot).map(|e| e.data));
                }
            }
            let rebuilt = aggregate.state().await.unwrap();
            (store.events_of(&light().aggregate_id()), rebuilt, accepted)
        });

        prop_assert!(stored[0].version == 0 || stored[0].is_snapshot);
        prop_assert!(stored.windows(2).all(|w| w[1].version == w[0].version + 1));
        prop_assert_eq!(rebuilt.view(), replay(&accepted).view());
    }

    /// Property: Redelivery Tolerance
    ///
    /// Delivering events one by one in any order, with duplicates, and
    /// finally the latest event, leaves the projection at the aggregate state.
    #[test]
    fn prop_projection_converges_under_redelivery(
        ops in prop::collection::vec(op(), 0..20),
        deliveries in prop::collection::vec(any::<Index>(), 0..30),
    ) {
        let events = history(&ops);
        let expected = replay(&events);
        let stored: Vec<StoredEvent> = events.into_iter().map(StoredEvent::new).collect();
        let last = stored[stored.len() - 1].clone();

        let (version, model) = runtime().block_on(async {
            let store = Arc::new(MemoryEventStore::new());
            store
                .save(DEVICE_ID_1, &last.aggregate_id, &stored)
                .await
                .unwrap();
            let projection = Projection::new(store, ResourceModel::factory(None));

            for index in &deliveries {
                let event = stored[index.index(stored.len())].clone();
                projection
                    .handle_with_reload(EventIter::from_events(vec![event]))
                    .await
                    .unwrap();
            }
            projection
                .handle_with_reload(EventIter::from_events(vec![last.clone()]))
                .await
                .unwrap();

            let mut models = Vec::new();
            projection.models(&[], |m: &ResourceModel| models.push(m.clone()));
            (projection.version(DEVICE_ID_1, &last.aggregate_id), models)
        });

        prop_assert_eq!(version, Some(last.version));
        prop_assert_eq!(model.len(), 1);
        prop_assert_eq!(model[0].is_published(), expected.is_published());
        prop_assert_eq!(model[0].pending().len() as u32, expected.pending_requests_count());
        for c in 0..3 {
            let correlation_id = format!("c{c}");
            prop_assert_eq!(
                model[0].pending().contains_key(&correlation_id),
                expected.is_pending(&correlation_id)
            );
        }
    }
}
