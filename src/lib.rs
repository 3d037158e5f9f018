//! Event-sourced resource engine for device clouds
//!
//! Devices and client applications change resources through commands. This
//! crate records every transition in an append-only event store, rebuilds
//! resource state through aggregates with snapshots, keeps live read models
//! per device and wakes up requests waiting for device confirmations.
//!
//! # Layers
//!
//! ```text
//! Command ─► ResourceAggregate ─► EventStore (optimistic concurrency)
//!                                     │
//!                              publish_events ─► EventBus ─► ResourceProjection ─► ResourceModel
//!                                                                                     │
//! Operator::update_resource ◄──────────── NotificationContainers ◄────────────────────┘
//! ```

pub mod aggregate;
pub mod config;
pub mod errors;
pub mod event_bus;
pub mod event_store;
pub mod events;
pub mod jetstream;
pub mod nats;
pub mod notification;
pub mod operations;
pub mod pool;
pub mod projection;
pub mod subjects;
pub mod telemetry;

// Re-export commonly used types
pub use aggregate::{Aggregate, AggregateModel, ResourceAggregate, ResourceCommand, ResourceState};
pub use config::{AggregateConfig, ResourceAggregateConfig};
pub use errors::{CqrsError, CqrsResult, ErrorCode};
pub use event_bus::{publish_events, EventPublisher, EventSubscriber, MemoryEventBus, NatsEventBus, Observer};
pub use event_store::{
    EventHandler, EventStore, MemoryEventStore, NatsEventStore, SaveStatus, SnapshotQuery,
    VersionQuery,
};
pub use events::{EventIter, ResourceEvent, ResourceId, StoredEvent};
pub use nats::{NatsClient, NatsConfig};
pub use notification::{NotificationContainer, NotificationContainers};
pub use operations::Operator;
pub use pool::{BoundedSpawner, TaskSubmitter, TokioSpawner};
pub use projection::{Projection, ProjectionModel, ResourceModel, ResourceProjection};
