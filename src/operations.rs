// Copyright (c) 2025 - Cowboy AI, Inc.
//! Request/response operations over the resource engine
//!
//! The [`Operator`] turns an asynchronous device confirmation back into a
//! plain function result:
//!
//! ```text
//! update_resource(req)
//!   ├─ notifications.updated.add(correlation_id)
//!   ├─ ResourceAggregate::handle_command ─► EventStore
//!   ├─ publish_events ─► EventBus ─► ResourceProjection ─► ResourceModel
//!   │                                                        │
//!   ├─ wait(timeout) ◄──────────── NotificationContainers ◄──┘ (ResourceUpdated)
//!   └─ notifications.updated.remove(correlation_id)
//! ```
//!
//! The confirmation is delivered by whichever projection in the process
//! follows the device and shares the same [`NotificationContainers`].

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::aggregate::{
    allow_all, DeleteResourceRequest, ResourceAggregate, ResourceCommand, RetrieveResourceRequest,
    UpdateResourceRequest, VerifyAccess,
};
use crate::config::AggregateConfig;
use crate::errors::CqrsResult;
use crate::event_bus::{publish_events, EventPublisher};
use crate::event_store::EventStore;
use crate::events::{ResourceDeleted, ResourceRetrieved, ResourceUpdated, StoredEvent};
use crate::notification::{NotificationContainer, NotificationContainers};
use crate::projection::TopicsFn;
use crate::subjects;

pub struct Operator {
    store: Arc<dyn EventStore>,
    publisher: Arc<dyn EventPublisher>,
    notifications: Arc<NotificationContainers>,
    config: AggregateConfig,
    verify_access: VerifyAccess,
    topics_fn: TopicsFn,
    timeout: Duration,
}

impl Operator {
    pub fn new(
        store: Arc<dyn EventStore>,
        publisher: Arc<dyn EventPublisher>,
        notifications: Arc<NotificationContainers>,
        config: AggregateConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            notifications,
            config,
            verify_access: allow_all(),
            topics_fn: Arc::new(subjects::device_topics),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_verify_access(mut self, verify_access: VerifyAccess) -> Self {
        self.verify_access = verify_access;
        self
    }

    pub fn with_topics(mut self, topics_fn: TopicsFn) -> Self {
        self.topics_fn = topics_fn;
        self
    }

    /// How long a request waits for its confirmation
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn notifications(&self) -> &Arc<NotificationContainers> {
        &self.notifications
    }

    /// Handle a command and publish the stored events
    pub async fn handle(&self, command: &ResourceCommand) -> CqrsResult<Vec<StoredEvent>> {
        let resource_id = command.resource_id().clone();
        let aggregate = ResourceAggregate::new(
            resource_id.clone(),
            &self.config,
            Arc::clone(&self.store),
            self.verify_access.clone(),
        )?;
        let events = aggregate.handle_command(command).await?;
        let topics = (self.topics_fn)(&resource_id.device_id);
        publish_events(self.publisher.as_ref(), &topics, &events).await?;
        debug!(
            resource_id = %resource_id,
            command = command.name(),
            events = events.len(),
            "command handled"
        );
        Ok(events)
    }

    async fn request<T: Send>(
        &self,
        container: &NotificationContainer<T>,
        command: ResourceCommand,
    ) -> CqrsResult<T> {
        let correlation_id = command.correlation_id().to_string();
        let waiter = container.add(correlation_id.clone())?;
        let result = match self.handle(&command).await {
            Ok(_) => waiter.wait(self.timeout).await,
            Err(e) => Err(e),
        };
        container.remove(&correlation_id);
        result
    }

    /// Update a resource and wait for the device to confirm
    pub async fn update_resource(&self, request: UpdateResourceRequest) -> CqrsResult<ResourceUpdated> {
        self.request(&self.notifications.updated, request.into()).await
    }

    /// Retrieve a resource from the device and wait for its answer
    pub async fn retrieve_resource(
        &self,
        request: RetrieveResourceRequest,
    ) -> CqrsResult<ResourceRetrieved> {
        self.request(&self.notifications.retrieved, request.into()).await
    }

    /// Delete a resource and wait for the device to confirm
    pub async fn delete_resource(&self, request: DeleteResourceRequest) -> CqrsResult<ResourceDeleted> {
        self.request(&self.notifications.deleted, request.into()).await
    }
}
