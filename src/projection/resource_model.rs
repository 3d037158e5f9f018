// Copyright (c) 2025 - Cowboy AI, Inc.
//! Read model of one device resource
//!
//! Mirrors the aggregate closely enough for queries and forwards device
//! confirmations to the requests waiting on them.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::{ProjectionFactory, ProjectionModel};
use crate::errors::CqrsResult;
use crate::events::{Resource, ResourceChanged, ResourceEvent, ResourceId, StoredEvent};
use crate::notification::NotificationContainers;

#[derive(Debug, Clone)]
pub struct ResourceModel {
    group_id: String,
    aggregate_id: String,
    resource_id: Option<ResourceId>,
    resource: Resource,
    is_published: bool,
    latest_change: Option<ResourceChanged>,
    pending: BTreeMap<String, ResourceEvent>,
    version: Option<u64>,
    notifications: Option<Arc<NotificationContainers>>,
}

impl ResourceModel {
    pub fn new(group_id: impl Into<String>, aggregate_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            aggregate_id: aggregate_id.into(),
            resource_id: None,
            resource: Resource::default(),
            is_published: false,
            latest_change: None,
            pending: BTreeMap::new(),
            version: None,
            notifications: None,
        }
    }

    /// Forward confirmations to `notifications`
    pub fn with_notifications(mut self, notifications: Arc<NotificationContainers>) -> Self {
        self.notifications = Some(notifications);
        self
    }

    pub fn factory(notifications: Option<Arc<NotificationContainers>>) -> ProjectionFactory<Self> {
        Arc::new(move |group_id: &str, aggregate_id: &str| {
            let model = ResourceModel::new(group_id, aggregate_id);
            Ok(match &notifications {
                Some(n) => model.with_notifications(Arc::clone(n)),
                None => model,
            })
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn resource_id(&self) -> Option<&ResourceId> {
        self.resource_id.as_ref()
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn is_published(&self) -> bool {
        self.is_published
    }

    pub fn latest_change(&self) -> Option<&ResourceChanged> {
        self.latest_change.as_ref()
    }

    /// Pending request events keyed by correlation id
    pub fn pending(&self) -> &BTreeMap<String, ResourceEvent> {
        &self.pending
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    fn confirm(&mut self, event: &ResourceEvent) {
        self.pending.remove(event.correlation_id());
        let Some(notifications) = &self.notifications else {
            return;
        };
        if notifications.notify(event) {
            debug!(
                aggregate_id = %self.aggregate_id,
                correlation_id = %event.correlation_id(),
                event_type = event.event_type(),
                "confirmation delivered"
            );
        }
    }
}

impl ProjectionModel for ResourceModel {
    fn apply(&mut self, event: &StoredEvent) -> CqrsResult<()> {
        let data = &event.data;
        match data {
            ResourceEvent::ResourcePublished(e) => {
                self.resource_id = Some(e.resource_id.clone());
                self.resource = e.resource.clone();
                self.is_published = true;
            }
            ResourceEvent::ResourceUnpublished(_) => self.is_published = false,
            ResourceEvent::ResourceUpdatePending(_)
            | ResourceEvent::ResourceRetrievePending(_)
            | ResourceEvent::ResourceDeletePending(_) => {
                self.pending
                    .insert(data.correlation_id().to_string(), data.clone());
            }
            ResourceEvent::ResourceUpdated(_)
            | ResourceEvent::ResourceRetrieved(_)
            | ResourceEvent::ResourceDeleted(_) => self.confirm(data),
            ResourceEvent::ResourceChanged(e) => self.latest_change = Some(e.clone()),
            ResourceEvent::ResourceStateSnapshotTaken(s) => {
                self.resource_id = Some(s.resource_id.clone());
                self.resource = s.resource.clone();
                self.is_published = s.is_published;
                self.latest_change = s.latest_resource_change.clone();
                self.pending.clear();
            }
        }
        self.version = Some(event.version);
        Ok(())
    }
}
