// Copyright (c) 2025 - Cowboy AI, Inc.
//! Resource State Model
//!
//! The authoritative state of one device resource, rebuilt by folding its own
//! events and advanced by turning commands into new events.
//!
//! # States
//!
//! ```text
//!            Publish               Unpublish
//! (none) ──────────────► Published ──────────► Unpublished
//!                          ▲   │                   │
//!                          │   │ Update/Retrieve/  │ Publish
//!                          │   │ Delete (pending)  │
//!                          │   ▼                   │
//!                       pending requests ◄─────────┘
//!                       keyed by correlation id
//! ```
//!
//! Pending requests are tracked independently of the publication state. A
//! snapshot is only taken while none is pending, so a compaction never drops
//! a correlation id a confirmation still refers to.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use super::commands::{AuthorizationContext, CommandMetadata, ResourceCommand};
use super::content::convert_content;
use super::AggregateModel;
use crate::errors::{CqrsError, CqrsResult};
use crate::events::{
    AuditContext, EventMetadata, Resource, ResourceChanged, ResourceDeletePending,
    ResourceDeleted, ResourceEvent, ResourceId, ResourcePublished, ResourceRetrievePending,
    ResourceRetrieved, ResourceStateSnapshotTaken, ResourceUnpublished, ResourceUpdatePending,
    ResourceUpdated, StoredEvent,
};

/// Access check run for every replayed event: `(device_id, aggregate_id)`
pub type VerifyAccess = Arc<dyn Fn(&str, &str) -> CqrsResult<()> + Send + Sync>;

/// Access check that allows everything
pub fn allow_all() -> VerifyAccess {
    Arc::new(|_, _| Ok(()))
}

/// State of one resource aggregate
#[derive(Clone)]
pub struct ResourceState {
    resource_id: Option<ResourceId>,
    resource: Resource,
    is_published: bool,
    time_to_live: i64,
    latest_resource_change: Option<ResourceChanged>,
    pending: BTreeSet<String>,
    event_metadata: Option<EventMetadata>,
    audit_context: AuditContext,
    verify_access: VerifyAccess,
}

impl std::fmt::Debug for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceState")
            .field("resource_id", &self.resource_id)
            .field("is_published", &self.is_published)
            .field("pending", &self.pending)
            .field("event_metadata", &self.event_metadata)
            .finish()
    }
}

impl Default for ResourceState {
    fn default() -> Self {
        Self::new(allow_all())
    }
}

/// Part of the state that must survive a snapshot round trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceStateView {
    pub resource_id: Option<ResourceId>,
    pub resource: Resource,
    pub is_published: bool,
    pub time_to_live: i64,
    pub latest_resource_change: Option<ResourceChanged>,
    pub pending_requests_count: u32,
}

impl ResourceState {
    pub fn new(verify_access: VerifyAccess) -> Self {
        Self {
            resource_id: None,
            resource: Resource::default(),
            is_published: false,
            time_to_live: 0,
            latest_resource_change: None,
            pending: BTreeSet::new(),
            event_metadata: None,
            audit_context: AuditContext::default(),
            verify_access,
        }
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

    pub fn latest_resource_change(&self) -> Option<&ResourceChanged> {
        self.latest_resource_change.as_ref()
    }

    pub fn pending_requests_count(&self) -> u32 {
        self.pending.len() as u32
    }

    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.pending.contains(correlation_id)
    }

    /// Metadata of the last applied event
    pub fn event_metadata(&self) -> Option<&EventMetadata> {
        self.event_metadata.as_ref()
    }

    pub fn view(&self) -> ResourceStateView {
        ResourceStateView {
            resource_id: self.resource_id.clone(),
            resource: self.resource.clone(),
            is_published: self.is_published,
            time_to_live: self.time_to_live,
            latest_resource_change: self.latest_resource_change.clone(),
            pending_requests_count: self.pending_requests_count(),
        }
    }

    /// Should a change notification carrying `metadata` be accepted
    ///
    /// Accepted when nothing changed before, when it arrives on another
    /// connection than the latest change (a reconnect), or when its sequence
    /// is strictly greater.
    pub fn validate_sequence(&self, metadata: &EventMetadata) -> bool {
        match &self.latest_resource_change {
            None => true,
            Some(latest) => {
                latest.event_metadata.connection_id != metadata.connection_id
                    || latest.event_metadata.sequence < metadata.sequence
            }
        }
    }

    /// Apply one replayed event, checking access first
    pub fn replay(&mut self, event: &ResourceEvent) -> CqrsResult<()> {
        let resource_id = event.resource_id();
        (self.verify_access)(&resource_id.device_id, &resource_id.aggregate_id()).map_err(|e| {
            CqrsError::Unauthenticated(format!("unauthorized access to resource {resource_id}: {e}"))
        })?;
        self.apply_event(event)
    }

    fn apply_event(&mut self, event: &ResourceEvent) -> CqrsResult<()> {
        match event {
            ResourceEvent::ResourcePublished(e) => {
                self.resource_id = Some(e.resource_id.clone());
                self.resource = e.resource.clone();
                self.time_to_live = e.time_to_live;
                self.is_published = true;
            }
            ResourceEvent::ResourceUnpublished(_) => {
                if !self.is_published {
                    return Err(CqrsError::FailedPrecondition(
                        "resource is already unpublished".to_string(),
                    ));
                }
                self.is_published = false;
            }
            ResourceEvent::ResourceUpdatePending(e) => {
                self.pending.insert(e.audit_context.correlation_id.clone());
            }
            ResourceEvent::ResourceRetrievePending(e) => {
                self.pending.insert(e.audit_context.correlation_id.clone());
            }
            ResourceEvent::ResourceDeletePending(e) => {
                self.pending.insert(e.audit_context.correlation_id.clone());
            }
            ResourceEvent::ResourceUpdated(e) => {
                self.pending.remove(&e.audit_context.correlation_id);
            }
            ResourceEvent::ResourceRetrieved(e) => {
                self.pending.remove(&e.audit_context.correlation_id);
            }
            ResourceEvent::ResourceDeleted(e) => {
                self.pending.remove(&e.audit_context.correlation_id);
            }
            ResourceEvent::ResourceChanged(e) => {
                if !self.validate_sequence(&e.event_metadata) {
                    return Ok(());
                }
                self.latest_resource_change = Some(e.clone());
            }
            ResourceEvent::ResourceStateSnapshotTaken(s) => {
                if s.pending_requests_count != 0 {
                    return Err(CqrsError::FailedPrecondition(format!(
                        "snapshot of {} has {} pending requests",
                        s.resource_id, s.pending_requests_count
                    )));
                }
                self.resource_id = Some(s.resource_id.clone());
                self.resource = s.resource.clone();
                self.is_published = s.is_published;
                self.time_to_live = s.time_to_live;
                self.latest_resource_change = s.latest_resource_change.clone();
                self.pending.clear();
            }
        }
        self.event_metadata = Some(event.event_metadata().clone());
        self.audit_context = event.audit_context().clone();
        Ok(())
    }

    fn check_resource_id(&self, command: &ResourceCommand) -> CqrsResult<()> {
        let requested = command.resource_id();
        if requested.device_id.is_empty() || requested.href.is_empty() {
            return Err(CqrsError::InvalidArgument(
                "resource id needs device id and href".to_string(),
            ));
        }
        match (&self.resource_id, command) {
            (None, ResourceCommand::Publish(_)) => Ok(()),
            (Some(current), _) if current == requested => Ok(()),
            (current, _) => Err(CqrsError::Internal(format!(
                "invalid resource id {}, aggregate holds {}",
                requested,
                current.as_ref().map(ToString::to_string).unwrap_or_default()
            ))),
        }
    }

    fn event_metadata_for(
        metadata: Option<&CommandMetadata>,
        new_version: u64,
        command: &ResourceCommand,
    ) -> CqrsResult<EventMetadata> {
        match metadata {
            Some(m) if !m.connection_id.is_empty() => Ok(EventMetadata::new(
                &m.connection_id,
                m.sequence,
                new_version,
                command.timestamp(),
            )),
            _ => Err(CqrsError::InvalidArgument("invalid command metadata".to_string())),
        }
    }

    fn audit_context_for(auth: &AuthorizationContext, correlation_id: &str) -> AuditContext {
        AuditContext::new(&auth.user_id, &auth.device_id, correlation_id)
    }

    fn require_published(&self) -> CqrsResult<()> {
        if self.is_published {
            Ok(())
        } else {
            Err(CqrsError::FailedPrecondition("resource is unpublished".to_string()))
        }
    }

    fn require_new_correlation_id(&self, correlation_id: &str) -> CqrsResult<()> {
        if correlation_id.is_empty() {
            return Err(CqrsError::InvalidArgument("invalid correlation id".to_string()));
        }
        if self.pending.contains(correlation_id) {
            return Err(CqrsError::InvalidArgument(format!(
                "request with correlation id '{correlation_id}' is already pending"
            )));
        }
        Ok(())
    }

    fn require_correlation_id(correlation_id: &str) -> CqrsResult<()> {
        if correlation_id.is_empty() {
            return Err(CqrsError::InvalidArgument("invalid correlation id".to_string()));
        }
        Ok(())
    }

    fn decide(&self, command: &ResourceCommand, new_version: u64) -> CqrsResult<Option<ResourceEvent>> {
        if !matches!(command, ResourceCommand::Publish(_)) && new_version == 0 {
            return Err(CqrsError::NotFound(format!(
                "resource {} has no events",
                command.resource_id()
            )));
        }
        self.check_resource_id(command)?;
        let event_metadata =
            Self::event_metadata_for(command.command_metadata(), new_version, command)?;
        let auth = command.authorization_context();

        let event = match command {
            ResourceCommand::Publish(req) => {
                ResourceEvent::ResourcePublished(ResourcePublished {
                    resource_id: req.resource_id.clone(),
                    resource: req.resource.clone(),
                    time_to_live: req.time_to_live,
                    audit_context: Self::audit_context_for(auth, ""),
                    event_metadata,
                })
            }
            ResourceCommand::Unpublish(req) => {
                if !self.is_published {
                    return Err(CqrsError::FailedPrecondition(
                        "resource is already unpublished".to_string(),
                    ));
                }
                ResourceEvent::ResourceUnpublished(ResourceUnpublished {
                    resource_id: req.resource_id.clone(),
                    audit_context: Self::audit_context_for(auth, ""),
                    event_metadata,
                })
            }
            ResourceCommand::NotifyChanged(req) => {
                if !self.validate_sequence(&event_metadata) {
                    debug!(
                        resource_id = %req.resource_id,
                        connection_id = %event_metadata.connection_id,
                        sequence = event_metadata.sequence,
                        "stale change notification ignored"
                    );
                    return Ok(None);
                }
                ResourceEvent::ResourceChanged(ResourceChanged {
                    resource_id: req.resource_id.clone(),
                    content: req.content.clone(),
                    status: req.status,
                    audit_context: Self::audit_context_for(auth, ""),
                    event_metadata,
                })
            }
            ResourceCommand::Update(req) => {
                self.require_new_correlation_id(&req.correlation_id)?;
                self.require_published()?;
                let content = convert_content(&req.content, &self.resource.supported_content_types)?;
                ResourceEvent::ResourceUpdatePending(ResourceUpdatePending {
                    resource_id: req.resource_id.clone(),
                    resource_interface: req.resource_interface.clone(),
                    content,
                    audit_context: Self::audit_context_for(auth, &req.correlation_id),
                    event_metadata,
                })
            }
            ResourceCommand::ConfirmUpdate(req) => {
                Self::require_correlation_id(&req.correlation_id)?;
                ResourceEvent::ResourceUpdated(ResourceUpdated {
                    resource_id: req.resource_id.clone(),
                    content: req.content.clone(),
                    status: req.status,
                    audit_context: Self::audit_context_for(auth, &req.correlation_id),
                    event_metadata,
                })
            }
            ResourceCommand::Retrieve(req) => {
                self.require_new_correlation_id(&req.correlation_id)?;
                self.require_published()?;
                ResourceEvent::ResourceRetrievePending(ResourceRetrievePending {
                    resource_id: req.resource_id.clone(),
                    resource_interface: req.resource_interface.clone(),
                    audit_context: Self::audit_context_for(auth, &req.correlation_id),
                    event_metadata,
                })
            }
            ResourceCommand::ConfirmRetrieve(req) => {
                Self::require_correlation_id(&req.correlation_id)?;
                ResourceEvent::ResourceRetrieved(ResourceRetrieved {
                    resource_id: req.resource_id.clone(),
                    content: req.content.clone(),
                    status: req.status,
                    audit_context: Self::audit_context_for(auth, &req.correlation_id),
                    event_metadata,
                })
            }
            ResourceCommand::Delete(req) => {
                self.require_new_correlation_id(&req.correlation_id)?;
                self.require_published()?;
                ResourceEvent::ResourceDeletePending(ResourceDeletePending {
                    resource_id: req.resource_id.clone(),
                    audit_context: Self::audit_context_for(auth, &req.correlation_id),
                    event_metadata,
                })
            }
            ResourceCommand::ConfirmDelete(req) => {
                Self::require_correlation_id(&req.correlation_id)?;
                ResourceEvent::ResourceDeleted(ResourceDeleted {
                    resource_id: req.resource_id.clone(),
                    content: req.content.clone(),
                    status: req.status,
                    audit_context: Self::audit_context_for(auth, &req.correlation_id),
                    event_metadata,
                })
            }
        };
        Ok(Some(event))
    }
}

impl AggregateModel for ResourceState {
    type Command = ResourceCommand;

    fn apply(&mut self, event: &StoredEvent) -> CqrsResult<()> {
        self.replay(&event.data)
    }

    fn handle_command(
        &mut self,
        command: &ResourceCommand,
        new_version: u64,
    ) -> CqrsResult<Vec<ResourceEvent>> {
        let Some(event) = self
            .decide(command, new_version)
            .map_err(|e| e.context(format_args!("cannot handle {}", command.name())))?
        else {
            return Ok(Vec::new());
        };
        self.apply_event(&event)?;
        Ok(vec![event])
    }

    fn take_snapshot(&self, version: u64) -> Option<ResourceEvent> {
        if !self.pending.is_empty() {
            return None;
        }
        let resource_id = self.resource_id.clone()?;
        let (connection_id, sequence, timestamp) = match &self.event_metadata {
            Some(m) => (m.connection_id.clone(), m.sequence, m.timestamp),
            None => return None,
        };
        Some(ResourceEvent::ResourceStateSnapshotTaken(
            ResourceStateSnapshotTaken {
                resource_id,
                resource: self.resource.clone(),
                is_published: self.is_published,
                time_to_live: self.time_to_live,
                latest_resource_change: self.latest_resource_change.clone(),
                pending_requests_count: 0,
                audit_context: self.audit_context.clone(),
                event_metadata: EventMetadata::new(connection_id, sequence, version, timestamp),
            },
        ))
    }
}
