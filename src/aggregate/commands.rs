// Copyright (c) 2025 - Cowboy AI, Inc.
//! Commands for the Resource Aggregate
//!
//! Commands express intent from devices and clients and can fail validation.
//! They carry everything the aggregate needs to decide.
//!
//! # Command Pattern
//!
//! ```text
//! ResourceCommand → ResourceState::handle_command → Result<Vec<ResourceEvent>, CqrsError>
//! ```
//!
//! # Time Handling
//!
//! All commands include an explicit `timestamp`.
//! **NEVER call `Utc::now()` in domain logic**.
//! Time is passed from the application layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{Content, Resource, ResourceId, Status};

/// Who issued a command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationContext {
    pub user_id: String,
    pub device_id: String,
}

impl AuthorizationContext {
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
        }
    }
}

/// Connection the command arrived on
///
/// `sequence` must grow monotonically per `connection_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMetadata {
    pub connection_id: String,
    pub sequence: u64,
}

impl CommandMetadata {
    pub fn new(connection_id: impl Into<String>, sequence: u64) -> Self {
        Self {
            connection_id: connection_id.into(),
            sequence,
        }
    }
}

/// Device publishes a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResourceRequest {
    pub resource_id: ResourceId,
    pub resource: Resource,
    pub time_to_live: i64,
    pub authorization_context: AuthorizationContext,
    pub command_metadata: Option<CommandMetadata>,
    pub timestamp: DateTime<Utc>,
}

/// Device withdraws a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpublishResourceRequest {
    pub resource_id: ResourceId,
    pub authorization_context: AuthorizationContext,
    pub command_metadata: Option<CommandMetadata>,
    pub timestamp: DateTime<Utc>,
}

/// Client asks to write resource content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResourceRequest {
    pub resource_id: ResourceId,
    pub correlation_id: String,
    pub resource_interface: String,
    pub content: Content,
    pub authorization_context: AuthorizationContext,
    pub command_metadata: Option<CommandMetadata>,
    pub timestamp: DateTime<Utc>,
}

/// Device answers an update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmResourceUpdateRequest {
    pub resource_id: ResourceId,
    pub correlation_id: String,
    pub status: Status,
    pub content: Option<Content>,
    pub authorization_context: AuthorizationContext,
    pub command_metadata: Option<CommandMetadata>,
    pub timestamp: DateTime<Utc>,
}

/// Client asks to read resource content from the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrieveResourceRequest {
    pub resource_id: ResourceId,
    pub correlation_id: String,
    pub resource_interface: String,
    pub authorization_context: AuthorizationContext,
    pub command_metadata: Option<CommandMetadata>,
    pub timestamp: DateTime<Utc>,
}

/// Device answers a retrieve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmResourceRetrieveRequest {
    pub resource_id: ResourceId,
    pub correlation_id: String,
    pub status: Status,
    pub content: Option<Content>,
    pub authorization_context: AuthorizationContext,
    pub command_metadata: Option<CommandMetadata>,
    pub timestamp: DateTime<Utc>,
}

/// Client asks the device to delete a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResourceRequest {
    pub resource_id: ResourceId,
    pub correlation_id: String,
    pub authorization_context: AuthorizationContext,
    pub command_metadata: Option<CommandMetadata>,
    pub timestamp: DateTime<Utc>,
}

/// Device answers a delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmResourceDeleteRequest {
    pub resource_id: ResourceId,
    pub correlation_id: String,
    pub status: Status,
    pub content: Option<Content>,
    pub authorization_context: AuthorizationContext,
    pub command_metadata: Option<CommandMetadata>,
    pub timestamp: DateTime<Utc>,
}

/// Device pushes new content on its own
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyResourceChangedRequest {
    pub resource_id: ResourceId,
    pub status: Status,
    pub content: Option<Content>,
    pub authorization_context: AuthorizationContext,
    pub command_metadata: Option<CommandMetadata>,
    pub timestamp: DateTime<Utc>,
}

/// Every command the resource aggregate understands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceCommand {
    Publish(PublishResourceRequest),
    Unpublish(UnpublishResourceRequest),
    Update(UpdateResourceRequest),
    ConfirmUpdate(ConfirmResourceUpdateRequest),
    Retrieve(RetrieveResourceRequest),
    ConfirmRetrieve(ConfirmResourceRetrieveRequest),
    Delete(DeleteResourceRequest),
    ConfirmDelete(ConfirmResourceDeleteRequest),
    NotifyChanged(NotifyResourceChangedRequest),
}

impl ResourceCommand {
    pub fn resource_id(&self) -> &ResourceId {
        use ResourceCommand::*;
        match self {
            Publish(c) => &c.resource_id,
            Unpublish(c) => &c.resource_id,
            Update(c) => &c.resource_id,
            ConfirmUpdate(c) => &c.resource_id,
            Retrieve(c) => &c.resource_id,
            ConfirmRetrieve(c) => &c.resource_id,
            Delete(c) => &c.resource_id,
            ConfirmDelete(c) => &c.resource_id,
            NotifyChanged(c) => &c.resource_id,
        }
    }

    pub fn authorization_context(&self) -> &AuthorizationContext {
        use ResourceCommand::*;
        match self {
            Publish(c) => &c.authorization_context,
            Unpublish(c) => &c.authorization_context,
            Update(c) => &c.authorization_context,
            ConfirmUpdate(c) => &c.authorization_context,
            Retrieve(c) => &c.authorization_context,
            ConfirmRetrieve(c) => &c.authorization_context,
            Delete(c) => &c.authorization_context,
            ConfirmDelete(c) => &c.authorization_context,
            NotifyChanged(c) => &c.authorization_context,
        }
    }

    pub fn command_metadata(&self) -> Option<&CommandMetadata> {
        use ResourceCommand::*;
        match self {
            Publish(c) => c.command_metadata.as_ref(),
            Unpublish(c) => c.command_metadata.as_ref(),
            Update(c) => c.command_metadata.as_ref(),
            ConfirmUpdate(c) => c.command_metadata.as_ref(),
            Retrieve(c) => c.command_metadata.as_ref(),
            ConfirmRetrieve(c) => c.command_metadata.as_ref(),
            Delete(c) => c.command_metadata.as_ref(),
            ConfirmDelete(c) => c.command_metadata.as_ref(),
            NotifyChanged(c) => c.command_metadata.as_ref(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        use ResourceCommand::*;
        match self {
            Publish(c) => c.timestamp,
            Unpublish(c) => c.timestamp,
            Update(c) => c.timestamp,
            ConfirmUpdate(c) => c.timestamp,
            Retrieve(c) => c.timestamp,
            ConfirmRetrieve(c) => c.timestamp,
            Delete(c) => c.timestamp,
            ConfirmDelete(c) => c.timestamp,
            NotifyChanged(c) => c.timestamp,
        }
    }

    /// Correlation id of request and confirmation commands, empty otherwise
    pub fn correlation_id(&self) -> &str {
        use ResourceCommand::*;
        match self {
            Update(c) => &c.correlation_id,
            ConfirmUpdate(c) => &c.correlation_id,
            Retrieve(c) => &c.correlation_id,
            ConfirmRetrieve(c) => &c.correlation_id,
            Delete(c) => &c.correlation_id,
            ConfirmDelete(c) => &c.correlation_id,
            Publish(_) | Unpublish(_) | NotifyChanged(_) => "",
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        use ResourceCommand::*;
        match self {
            Publish(_) => "publish",
            Unpublish(_) => "unpublish",
            Update(_) => "update",
            ConfirmUpdate(_) => "confirm_update",
            Retrieve(_) => "retrieve",
            ConfirmRetrieve(_) => "confirm_retrieve",
            Delete(_) => "delete",
            ConfirmDelete(_) => "confirm_delete",
            NotifyChanged(_) => "notify_changed",
        }
    }
}

macro_rules! impl_from_request {
    ($($request:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$request> for ResourceCommand {
                fn from(request: $request) -> Self {
                    ResourceCommand::$variant(request)
                }
            }
        )*
    };
}

impl_from_request!(
    PublishResourceRequest => Publish,
    UnpublishResourceRequest => Unpublish,
    UpdateResourceRequest => Update,
    ConfirmResourceUpdateRequest => ConfirmUpdate,
    RetrieveResourceRequest => Retrieve,
    ConfirmResourceRetrieveRequest => ConfirmRetrieve,
    DeleteResourceRequest => Delete,
    ConfirmResourceDeleteRequest => ConfirmDelete,
    NotifyResourceChangedRequest => NotifyChanged,
);
