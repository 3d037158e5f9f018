// Copyright (c) 2025 - Cowboy AI, Inc.
//! Resource Domain Events
//!
//! Every state transition of a device resource is one of these immutable
//! facts. Each payload carries its own [`EventMetadata`] (connection,
//! sequence, aggregate version, time) and [`AuditContext`] (who asked and
//! under which correlation id).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a device resource
///
/// The device id is the event group; the aggregate id is derived from the
/// device id and href so that every process agrees on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub device_id: String,
    pub href: String,
}

impl ResourceId {
    pub fn new(device_id: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            href: href.into(),
        }
    }

    /// Name-based UUID of the resource, used as aggregate id
    pub fn to_uuid(&self) -> Uuid {
        let name = format!("{}{}", self.device_id, self.href);
        Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
    }

    /// Aggregate id in its stored string form
    pub fn aggregate_id(&self) -> String {
        self.to_uuid().to_string()
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.device_id, self.href)
    }
}

/// Connection-level metadata stamped on every event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Connection the command arrived on
    pub connection_id: String,

    /// Sequence number of the command within its connection
    pub sequence: u64,

    /// Aggregate version of this event
    pub version: u64,

    /// When the command was issued
    pub timestamp: DateTime<Utc>,
}

impl EventMetadata {
    pub fn new(
        connection_id: impl Into<String>,
        sequence: u64,
        version: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            sequence,
            version,
            timestamp,
        }
    }
}

/// Who triggered the event and which request it answers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub user_id: String,
    pub device_id: String,

    /// Empty for events not tied to a request
    pub correlation_id: String,
}

impl AuditContext {
    pub fn new(
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            correlation_id: correlation_id.into(),
        }
    }
}

/// Encoded resource representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub data: Vec<u8>,

    /// Media type, e.g. `application/json`
    pub content_type: String,

    /// CoAP content format number, `-1` when unknown
    pub coap_content_format: i32,
}

impl Content {
    pub fn new(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        let content_type = content_type.into();
        let coap_content_format = crate::aggregate::content::ContentFormat::from_media_type(
            &content_type,
        )
        .map(|f| f.coap_number())
        .unwrap_or(-1);
        Self {
            data,
            content_type,
            coap_content_format,
        }
    }
}

/// Outcome reported by the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Unknown,
    Ok,
    Created,
    Accepted,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Unavailable,
    NotImplemented,
    Error,
    Canceled,
}

/// Resource description announced by the device at publish time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub href: String,
    pub device_id: String,
    pub resource_types: Vec<String>,
    pub interfaces: Vec<String>,

    /// Encodings the device accepts for updates; empty means the default
    pub supported_content_types: Vec<String>,
}

/// Resource was published by its device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePublished {
    pub resource_id: ResourceId,
    pub resource: Resource,

    /// Seconds the publication stays valid, 0 means forever
    pub time_to_live: i64,
    pub audit_context: AuditContext,
    pub event_metadata: EventMetadata,
}

/// Resource was withdrawn by its device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUnpublished {
    pub resource_id: ResourceId,
    pub audit_context: AuditContext,
    pub event_metadata: EventMetadata,
}

/// Update was requested and waits for the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUpdatePending {
    pub resource_id: ResourceId,
    pub resource_interface: String,

    /// Content already converted into an encoding the device supports
    pub content: Content,
    pub audit_context: AuditContext,
    pub event_metadata: EventMetadata,
}

/// Device answered an update request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUpdated {
    pub resource_id: ResourceId,
    pub content: Option<Content>,
    pub status: Status,
    pub audit_context: AuditContext,
    pub event_metadata: EventMetadata,
}

/// Retrieve was requested and waits for the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRetrievePending {
    pub resource_id: ResourceId,
    pub resource_interface: String,
    pub audit_context: AuditContext,
    pub event_metadata: EventMetadata,
}

/// Device answered a retrieve request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRetrieved {
    pub resource_id: ResourceId,
    pub content: Option<Content>,
    pub status: Status,
    pub audit_context: AuditContext,
    pub event_metadata: EventMetadata,
}

/// Delete was requested and waits for the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDeletePending {
    pub resource_id: ResourceId,
    pub audit_context: AuditContext,
    pub event_metadata: EventMetadata,
}

/// Device answered a delete request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDeleted {
    pub resource_id: ResourceId,
    pub content: Option<Content>,
    pub status: Status,
    pub audit_context: AuditContext,
    pub event_metadata: EventMetadata,
}

/// Device pushed new content on its own
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChanged {
    pub resource_id: ResourceId,
    pub content: Option<Content>,
    pub status: Status,
    pub audit_context: AuditContext,
    pub event_metadata: EventMetadata,
}

/// Full aggregate state at a version
///
/// Only taken while no request is pending, so replaying from it never loses a
/// correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStateSnapshotTaken {
    pub resource_id: ResourceId,
    pub resource: Resource,
    pub is_published: bool,
    pub time_to_live: i64,
    pub latest_resource_change: Option<ResourceChanged>,
    pub pending_requests_count: u32,
    pub audit_context: AuditContext,
    pub event_metadata: EventMetadata,
}
