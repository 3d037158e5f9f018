// Copyright (c) 2025 - Cowboy AI, Inc.
//! Test Fixtures for cim-resource-aggregate
//!
//! Provides deterministic commands and events for the integration tests.
//! All identifiers and timestamps are fixed constants so tests are
//! reproducible.
//!
//! # Design Principles
//! - All test data is deterministic (no `Uuid::now_v7()` or `Utc::now()`)
//! - Fixtures are the one place that builds commands
//! - Each test file uses only the helpers it needs
#![allow(dead_code)]

use chrono::{DateTime, Utc};

use cim_resource_aggregate::aggregate::{
    AuthorizationContext, CommandMetadata, ConfirmResourceDeleteRequest,
    ConfirmResourceRetrieveRequest, ConfirmResourceUpdateRequest, DeleteResourceRequest,
    NotifyResourceChangedRequest, PublishResourceRequest, ResourceCommand,
    RetrieveResourceRequest, UnpublishResourceRequest, UpdateResourceRequest,
};
use cim_resource_aggregate::events::{Content, Resource, ResourceId, Status};

pub const DEVICE_ID_1: &str = "0b6c2c7e-1000-4000-8000-00000000d001";
pub const DEVICE_ID_2: &str = "0b6c2c7e-2000-4000-8000-00000000d002";
pub const HREF_LIGHT: &str = "/light/1";
pub const HREF_SWITCH: &str = "/switch/1";
pub const USER_ID: &str = "user-1";
pub const CONNECTION_A: &str = "connection-a";
pub const CONNECTION_B: &str = "connection-b";

// Fixed test timestamp (2026-01-19T12:00:00Z)
pub const FIXED_TIMESTAMP: &str = "2026-01-19T12:00:00Z";

/// Parse the fixed timestamp
pub fn fixed_timestamp() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(FIXED_TIMESTAMP)
        .expect("Invalid timestamp in test fixture")
        .with_timezone(&Utc)
}

pub fn light() -> ResourceId {
    ResourceId::new(DEVICE_ID_1, HREF_LIGHT)
}

pub fn switch() -> ResourceId {
    ResourceId::new(DEVICE_ID_1, HREF_SWITCH)
}

pub fn auth(device_id: &str) -> AuthorizationContext {
    AuthorizationContext::new(USER_ID, device_id)
}

pub fn metadata(connection_id: &str, sequence: u64) -> Option<CommandMetadata> {
    Some(CommandMetadata::new(connection_id, sequence))
}

pub fn json(body: &str) -> Content {
    Content::new("application/json", body.as_bytes().to_vec())
}

pub fn publish(resource_id: &ResourceId) -> ResourceCommand {
    PublishResourceRequest {
        resource_id: resource_id.clone(),
        resource: Resource {
            href: resource_id.href.clone(),
            device_id: resource_id.device_id.clone(),
            resource_types: vec!["oic.r.switch.binary".to_string()],
            interfaces: vec!["oic.if.a".to_string()],
            supported_content_types: vec!["application/json".to_string()],
        },
        time_to_live: 0,
        authorization_context: auth(&resource_id.device_id),
        command_metadata: metadata(CONNECTION_A, 0),
        timestamp: fixed_timestamp(),
    }
    .into()
}

pub fn unpublish(resource_id: &ResourceId) -> ResourceCommand {
    UnpublishResourceRequest {
        resource_id: resource_id.clone(),
        authorization_context: auth(&resource_id.device_id),
        command_metadata: metadata(CONNECTION_A, 0),
        timestamp: fixed_timestamp(),
    }
    .into()
}

pub fn update(resource_id: &ResourceId, correlation_id: &str) -> ResourceCommand {
    update_request(resource_id, correlation_id).into()
}

pub fn update_request(resource_id: &ResourceId, correlation_id: &str) -> UpdateResourceRequest {
    UpdateResourceRequest {
        resource_id: resource_id.clone(),
        correlation_id: correlation_id.to_string(),
        resource_interface: String::new(),
        content: json(r#"{"value":true}"#),
        authorization_context: auth(&resource_id.device_id),
        command_metadata: metadata(CONNECTION_A, 0),
        timestamp: fixed_timestamp(),
    }
}

pub fn confirm_update(resource_id: &ResourceId, correlation_id: &str) -> ResourceCommand {
    ConfirmResourceUpdateRequest {
        resource_id: resource_id.clone(),
        correlation_id: correlation_id.to_string(),
        status: Status::Ok,
        content: Some(json(r#"{"value":true}"#)),
        authorization_context: auth(&resource_id.device_id),
        command_metadata: metadata(CONNECTION_A, 0),
        timestamp: fixed_timestamp(),
    }
    .into()
}

pub fn retrieve_request(resource_id: &ResourceId, correlation_id: &str) -> RetrieveResourceRequest {
    RetrieveResourceRequest {
        resource_id: resource_id.clone(),
        correlation_id: correlation_id.to_string(),
        resource_interface: String::new(),
        authorization_context: auth(&resource_id.device_id),
        command_metadata: metadata(CONNECTION_A, 0),
        timestamp: fixed_timestamp(),
    }
}

pub fn confirm_retrieve(resource_id: &ResourceId, correlation_id: &str) -> ResourceCommand {
    ConfirmResourceRetrieveRequest {
        resource_id: resource_id.clone(),
        correlation_id: correlation_id.to_string(),
        status: Status::Ok,
        content: Some(json(r#"{"value":false}"#)),
        authorization_context: auth(&resource_id.device_id),
        command_metadata: metadata(CONNECTION_A, 0),
        timestamp: fixed_timestamp(),
    }
    .into()
}

pub fn delete_request(resource_id: &ResourceId, correlation_id: &str) -> DeleteResourceRequest {
    DeleteResourceRequest {
        resource_id: resource_id.clone(),
        correlation_id: correlation_id.to_string(),
        authorization_context: auth(&resource_id.device_id),
        command_metadata: metadata(CONNECTION_A, 0),
        timestamp: fixed_timestamp(),
    }
}

pub fn confirm_delete(resource_id: &ResourceId, correlation_id: &str) -> ResourceCommand {
    ConfirmResourceDeleteRequest {
        resource_id: resource_id.clone(),
        correlation_id: correlation_id.to_string(),
        status: Status::Ok,
        content: None,
        authorization_context: auth(&resource_id.device_id),
        command_metadata: metadata(CONNECTION_A, 0),
        timestamp: fixed_timestamp(),
    }
    .into()
}

pub fn notify_changed(resource_id: &ResourceId, connection_id: &str, sequence: u64) -> ResourceCommand {
    NotifyResourceChangedRequest {
        resource_id: resource_id.clone(),
        status: Status::Ok,
        content: Some(json(&format!(r#"{{"sequence":{sequence}}}"#))),
        authorization_context: auth(&resource_id.device_id),
        command_metadata: metadata(connection_id, sequence),
        timestamp: fixed_timestamp(),
    }
    .into()
}
