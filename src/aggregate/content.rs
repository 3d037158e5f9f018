// Copyright (c) 2025 - Cowboy AI, Inc.
//! Content negotiation for resource updates
//!
//! A device declares the encodings it accepts. Update content arriving in
//! another encoding is decoded into a generic value and re-encoded before the
//! pending event is emitted.
//!
//! ```text
//! application/json ──┐                     ┌──► application/cbor
//!                    ├─► serde_json::Value ┤
//! application/cbor ──┘                     └──► application/json
//! ```

use std::fmt;

use crate::errors::{CqrsError, CqrsResult};
use crate::events::Content;

/// Encodings the engine can transcode between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentFormat {
    Cbor,
    OcfCbor,
    Json,
}

impl ContentFormat {
    /// Encoding assumed when a device declares none
    pub const DEFAULT: ContentFormat = ContentFormat::OcfCbor;

    pub const ALL: [ContentFormat; 3] =
        [ContentFormat::Cbor, ContentFormat::OcfCbor, ContentFormat::Json];

    pub fn from_media_type(media_type: &str) -> Option<Self> {
        match media_type {
            "application/cbor" => Some(ContentFormat::Cbor),
            "application/vnd.ocf+cbor" => Some(ContentFormat::OcfCbor),
            "application/json" => Some(ContentFormat::Json),
            _ => None,
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            ContentFormat::Cbor => "application/cbor",
            ContentFormat::OcfCbor => "application/vnd.ocf+cbor",
            ContentFormat::Json => "application/json",
        }
    }

    /// CoAP content format number
    pub fn coap_number(self) -> i32 {
        match self {
            ContentFormat::Cbor => 60,
            ContentFormat::OcfCbor => 10000,
            ContentFormat::Json => 50,
        }
    }

    pub fn from_coap_number(number: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.coap_number() == number)
    }

    fn is_cbor(self) -> bool {
        matches!(self, ContentFormat::Cbor | ContentFormat::OcfCbor)
    }
}

impl fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.media_type())
    }
}

fn decode(format: ContentFormat, data: &[u8]) -> CqrsResult<serde_json::Value> {
    if format.is_cbor() {
        ciborium::de::from_reader(data)
            .map_err(|e| CqrsError::InvalidArgument(format!("cannot decode {format} content: {e}")))
    } else {
        serde_json::from_slice(data)
            .map_err(|e| CqrsError::InvalidArgument(format!("cannot decode {format} content: {e}")))
    }
}

fn encode(format: ContentFormat, value: &serde_json::Value) -> CqrsResult<Vec<u8>> {
    if format.is_cbor() {
        let mut data = Vec::new();
        ciborium::ser::into_writer(value, &mut data)
            .map_err(|e| CqrsError::InvalidArgument(format!("cannot encode {format} content: {e}")))?;
        Ok(data)
    } else {
        serde_json::to_vec(value)
            .map_err(|e| CqrsError::InvalidArgument(format!("cannot encode {format} content: {e}")))
    }
}

/// Media type of content, falling back to its CoAP format number
fn source_media_type(content: &Content) -> String {
    match ContentFormat::from_coap_number(content.coap_content_format) {
        Some(format) if content.content_type.is_empty() => format.media_type().to_string(),
        _ => content.content_type.clone(),
    }
}

/// Transcoding target among the declared types
///
/// The first known type in declaration order wins, except that plain CBOR
/// is taken whenever it is declared.
fn target_format(supported: &[String]) -> Option<ContentFormat> {
    let declared: Vec<ContentFormat> = supported
        .iter()
        .filter_map(|t| ContentFormat::from_media_type(t))
        .collect();
    if declared.contains(&ContentFormat::Cbor) {
        return Some(ContentFormat::Cbor);
    }
    declared.first().copied()
}

/// Convert content into an encoding the device supports
///
/// Content already in a supported encoding is returned unchanged. Fails with
/// `InvalidArgument` when the source or every declared target is unknown, or
/// when decoding fails.
pub fn convert_content(content: &Content, supported_content_types: &[String]) -> CqrsResult<Content> {
    let default_types = [ContentFormat::DEFAULT.media_type().to_string()];
    let supported: &[String] = if supported_content_types.is_empty() {
        &default_types
    } else {
        supported_content_types
    };

    let source_type = source_media_type(content);
    if supported.iter().any(|t| *t == source_type) {
        return Ok(content.clone());
    }

    let target = target_format(supported).ok_or_else(|| {
        CqrsError::InvalidArgument(format!(
            "no known encoding among supported content types {:?}",
            supported
        ))
    })?;

    let source = ContentFormat::from_media_type(&source_type).ok_or_else(|| {
        CqrsError::InvalidArgument(format!(
            "cannot convert content of type '{}' to {}",
            source_type, target
        ))
    })?;

    if content.data.is_empty() || (source.is_cbor() && target.is_cbor()) {
        return Ok(Content::new(target.media_type(), content.data.clone()));
    }

    let value = decode(source, &content.data)?;
    Ok(Content::new(target.media_type(), encode(target, &value)?))
}
