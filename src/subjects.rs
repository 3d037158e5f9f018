// Copyright (c) 2025 - Cowboy AI, Inc.

//! NATS subject hierarchy for resource events
//!
//! Two families of subjects are used:
//!
//! ```text
//! events.{device}.{aggregate}            durable log, one subject per aggregate
//! devices.{device}.resources             live bus topic of one device
//! ```
//!
//! This allows for:
//! - Per-aggregate compare-and-set appends in the durable log
//! - Device-level live subscriptions (`devices.dev-1.resources`)
//! - Global subscriptions (`devices.>`)
//!
//! # Examples
//!
//! ```rust
//! use cim_resource_aggregate::subjects::{self, device_topics};
//!
//! assert_eq!(device_topics("dev-1"), vec!["devices.dev-1.resources".to_string()]);
//! assert_eq!(subjects::aggregate_subject("events", "dev-1", "a1"), "events.dev-1.a1");
//! assert!(subjects::subject_matches("devices.>", "devices.dev-1.resources"));
//! ```

/// Default prefix of the durable log
pub const EVENT_STORE_ROOT: &str = "events";

/// Root namespace of the live bus
pub const DEVICES_ROOT: &str = "devices";

/// Make an id safe to use as a single subject token
///
/// Separators, wildcards, whitespace, control characters and `%` itself are
/// percent-escaped byte by byte, so distinct ids always give distinct tokens.
pub fn token(id: &str) -> String {
    let mut token = String::with_capacity(id.len());
    for c in id.chars() {
        if matches!(c, '.' | '*' | '>' | '%') || c.is_whitespace() || c.is_control() {
            let mut utf8 = [0u8; 4];
            for byte in c.encode_utf8(&mut utf8).bytes() {
                token.push_str(&format!("%{byte:02X}"));
            }
        } else {
            token.push(c);
        }
    }
    token
}

/// Durable log subject of one aggregate
pub fn aggregate_subject(prefix: &str, group_id: &str, aggregate_id: &str) -> String {
    format!("{}.{}.{}", prefix, token(group_id), token(aggregate_id))
}

/// Durable log filter for every aggregate of a device
pub fn group_filter(prefix: &str, group_id: &str) -> String {
    format!("{}.{}.*", prefix, token(group_id))
}

/// Durable log filter for every aggregate
pub fn all_aggregates_filter(prefix: &str) -> String {
    format!("{}.>", prefix)
}

/// Live bus topics a device's resource events are published on
///
/// This is the default topic derivation used by projections.
pub fn device_topics(device_id: &str) -> Vec<String> {
    vec![format!("{}.{}.resources", DEVICES_ROOT, token(device_id))]
}

/// Live bus topic carrying events of every device
pub fn all_devices_topic() -> String {
    format!("{}.>", DEVICES_ROOT)
}

/// NATS wildcard matching
///
/// `*` matches exactly one token, a trailing `>` matches one or more tokens.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return pattern_tokens.next().is_none(),
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
