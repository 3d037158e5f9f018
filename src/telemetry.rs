// Copyright (c) 2025 - Cowboy AI, Inc.
//! Tracing setup for binaries and integration tests

use tracing_subscriber::EnvFilter;

use crate::errors::{CqrsError, CqrsResult};

/// Install a `fmt` subscriber filtered by `RUST_LOG`
///
/// `default_directive` (e.g. `"info"` or `"cim_resource_aggregate=debug"`)
/// applies when `RUST_LOG` is unset. Fails if a global subscriber is already
/// installed.
pub fn init_tracing(default_directive: &str) -> CqrsResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| CqrsError::Configuration(format!("invalid log filter: {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| CqrsError::Configuration(format!("cannot install tracing subscriber: {e}")))
}
