// Copyright (c) 2025 - Cowboy AI, Inc.
//! Error types for the resource engine
//!
//! Rejections from the command path carry a gRPC-like [`ErrorCode`] so that
//! gateways can map them onto their own status model. Optimistic concurrency
//! conflicts are not errors; see [`crate::event_store::SaveStatus`].

use std::fmt;

use thiserror::Error;

/// Status code attached to every [`CqrsError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    FailedPrecondition,
    Unauthenticated,
    Internal,
    Unimplemented,
    Unavailable,
    DeadlineExceeded,
    Aborted,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::InvalidArgument => "InvalidArgument",
            ErrorCode::NotFound => "NotFound",
            ErrorCode::FailedPrecondition => "FailedPrecondition",
            ErrorCode::Unauthenticated => "Unauthenticated",
            ErrorCode::Internal => "Internal",
            ErrorCode::Unimplemented => "Unimplemented",
            ErrorCode::Unavailable => "Unavailable",
            ErrorCode::DeadlineExceeded => "DeadlineExceeded",
            ErrorCode::Aborted => "Aborted",
        };
        f.write_str(s)
    }
}

/// Errors that can occur in the resource engine
#[derive(Debug, Clone, Error)]
pub enum CqrsError {
    /// Malformed input: missing metadata, bad content, mismatched identity
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Aggregate or registration does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Aggregate is not in a state that allows the command
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Access to the aggregate was denied
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Invariant violated inside the engine
    #[error("internal error: {0}")]
    Internal(String),

    /// Command is not understood by the aggregate model
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// NATS connection error
    #[error("NATS connection error: {0}")]
    NatsConnection(String),

    /// NATS publish error
    #[error("NATS publish error: {0}")]
    NatsPublish(String),

    /// NATS subscribe error
    #[error("NATS subscribe error: {0}")]
    NatsSubscribe(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Backing store failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Optimistic concurrency retries ran out
    #[error("retry limit reached: {0}")]
    RetryExhausted(String),
}

impl CqrsError {
    /// Status code of this error
    pub fn code(&self) -> ErrorCode {
        match self {
            CqrsError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            CqrsError::NotFound(_) => ErrorCode::NotFound,
            CqrsError::FailedPrecondition(_) => ErrorCode::FailedPrecondition,
            CqrsError::Unauthenticated(_) => ErrorCode::Unauthenticated,
            CqrsError::Internal(_) => ErrorCode::Internal,
            CqrsError::Unimplemented(_) => ErrorCode::Unimplemented,
            CqrsError::NatsConnection(_)
            | CqrsError::NatsPublish(_)
            | CqrsError::NatsSubscribe(_)
            | CqrsError::Storage(_) => ErrorCode::Unavailable,
            CqrsError::Serialization(_)
            | CqrsError::Deserialization(_)
            | CqrsError::Configuration(_) => ErrorCode::Internal,
            CqrsError::Timeout(_) => ErrorCode::DeadlineExceeded,
            CqrsError::RetryExhausted(_) => ErrorCode::Aborted,
        }
    }

    /// Prefix the message with context, keeping the status code
    pub fn context(self, ctx: impl fmt::Display) -> Self {
        let wrap = |msg: String| format!("{ctx}: {msg}");
        match self {
            CqrsError::InvalidArgument(m) => CqrsError::InvalidArgument(wrap(m)),
            CqrsError::NotFound(m) => CqrsError::NotFound(wrap(m)),
            CqrsError::FailedPrecondition(m) => CqrsError::FailedPrecondition(wrap(m)),
            CqrsError::Unauthenticated(m) => CqrsError::Unauthenticated(wrap(m)),
            CqrsError::Internal(m) => CqrsError::Internal(wrap(m)),
            CqrsError::Unimplemented(m) => CqrsError::Unimplemented(wrap(m)),
            CqrsError::NatsConnection(m) => CqrsError::NatsConnection(wrap(m)),
            CqrsError::NatsPublish(m) => CqrsError::NatsPublish(wrap(m)),
            CqrsError::NatsSubscribe(m) => CqrsError::NatsSubscribe(wrap(m)),
            CqrsError::Serialization(m) => CqrsError::Serialization(wrap(m)),
            CqrsError::Deserialization(m) => CqrsError::Deserialization(wrap(m)),
            CqrsError::Configuration(m) => CqrsError::Configuration(wrap(m)),
            CqrsError::Timeout(m) => CqrsError::Timeout(wrap(m)),
            CqrsError::Storage(m) => CqrsError::Storage(wrap(m)),
            CqrsError::RetryExhausted(m) => CqrsError::RetryExhausted(wrap(m)),
        }
    }
}

/// Result type for resource engine operations
pub type CqrsResult<T> = Result<T, CqrsError>;

impl From<async_nats::Error> for CqrsError {
    fn from(err: async_nats::Error) -> Self {
        CqrsError::NatsConnection(err.to_string())
    }
}

impl From<serde_json::Error> for CqrsError {
    fn from(err: serde_json::Error) -> Self {
        CqrsError::Serialization(err.to_string())
    }
}
