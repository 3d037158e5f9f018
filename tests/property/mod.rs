// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests Module
//!
//! - `resource_history`: version ordering, snapshot equivalence and
//!   redelivery tolerance of resource histories
//! - `topic_refcount`: reference counted topic sets stay balanced

mod resource_history;
mod topic_refcount;
