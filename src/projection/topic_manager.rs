// Copyright (c) 2025 - Cowboy AI, Inc.
//! Reference-counted bus topics
//!
//! ```text
//! add(["devices.a.resources"])   refs: {a: 1}        → Some([a])   subscription changes
//! add(["devices.a.resources"])   refs: {a: 2}        → None
//! remove(["devices.a.resources"]) refs: {a: 1}       → None
//! remove(["devices.a.resources"]) refs: {}           → Some([])    subscription changes
//! ```
//!
//! A topic is part of the subscription set iff its count is above zero.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct TopicManager {
    refs: BTreeMap<String, usize>,
}

impl TopicManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn distinct(topics: &[String]) -> BTreeSet<&String> {
        topics.iter().collect()
    }

    /// Count `topics` once more
    ///
    /// Returns the full topic set when at least one topic entered it.
    pub fn add(&mut self, topics: &[String]) -> Option<Vec<String>> {
        let mut changed = false;
        for topic in Self::distinct(topics) {
            let count = self.refs.entry(topic.clone()).or_insert(0);
            *count += 1;
            changed |= *count == 1;
        }
        changed.then(|| self.topics())
    }

    /// Count `topics` once less
    ///
    /// Returns the full topic set when at least one topic left it. Topics
    /// that are not counted are skipped.
    pub fn remove(&mut self, topics: &[String]) -> Option<Vec<String>> {
        let mut changed = false;
        for topic in Self::distinct(topics) {
            let Some(count) = self.refs.get_mut(topic) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                self.refs.remove(topic);
                changed = true;
            }
        }
        changed.then(|| self.topics())
    }

    /// Current subscription set, sorted
    pub fn topics(&self) -> Vec<String> {
        self.refs.keys().cloned().collect()
    }

    pub fn ref_count(&self, topic: &str) -> usize {
        self.refs.get(topic).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}
