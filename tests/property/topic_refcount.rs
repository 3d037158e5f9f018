// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for Topic Reference Counting
//!
//! Devices share topics. Whatever the interleaving of registrations, the
//! subscribed set must be exactly the topics with a live reference, and the
//! observer must only be touched when that set changes.

use std::collections::BTreeMap;

use proptest::prelude::*;

use cim_resource_aggregate::projection::TopicManager;

fn device_topics(device: u8) -> Vec<String> {
    // every device shares a broadcast topic and a per-parity topic
    vec![
        format!("devices.d{device}.resources"),
        format!("devices.group{}", device % 2),
        "devices.broadcast".to_string(),
    ]
}

#[derive(Debug, Clone)]
enum Step {
    Add(u8),
    Remove(u8),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0u8..4).prop_map(Step::Add),
        (0u8..4).prop_map(Step::Remove),
    ]
}

proptest! {
    /// Property: Subscribed Set Equals Live References
    #[test]
    fn prop_topics_track_live_references(steps in prop::collection::vec(step(), 0..60)) {
        let mut manager = TopicManager::new();
        let mut registrations: BTreeMap<u8, usize> = BTreeMap::new();

        for step in steps {
            let before = manager.topics();
            let changed = match step {
                Step::Add(device) => {
                    *registrations.entry(device).or_insert(0) += 1;
                    manager.add(&device_topics(device))
                }
                Step::Remove(device) => {
                    // only devices with a registration are ever removed
                    match registrations.get_mut(&device) {
                        Some(count) if *count > 0 => {
                            *count -= 1;
                            manager.remove(&device_topics(device))
                        }
                        _ => continue,
                    }
                }
            };

            let mut expected: Vec<String> = registrations
                .iter()
                .filter(|(_, count)| **count > 0)
                .flat_map(|(device, _)| device_topics(*device))
                .collect();
            expected.sort();
            expected.dedup();

            prop_assert_eq!(manager.topics(), expected.clone());
            match changed {
                Some(all) => {
                    prop_assert_eq!(all, expected.clone());
                    prop_assert_ne!(before, expected);
                }
                None => prop_assert_eq!(before, expected),
            }
        }
    }

    /// Property: Balanced Registrations Leave Nothing Behind
    #[test]
    fn prop_balanced_registrations_empty_the_set(
        devices in prop::collection::vec(0u8..4, 1..20),
        seed in any::<u64>(),
    ) {
        let mut manager = TopicManager::new();
        for device in &devices {
            manager.add(&device_topics(*device));
        }
        prop_assert_eq!(manager.ref_count("devices.broadcast"), devices.len());

        // remove in a rotated order
        let shift = (seed % devices.len() as u64) as usize;
        let mut order = devices.clone();
        order.rotate_left(shift);
        for device in order {
            manager.remove(&device_topics(device));
        }
        prop_assert!(manager.is_empty());
    }
}
