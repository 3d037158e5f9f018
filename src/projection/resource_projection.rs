// Copyright (c) 2025 - Cowboy AI, Inc.
//! Device-level projection with reference-counted registration
//!
//! Many callers may follow the same device. The first registration
//! subscribes the device's topics and replays its history; later ones only
//! bump the count. The last unregistration drops the topics and the models.
//!
//! # Locking
//!
//! ```text
//! devices: DashMap<device_id, Arc<DeviceEntry>>      per-key locking, no global lock
//!   DeviceEntry.registration: tokio Mutex             serializes register/unregister
//!                                                     and live batch application
//! topics: tokio Mutex<TopicManager>                   serializes subscription updates
//! ```
//!
//! Lock order is always device entry first, then topics.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{Projection, ProjectionFactory, ProjectionModel, TopicManager};
use crate::errors::{CqrsError, CqrsResult};
use crate::event_bus::{EventSubscriber, Observer};
use crate::event_store::{EventHandler, EventStore, SnapshotQuery};
use crate::events::{EventIter, StoredEvent};

/// Derives the bus topics of a device
pub type TopicsFn = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

#[derive(Debug, Default)]
struct Registration {
    ref_count: usize,
    released: bool,
}

#[derive(Debug, Default)]
struct DeviceEntry {
    registration: Mutex<Registration>,
}

type Devices = DashMap<String, Arc<DeviceEntry>>;

/// Bus handler applying live batches to registered devices
struct LiveEvents<M> {
    projection: Arc<Projection<M>>,
    devices: Arc<Devices>,
}

fn split_by_device(events: Vec<StoredEvent>) -> Vec<(String, Vec<StoredEvent>)> {
    let mut batches: Vec<(String, Vec<StoredEvent>)> = Vec::new();
    for event in events {
        match batches.iter_mut().find(|(device_id, _)| *device_id == event.group_id) {
            Some((_, batch)) => batch.push(event),
            None => batches.push((event.group_id.clone(), vec![event])),
        }
    }
    batches
}

#[async_trait]
impl<M: ProjectionModel> EventHandler for LiveEvents<M> {
    async fn handle(&self, mut iter: EventIter) -> CqrsResult<()> {
        let events: Vec<StoredEvent> = iter.by_ref().collect();
        if let Err(e) = iter.finish() {
            warn!(error = %e, "batch truncated by undecodable event");
        }

        for (device_id, batch) in split_by_device(events) {
            let Some(entry) = self.devices.get(&device_id).map(|e| Arc::clone(e.value())) else {
                debug!(device_id = %device_id, "ignoring events of unregistered device");
                continue;
            };
            let registration = entry.registration.lock().await;
            if registration.released {
                continue;
            }
            if let Err(e) = self
                .projection
                .handle_with_reload(EventIter::from_events(batch))
                .await
            {
                error!(device_id = %device_id, error = %e, "cannot project events");
            }
        }
        Ok(())
    }
}

/// Live per-device read models shared by every registration
pub struct ResourceProjection<M> {
    projection: Arc<Projection<M>>,
    devices: Arc<Devices>,
    topics: Mutex<TopicManager>,
    topics_fn: TopicsFn,
    observer: Box<dyn Observer>,
}

impl<M: ProjectionModel> ResourceProjection<M> {
    /// Subscribe `subscription_id` with an empty topic set
    pub async fn new(
        subscription_id: &str,
        store: Arc<dyn EventStore>,
        subscriber: &dyn EventSubscriber,
        factory: ProjectionFactory<M>,
        topics_fn: TopicsFn,
    ) -> CqrsResult<Self> {
        let projection = Arc::new(Projection::new(store, factory));
        let devices: Arc<Devices> = Arc::new(DashMap::new());
        let handler = Arc::new(LiveEvents {
            projection: Arc::clone(&projection),
            devices: Arc::clone(&devices),
        });
        let observer = subscriber
            .subscribe(subscription_id, Vec::new(), handler)
            .await
            .map_err(|e| e.context("cannot create resource projection"))?;
        Ok(Self {
            projection,
            devices,
            topics: Mutex::new(TopicManager::new()),
            topics_fn,
            observer,
        })
    }

    /// Follow a device; `true` when this call created the registration
    pub async fn register(&self, device_id: &str) -> CqrsResult<bool> {
        if device_id.is_empty() {
            return Err(CqrsError::InvalidArgument("invalid device id".to_string()));
        }
        loop {
            let entry = Arc::clone(self.devices.entry(device_id.to_string()).or_default().value());
            let mut registration = entry.registration.lock().await;
            if registration.released {
                continue;
            }
            registration.ref_count += 1;
            if registration.ref_count > 1 {
                return Ok(false);
            }

            if let Err(e) = self.subscribe_topics(device_id).await {
                error!(device_id = %device_id, error = %e, "cannot subscribe device topics");
                self.release(device_id, &entry, &mut registration);
                return Err(e.context(format_args!("cannot register device {device_id}")));
            }
            if let Err(e) = self.projection.project(&[SnapshotQuery::group(device_id)]).await {
                error!(device_id = %device_id, error = %e, "cannot replay device");
                if let Err(e) = self.unsubscribe_topics(device_id).await {
                    warn!(device_id = %device_id, error = %e, "cannot drop device topics");
                }
                self.release(device_id, &entry, &mut registration);
                return Err(e.context(format_args!("cannot register device {device_id}")));
            }

            info!(device_id = %device_id, "device registered");
            return Ok(true);
        }
    }

    /// Stop following a device; fails with `NotFound` when not registered
    pub async fn unregister(&self, device_id: &str) -> CqrsResult<()> {
        let not_found = || CqrsError::NotFound(format!("device {device_id} is not registered"));
        let entry = self
            .devices
            .get(device_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(not_found)?;
        let mut registration = entry.registration.lock().await;
        if registration.released || registration.ref_count == 0 {
            return Err(not_found());
        }
        registration.ref_count -= 1;
        if registration.ref_count > 0 {
            return Ok(());
        }

        let unsubscribed = self.unsubscribe_topics(device_id).await;
        self.release(device_id, &entry, &mut registration);
        info!(device_id = %device_id, "device unregistered");
        unsubscribed.map_err(|e| e.context(format_args!("cannot unregister device {device_id}")))
    }

    /// Replay one aggregate of a registered device right now
    pub async fn force_update(&self, device_id: &str, aggregate_id: &str) -> CqrsResult<()> {
        let entry = self
            .devices
            .get(device_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| CqrsError::NotFound(format!("device {device_id} is not registered")))?;
        let registration = entry.registration.lock().await;
        if registration.released {
            return Err(CqrsError::NotFound(format!(
                "device {device_id} is not registered"
            )));
        }
        self.projection
            .project(&[SnapshotQuery::aggregate(device_id, aggregate_id)])
            .await
            .map_err(|e| e.context(format_args!("cannot force update of {aggregate_id}")))
    }

    /// Number of live registrations of a device
    pub async fn ref_count(&self, device_id: &str) -> usize {
        let Some(entry) = self.devices.get(device_id).map(|e| Arc::clone(e.value())) else {
            return 0;
        };
        let registration = entry.registration.lock().await;
        if registration.released {
            0
        } else {
            registration.ref_count
        }
    }

    /// Topics currently subscribed on the bus
    pub async fn topics(&self) -> Vec<String> {
        self.topics.lock().await.topics()
    }

    pub async fn close(&self) -> CqrsResult<()> {
        self.observer.close().await
    }

    async fn subscribe_topics(&self, device_id: &str) -> CqrsResult<()> {
        let device_topics = (self.topics_fn)(device_id);
        let mut topics = self.topics.lock().await;
        if let Some(all) = topics.add(&device_topics) {
            if let Err(e) = self.observer.set_topics(all).await {
                topics.remove(&device_topics);
                return Err(e);
            }
            debug!(device_id = %device_id, "subscription topics extended");
        }
        Ok(())
    }

    async fn unsubscribe_topics(&self, device_id: &str) -> CqrsResult<()> {
        let device_topics = (self.topics_fn)(device_id);
        let mut topics = self.topics.lock().await;
        if let Some(all) = topics.remove(&device_topics) {
            self.observer.set_topics(all).await?;
            debug!(device_id = %device_id, "subscription topics reduced");
        }
        Ok(())
    }

    fn release(&self, device_id: &str, entry: &Arc<DeviceEntry>, registration: &mut Registration) {
        registration.ref_count = 0;
        registration.released = true;
        // models go before the entry, a successor registration replays into a clean slate
        self.projection.forget(&[SnapshotQuery::group(device_id)]);
        self.devices
            .remove_if(device_id, |_, current| Arc::ptr_eq(current, entry));
    }
}

impl<M: ProjectionModel + Clone> ResourceProjection<M> {
    /// Models of a device, optionally narrowed to one aggregate
    pub fn models(&self, device_id: &str, aggregate_id: Option<&str>) -> Vec<M> {
        let query = match aggregate_id {
            Some(aggregate_id) => SnapshotQuery::aggregate(device_id, aggregate_id),
            None => SnapshotQuery::group(device_id),
        };
        let mut models = Vec::new();
        self.projection.models(&[query], |m| models.push(m.clone()));
        models
    }
}
