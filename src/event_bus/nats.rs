// Copyright (c) 2025 - Cowboy AI, Inc.
//! NATS event bus
//!
//! Publishes each batch as one JSON message per topic on core NATS. Every
//! subscribed topic is a queue subscription whose queue group is the
//! subscription id, so replicas of one projection share the load.
//!
//! ```text
//! publish ─► devices.{device}.resources ─► [queue: subscription_id] ─► TaskSubmitter ─► handler
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{EventPublisher, EventSubscriber, Observer};
use crate::errors::{CqrsError, CqrsResult};
use crate::event_store::EventHandler;
use crate::events::{EventIter, StoredEvent};
use crate::nats::NatsClient;
use crate::pool::{TaskSubmitter, TokioSpawner};

/// Core NATS publish/subscribe for persisted events
#[derive(Clone)]
pub struct NatsEventBus {
    client: NatsClient,
    submitter: Arc<dyn TaskSubmitter>,
}

impl NatsEventBus {
    pub fn new(client: NatsClient) -> Self {
        Self::with_submitter(client, Arc::new(TokioSpawner))
    }

    /// Dispatch incoming batches through `submitter`
    pub fn with_submitter(client: NatsClient, submitter: Arc<dyn TaskSubmitter>) -> Self {
        Self { client, submitter }
    }
}

#[async_trait]
impl EventPublisher for NatsEventBus {
    async fn publish(
        &self,
        topics: &[String],
        group_id: &str,
        aggregate_id: &str,
        events: &[StoredEvent],
    ) -> CqrsResult<()> {
        let payload = StoredEvent::batch_to_bytes(events)?;
        for topic in topics {
            self.client.publish(topic, payload.clone()).await?;
        }
        debug!(
            device_id = %group_id,
            aggregate_id = %aggregate_id,
            events = events.len(),
            topics = topics.len(),
            "events published"
        );
        Ok(())
    }
}

struct NatsObserver {
    client: NatsClient,
    queue: String,
    handler: Arc<dyn EventHandler>,
    submitter: Arc<dyn TaskSubmitter>,
    listeners: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl NatsObserver {
    async fn listen(&self, topic: &str) -> CqrsResult<JoinHandle<()>> {
        let mut subscriber = self.client.queue_subscribe(topic, &self.queue).await?;
        let handler = Arc::clone(&self.handler);
        let submitter = Arc::clone(&self.submitter);
        let topic = topic.to_string();

        Ok(tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                let events = match StoredEvent::batch_from_bytes(&message.payload) {
                    Ok(events) => events,
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "dropping undecodable batch");
                        continue;
                    }
                };
                let handler = Arc::clone(&handler);
                let topic_name = topic.clone();
                let task = Box::pin(async move {
                    if let Err(e) = handler.handle(EventIter::from_events(events)).await {
                        error!(topic = %topic_name, error = %e, "cannot handle events");
                    }
                });
                if let Err(e) = submitter.submit(task) {
                    error!(topic = %topic, error = %e, "cannot submit event batch");
                }
            }
            debug!(topic = %topic, "subscription ended");
        }))
    }
}

#[async_trait]
impl Observer for NatsObserver {
    async fn set_topics(&self, topics: Vec<String>) -> CqrsResult<()> {
        let mut listeners = self.listeners.lock().await;

        let stale: Vec<String> = listeners
            .keys()
            .filter(|t| !topics.contains(t))
            .cloned()
            .collect();
        for topic in stale {
            if let Some(listener) = listeners.remove(&topic) {
                listener.abort();
            }
        }

        for topic in topics {
            if listeners.contains_key(&topic) {
                continue;
            }
            let listener = self.listen(&topic).await?;
            listeners.insert(topic, listener);
        }

        info!(queue = %self.queue, topics = listeners.len(), "subscription topics updated");
        Ok(())
    }

    async fn close(&self) -> CqrsResult<()> {
        let mut listeners = self.listeners.lock().await;
        for (_, listener) in listeners.drain() {
            listener.abort();
        }
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for NatsEventBus {
    async fn subscribe(
        &self,
        subscription_id: &str,
        topics: Vec<String>,
        handler: Arc<dyn EventHandler>,
    ) -> CqrsResult<Box<dyn Observer>> {
        if subscription_id.is_empty() {
            return Err(CqrsError::InvalidArgument("invalid subscription id".to_string()));
        }
        let observer = NatsObserver {
            client: self.client.clone(),
            queue: subscription_id.to_string(),
            handler,
            submitter: Arc::clone(&self.submitter),
            listeners: Mutex::new(HashMap::new()),
        };
        observer.set_topics(topics).await?;
        Ok(Box::new(observer))
    }
}
