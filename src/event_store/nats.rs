// Copyright (c) 2025 - Cowboy AI, Inc.
//! NATS JetStream Event Store Implementation
//!
//! This module implements the EventStore trait using NATS JetStream as the
//! persistent storage backend. Every aggregate owns one subject of the event
//! stream. A saved batch is one message, and its append carries the last known
//! subject sequence, so the server either stores the whole batch or rejects
//! the writer that lost the race.

use std::collections::BTreeMap;
use std::time::Duration;

use async_nats::jetstream::{self, stream::Stream};
use async_nats::HeaderMap;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::errors::{CqrsError, CqrsResult};
use crate::event_store::{
    validate_events_before_save, EventHandler, EventStore, SaveStatus, SnapshotQuery,
    VersionQuery,
};
use crate::events::{EventIter, StoredEvent};
use crate::jetstream::{ensure_event_stream, JetStreamConfig};
use crate::nats::NatsClient;
use crate::subjects;

const EXPECTED_LAST_SUBJECT_SEQUENCE: &str = "Nats-Expected-Last-Subject-Sequence";

/// Fetch batch size when reading a subject
const BATCH_SIZE: usize = 10000;

/// One event read back from the stream
///
/// Events of one message share its stream sequence. An undecodable message
/// becomes a single failed record.
struct Record {
    subject: String,
    stream_sequence: u64,
    event: CqrsResult<StoredEvent>,
}

impl Record {
    fn order_key(&self) -> (u64, u64) {
        (self.stream_sequence, self.version().unwrap_or(u64::MAX))
    }

    /// Subject tokens are escaped ids, the envelope is still authoritative
    fn belongs_to(&self, group_id: Option<&str>, aggregate_id: Option<&str>) -> bool {
        let Ok(event) = &self.event else {
            return true;
        };
        group_id.map_or(true, |g| g.is_empty() || event.group_id == g)
            && aggregate_id.map_or(true, |a| event.aggregate_id == a)
    }

    fn version(&self) -> Option<u64> {
        self.event.as_ref().ok().map(|e| e.version)
    }

    fn is_snapshot(&self) -> bool {
        self.event.as_ref().map(|e| e.is_snapshot).unwrap_or(false)
    }
}

/// NATS JetStream-backed event store
///
/// # Example
///
/// ```rust,no_run
/// use cim_resource_aggregate::event_store::NatsEventStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = NatsEventStore::connect("nats://localhost:4222").await?;
///     // Use store...
///     Ok(())
/// }
/// ```
pub struct NatsEventStore {
    /// NATS JetStream context
    jetstream: jetstream::Context,

    /// JetStream stream holding every aggregate subject
    stream: Stream,

    /// Base subject prefix (e.g., "events")
    subject_prefix: String,
}

impl NatsEventStore {
    /// Connect to NATS and create or get the event stream
    pub async fn connect(nats_url: &str) -> CqrsResult<Self> {
        let client = async_nats::connect(nats_url)
            .await
            .map_err(|e| CqrsError::NatsConnection(e.to_string()))?;

        Self::new(jetstream::new(client), JetStreamConfig::default()).await
    }

    /// Use an existing connection with custom configuration
    pub async fn connect_with_config(
        client: &NatsClient,
        config: JetStreamConfig,
    ) -> CqrsResult<Self> {
        Self::new(client.jetstream(), config).await
    }

    pub async fn new(jetstream: jetstream::Context, config: JetStreamConfig) -> CqrsResult<Self> {
        let stream = ensure_event_stream(jetstream.clone(), &config).await?;

        Ok(Self {
            jetstream,
            stream,
            subject_prefix: config.subject_prefix,
        })
    }

    fn subject(&self, group_id: &str, aggregate_id: &str) -> String {
        subjects::aggregate_subject(&self.subject_prefix, group_id, aggregate_id)
    }

    fn snapshot_filter(&self, query: &SnapshotQuery) -> String {
        match (&query.group_id, &query.aggregate_id) {
            (Some(group), Some(aggregate)) => self.subject(group, aggregate),
            (Some(group), None) => subjects::group_filter(&self.subject_prefix, group),
            (None, Some(aggregate)) => {
                format!("{}.*.{}", self.subject_prefix, subjects::token(aggregate))
            }
            (None, None) => subjects::all_aggregates_filter(&self.subject_prefix),
        }
    }

    /// Read every message matching a subject filter, in stream order
    async fn read(&self, filter_subject: String) -> CqrsResult<Vec<Record>> {
        let consumer = self
            .stream
            .create_consumer(jetstream::consumer::pull::Config {
                filter_subject: filter_subject.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| CqrsError::NatsConnection(e.to_string()))?;

        let mut records = Vec::new();

        loop {
            // An empty subject ends the fetch with a timeout, which is not an error
            let messages_result = consumer
                .fetch()
                .max_messages(BATCH_SIZE)
                .expires(Duration::from_secs(2))
                .messages()
                .await;

            let mut messages = match messages_result {
                Ok(msgs) => msgs,
                Err(e) => {
                    let err_msg = e.to_string().to_lowercase();
                    if err_msg.contains("timeout")
                        || err_msg.contains("timed out")
                        || err_msg.contains("no messages")
                    {
                        break;
                    }
                    return Err(CqrsError::NatsConnection(e.to_string()));
                }
            };

            let mut batch_count = 0;

            while let Some(message) = messages.next().await {
                let msg = message.map_err(|e| CqrsError::NatsConnection(e.to_string()))?;
                let stream_sequence = msg
                    .info()
                    .map_err(|e| CqrsError::NatsConnection(e.to_string()))?
                    .stream_sequence;

                let subject = msg.subject.to_string();
                match StoredEvent::batch_from_bytes(&msg.payload) {
                    Ok(events) => records.extend(events.into_iter().map(|event| Record {
                        subject: subject.clone(),
                        stream_sequence,
                        event: Ok(event),
                    })),
                    Err(err) => records.push(Record {
                        subject,
                        stream_sequence,
                        event: Err(err),
                    }),
                }

                msg.ack()
                    .await
                    .map_err(|e| CqrsError::NatsConnection(e.to_string()))?;

                batch_count += 1;
            }

            if batch_count < BATCH_SIZE {
                break;
            }
        }

        records.sort_by_key(Record::order_key);
        Ok(records)
    }

    /// Replay selected records of one aggregate per subject
    async fn dispatch(
        groups: BTreeMap<String, Vec<Record>>,
        handler: &dyn EventHandler,
    ) -> CqrsResult<()> {
        let mut first_err = None;
        for (subject, records) in groups {
            if records.is_empty() {
                continue;
            }
            debug!(subject = %subject, count = records.len(), "replaying aggregate");
            let iter = EventIter::new(records.into_iter().map(|r| r.event).collect::<Vec<_>>());
            if let Err(err) = handler.handle(iter).await {
                warn!(subject = %subject, error = %err, "replay of aggregate failed");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn load_filtered<F>(
        &self,
        queries: &[VersionQuery],
        handler: &dyn EventHandler,
        keep: F,
    ) -> CqrsResult<()>
    where
        F: Fn(u64, u64) -> bool + Send + Sync,
    {
        let mut groups = BTreeMap::new();
        for query in queries {
            let subject = self.subject(&query.group_id, &query.aggregate_id);
            let records: Vec<Record> = self
                .read(subject.clone())
                .await?
                .into_iter()
                .filter(|r| r.belongs_to(Some(query.group_id.as_str()), Some(query.aggregate_id.as_str())))
                .filter(|r| r.version().map_or(true, |v| keep(v, query.version)))
                .collect();
            groups.insert(subject, records);
        }
        Self::dispatch(groups, handler).await
    }
}

fn is_wrong_last_sequence(err: &impl std::fmt::Display) -> bool {
    err.to_string().to_lowercase().contains("wrong last sequence")
}

#[async_trait]
impl EventStore for NatsEventStore {
    async fn save(
        &self,
        group_id: &str,
        aggregate_id: &str,
        events: &[StoredEvent],
    ) -> CqrsResult<SaveStatus> {
        validate_events_before_save(group_id, aggregate_id, events)?;

        let subject = self.subject(group_id, aggregate_id);
        let existing = self.read(subject.clone()).await?;
        let next_version = existing
            .iter()
            .filter_map(Record::version)
            .last()
            .map_or(0, |v| v + 1);
        let last_sequence = existing.last().map_or(0, |r| r.stream_sequence);

        if events[0].version != next_version {
            debug!(
                aggregate_id = %aggregate_id,
                version = events[0].version,
                expected = next_version,
                "version already taken"
            );
            return Ok(SaveStatus::ConcurrencyException);
        }

        let payload = StoredEvent::batch_to_bytes(events)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            EXPECTED_LAST_SUBJECT_SEQUENCE,
            last_sequence.to_string().as_str(),
        );

        let ack = match self
            .jetstream
            .publish_with_headers(subject.clone(), headers, payload.into())
            .await
        {
            Ok(ack) => ack.await,
            Err(e) => return Err(CqrsError::NatsPublish(e.to_string())),
        };

        match ack {
            Ok(ack) => {
                debug!(subject = %subject, sequence = ack.sequence, events = events.len(), "batch appended");
            }
            Err(e) if is_wrong_last_sequence(&e) => {
                debug!(subject = %subject, expected = last_sequence, "lost append race");
                return Ok(SaveStatus::ConcurrencyException);
            }
            Err(e) => return Err(CqrsError::NatsPublish(e.to_string())),
        }

        Ok(SaveStatus::Ok)
    }

    async fn load_from_version(
        &self,
        queries: &[VersionQuery],
        handler: &dyn EventHandler,
    ) -> CqrsResult<()> {
        self.load_filtered(queries, handler, |v, from| v > from).await
    }

    async fn load_from_snapshot(
        &self,
        queries: &[SnapshotQuery],
        handler: &dyn EventHandler,
    ) -> CqrsResult<()> {
        let all = SnapshotQuery::all();
        let queries = if queries.is_empty() {
            std::slice::from_ref(&all)
        } else {
            queries
        };

        let mut groups: BTreeMap<String, Vec<Record>> = BTreeMap::new();
        for query in queries {
            let records = self.read(self.snapshot_filter(query)).await?;
            for record in records {
                if record.belongs_to(query.group_id.as_deref(), query.aggregate_id.as_deref()) {
                    groups.entry(record.subject.clone()).or_default().push(record);
                }
            }
        }

        for records in groups.values_mut() {
            records.sort_by_key(Record::order_key);
            records.dedup_by_key(|r| r.order_key());
            if let Some(start) = records.iter().rposition(Record::is_snapshot) {
                records.drain(..start);
            }
        }

        Self::dispatch(groups, handler).await
    }

    async fn load_up_to_version(
        &self,
        queries: &[VersionQuery],
        handler: &dyn EventHandler,
    ) -> CqrsResult<()> {
        self.load_filtered(queries, handler, |v, to| v < to).await
    }

    async fn remove_up_to_version(&self, queries: &[VersionQuery]) -> CqrsResult<()> {
        for query in queries {
            let subject = self.subject(&query.group_id, &query.aggregate_id);
            let records = self.read(subject.clone()).await?;
            let Some(snapshot) = records
                .iter()
                .filter(|r| r.is_snapshot() && r.version().is_some_and(|v| v <= query.version))
                .last()
            else {
                debug!(subject = %subject, "no snapshot below cutoff, nothing purged");
                continue;
            };

            // purge removes every message of the subject below this sequence
            let purged = self
                .stream
                .purge()
                .filter(subject.clone())
                .sequence(snapshot.stream_sequence)
                .await
                .map_err(|e| CqrsError::Storage(format!("purge {subject}: {e}")))?;
            debug!(subject = %subject, purged = purged.purged, "history purged");
        }
        Ok(())
    }
}
