// Copyright (c) 2025 - Cowboy AI, Inc.
//! Resource Projector Service
//!
//! Follows a set of devices and keeps their resource read models current:
//! - Replays each device from the JetStream event store
//! - Stays current through the NATS event bus
//!
//! Run with: cargo run --bin resource-projector
//!
//! Environment:
//! 1. `NATS_URL`, `NATS_STREAM` (see `ResourceAggregateConfig::from_env`)
//! 2. `PROJECT_DEVICES`: comma separated device ids to follow
//! 3. `PROJECTOR_SUBSCRIPTION`: queue group of this projector (default: resource-projector)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cim_resource_aggregate::{
    projection::TopicsFn, subjects, telemetry, BoundedSpawner, NatsClient, NatsEventBus,
    NatsEventStore, NotificationContainers, ResourceAggregateConfig, ResourceModel,
    ResourceProjection,
};
use tracing::{info, warn};

const REPORT_INTERVAL: Duration = Duration::from_secs(60);

fn devices_from_env() -> Result<Vec<String>> {
    let devices = std::env::var("PROJECT_DEVICES").context("PROJECT_DEVICES not set")?;
    let devices: Vec<String> = devices
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(String::from)
        .collect();
    anyhow::ensure!(!devices.is_empty(), "PROJECT_DEVICES lists no device");
    Ok(devices)
}

fn report(projection: &ResourceProjection<ResourceModel>, devices: &[String]) {
    for device_id in devices {
        let models = projection.models(device_id, None);
        let published = models.iter().filter(|m| m.is_published()).count();
        let pending: usize = models.iter().map(|m| m.pending().len()).sum();
        info!(
            device_id = %device_id,
            resources = models.len(),
            published,
            pending,
            "📊 device read model"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing("info")?;

    info!("🚀 Starting Resource Projector Service");

    let config = ResourceAggregateConfig::from_env()?;
    let devices = devices_from_env()?;
    let subscription_id = std::env::var("PROJECTOR_SUBSCRIPTION")
        .unwrap_or_else(|_| "resource-projector".to_string());
    info!(servers = ?config.nats.servers, stream = %config.jetstream.stream_name, "📋 Configuration loaded");

    let client = NatsClient::new(&config.nats)
        .await
        .context("Failed to connect to NATS")?;
    let store = NatsEventStore::connect_with_config(&client, config.jetstream.clone())
        .await
        .context("Failed to open event store")?;
    let bus = NatsEventBus::with_submitter(client.clone(), Arc::new(BoundedSpawner::new(64)?));
    info!("✅ Connected to NATS");

    let notifications = Arc::new(NotificationContainers::new());
    let topics: TopicsFn = Arc::new(subjects::device_topics);
    let projection = ResourceProjection::new(
        &subscription_id,
        Arc::new(store),
        &bus,
        ResourceModel::factory(Some(notifications)),
        topics,
    )
    .await
    .context("Failed to create projection")?;

    for device_id in &devices {
        projection
            .register(device_id)
            .await
            .with_context(|| format!("Failed to register device {device_id}"))?;
    }
    info!(devices = devices.len(), "🎧 Following devices");
    report(&projection, &devices);

    let mut ticker = tokio::time::interval(REPORT_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => report(&projection, &devices),
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "⚠️ Cannot listen for shutdown signal");
                }
                break;
            }
        }
    }

    info!("🛑 Shutting down");
    for device_id in &devices {
        if let Err(e) = projection.unregister(device_id).await {
            warn!(device_id = %device_id, error = %e, "⚠️ Failed to unregister device");
        }
    }
    projection.close().await?;
    Ok(())
}
