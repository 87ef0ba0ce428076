mod acquisition;
mod clock;
mod cloud;
mod config;
mod connection;
mod errors;
mod metrics;
mod properties;
mod property;
mod registry;
mod rest;
mod summary;
mod weather;

use acquisition::SimulatedSensors;
use anyhow::Context;
use axum::{routing::get, Router};
use clap::Parser;
use clock::StationClock;
use cloud::Topics;
use config::Config;
use rand::SeedableRng;
use registry::PropertyRegistry;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting weather station");
    info!("MQTT broker: {}:{}", config.mqtt_broker, config.mqtt_port);
    info!("Thing: {} (topic prefix {})", config.thing_id, config.topic_prefix);
    info!("HTTP server: {}", config.http_addr);

    // Initialize metrics
    metrics::init_metrics();

    let connection = config
        .connection()
        .context("Invalid network credentials")?;
    info!("Using credentials {:?}", connection.credentials());

    // Registry is complete before any sync traffic starts
    let clock = StationClock::new();
    let mut registry = PropertyRegistry::new();
    properties::init_properties(&mut registry, clock.epoch_callback())
        .context("Failed to register properties")?;
    let registry = Arc::new(Mutex::new(registry));

    info!("Channel capacity: {}", config.channel_capacity);
    let (tx, rx) = mpsc::channel(config.channel_capacity);

    let acquisition_clock = clock.clone();
    let sample_interval = config.sample_interval();
    let acquisition_handle = tokio::spawn(async move {
        let sensors = SimulatedSensors::new(rand::rngs::StdRng::from_entropy());
        acquisition::run_acquisition(sensors, acquisition_clock, tx, sample_interval).await;
    });

    let topics = Topics::new(&config.topic_prefix, &config.thing_id);
    let cloud_registry = registry.clone();
    let cloud_clock = clock.clone();
    let flush_interval = config.flush_interval();
    let cloud_handle = tokio::spawn(async move {
        if let Err(e) =
            cloud::run_cloud(connection, topics, cloud_registry, cloud_clock, rx, flush_interval).await
        {
            error!("Cloud task failed: {}", e);
        }
    });

    // Build HTTP app with REST API and metrics endpoint
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(registry, clock));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.http_addr))?;

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = acquisition_handle => {
            error!("Acquisition task terminated");
        }
        _ = cloud_handle => {
            error!("Cloud task terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
    Ok(())
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
