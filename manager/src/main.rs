mod config;
mod errors;
mod metrics;
mod model;
mod mqtt;
mod pipeline;
mod rest;
mod store;
mod topic;

use std::time::Duration;

use axum::{routing::get, Router};
use tracing::{error, info};

use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::store::Store;
use crate::topic::Topics;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            std::process::exit(2);
        }
    };

    info!("Starting smart bin manager");
    info!("MQTT broker: {}:{}", config.mqtt_broker, config.mqtt_port);
    info!("HTTP server: {}", config.http_addr);
    info!("Database: {}", config.db_path);

    // Initialize metrics
    metrics::init_metrics();

    // Open the store. This is the only fatal startup condition.
    let store = match Store::open(&config.db_path, config.schema_policy).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    // Spawn the MQTT consumer
    let topics = Topics::new(&config.base_topic);
    let pipeline = Pipeline::new(store.clone(), topics, config.fill_threshold);
    let mqtt_config = config.clone();
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt::run_mqtt(&mqtt_config, pipeline).await {
            error!("MQTT task failed: {}", e);
        }
    });

    // Spawn the periodic store summary
    let summary_store = store.clone();
    let summary_interval = Duration::from_secs(config.poll_interval_secs.max(1));
    let summary_handle = tokio::spawn(async move {
        run_summary(summary_store, summary_interval).await;
    });

    // Build HTTP app with the query API and metrics endpoint
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(store));

    // Start HTTP server
    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    tokio::select! {
        _ = mqtt_handle => {
            error!("MQTT task terminated");
        }
        _ = summary_handle => {
            error!("Summary task terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
}

/// Log a one-line fleet summary on a fixed interval, the same cadence
/// external monitors poll the query API on.
async fn run_summary(store: Store, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match (store.distinct_bin_ids().await, store.list_active_alarms().await) {
            (Ok(bins), Ok(alarms)) => {
                info!("{} bins reporting, {} active alarms", bins.len(), alarms.len());
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("Store summary failed: {}", e);
            }
        }
    }
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
