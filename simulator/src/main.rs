mod actuator;
mod bin_task;
mod sensor;

use std::time::Duration;

use clap::Parser;
use rumqttc::{AsyncClient, MqttOptions};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::actuator::ActuatorState;
use crate::bin_task::{actuator_task, sensor_task, BinSettings};

#[derive(Debug, Parser)]
#[command(name = "smartbin-simulator", about = "Fleet of emulated smart waste bins")]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    #[arg(long, env = "MQTT_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD")]
    password: Option<String>,

    #[arg(long, env = "BASE_TOPIC", default_value = "municipal/bins")]
    base_topic: String,

    /// Number of bins to emulate
    #[arg(long, env = "BINS", default_value_t = 3)]
    bins: usize,

    /// Seconds between sensor readings
    #[arg(long, env = "INTERVAL_SECS", default_value_t = 1)]
    interval_secs: u64,

    /// Fill percentage added per reading (clamped to 0..10)
    #[arg(long, env = "FILL_RATE", default_value_t = 1.0)]
    fill_rate: f64,

    /// Fill percentage that triggers automatic emptying
    #[arg(long, env = "FILL_THRESHOLD", default_value_t = 80.0)]
    fill_threshold: f64,

    /// Fill percentage at or below which a bin reports as recently emptied
    #[arg(long, env = "EMPTY_THRESHOLD", default_value_t = 5.0)]
    empty_threshold: f64,

    /// Probability that an emptying cycle fails with an actuator error
    #[arg(long, env = "ERROR_RATE", default_value_t = 0.0)]
    error_rate: f64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    info!("Starting bin simulator");
    info!("Broker: {}:{}, Bins: {}", args.broker, args.port, args.bins);

    let client_id = format!("bin-sim-{}", Uuid::new_v4());
    let mut mqtt_options = MqttOptions::new(&client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);
    if let Some(username) = &args.username {
        mqtt_options.set_credentials(username, args.password.clone().unwrap_or_default());
    }

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 256);

    let cancel = CancellationToken::new();

    // Spawn eventloop handler
    let eventloop_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = eventloop_cancel.cancelled() => break,
                event = eventloop.poll() => {
                    if let Err(e) = event {
                        error!("MQTT eventloop error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(2)).await;

    info!("Connected to MQTT broker, starting bins");

    let base_topic = args.base_topic.trim_end_matches('/').to_string();
    let mut handles = Vec::new();
    for index in 0..args.bins {
        let settings = BinSettings {
            bin_id: format!("bin_{}", 1000 + index),
            base_topic: base_topic.clone(),
            interval: Duration::from_secs(args.interval_secs.max(1)),
            fill_rate: args.fill_rate,
            fill_threshold: args.fill_threshold,
            empty_threshold: args.empty_threshold,
            error_rate: args.error_rate,
        };

        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        let (state_tx, state_rx) = watch::channel(ActuatorState::Idle);

        handles.push(tokio::spawn(sensor_task(
            settings.clone(),
            client.clone(),
            cmd_tx,
            state_rx,
            cancel.clone(),
        )));
        handles.push(tokio::spawn(actuator_task(
            settings,
            client.clone(),
            cmd_rx,
            state_tx,
            cancel.clone(),
        )));
    }

    info!("{} bins running, Ctrl-C to stop", args.bins);

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Stop signal received, shutting down bins");
    cancel.cancel();

    for handle in handles {
        if tokio::time::timeout(Duration::from_secs(1), handle).await.is_err() {
            warn!("Bin task did not stop within 1s");
        }
    }

    let _ = client.disconnect().await;
    info!("Simulator stopped");
}
