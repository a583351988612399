use std::time::{Duration, Instant};

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::metrics::{
    ALARMS_TOTAL, HANDLE_LATENCY_SECONDS, MALFORMED_MESSAGES_TOTAL, MESSAGES_TOTAL,
    STORE_FAILURES_TOTAL,
};
use crate::model::AlarmNotice;
use crate::pipeline::Pipeline;
use crate::topic::Topics;

/// Consume bus messages and drive the pipeline until the task is aborted.
pub async fn run_mqtt(config: &Config, pipeline: Pipeline) -> Result<()> {
    let options = connection_options(config);
    info!(
        "Connecting to MQTT broker at {}:{} as {}",
        config.mqtt_broker, config.mqtt_port, options.client_id()
    );

    let (client, mut eventloop) = AsyncClient::new(options, 100);

    loop {
        match eventloop.poll().await {
            // Subscriptions are (re)established on every connection.
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to MQTT broker");
                subscribe_all(&client, pipeline.topics()).await?;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                MESSAGES_TOTAL.inc();
                debug!(
                    "Received message on topic {}, size: {} bytes",
                    publish.topic,
                    publish.payload.len()
                );

                let started = Instant::now();
                match pipeline.handle_message(&publish.topic, &publish.payload).await {
                    Ok(Some(notice)) => {
                        ALARMS_TOTAL.inc();
                        if let Err(e) =
                            publish_alarm(&client, pipeline.topics().alarm(), &notice).await
                        {
                            error!("Failed to publish alarm notification: {}", e);
                        }
                    }
                    Ok(None) => {}
                    Err(Error::Malformed(reason)) => {
                        MALFORMED_MESSAGES_TOTAL.inc();
                        error!("Discarding malformed message on {}: {}", publish.topic, reason);
                    }
                    Err(Error::Storage(e)) => {
                        STORE_FAILURES_TOTAL.inc();
                        error!("Storage failure while handling {}: {}", publish.topic, e);
                    }
                    Err(e) => error!("Failed to handle message on {}: {}", publish.topic, e),
                }
                HANDLE_LATENCY_SECONDS.observe(started.elapsed().as_secs_f64());
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc reconnects on the next poll; just pace the retries
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Broker connection settings for one manager run. Client ids are unique
/// per run, so there is never a previous session to resume; start clean.
fn connection_options(config: &Config) -> MqttOptions {
    let client_id = format!("bin-manager-{}", Uuid::new_v4());
    let mut options = MqttOptions::new(client_id, &config.mqtt_broker, config.mqtt_port);
    options.set_keep_alive(Duration::from_secs(30));
    options.set_clean_session(true);
    if let Some(username) = &config.mqtt_username {
        options.set_credentials(username, config.mqtt_password.clone().unwrap_or_default());
    }
    options
}

async fn subscribe_all(client: &AsyncClient, topics: &Topics) -> Result<()> {
    for filter in topics.filters() {
        client.subscribe(filter.as_str(), QoS::AtMostOnce).await?;
        info!("Subscribed to {}", filter);
    }
    Ok(())
}

/// Publish a notice on the alarm topic. Called only after the alarm row is
/// persisted; a failure here leaves the stored alarm in place.
async fn publish_alarm(client: &AsyncClient, topic: &str, notice: &AlarmNotice) -> Result<()> {
    let payload = serde_json::to_string(notice)?;
    client.publish(topic, QoS::AtMostOnce, false, payload).await?;
    Ok(())
}
