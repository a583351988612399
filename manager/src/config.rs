use anyhow::{Context, Result};

use crate::store::SchemaPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    /// Root of the bin topic scheme, e.g. `municipal/bins`.
    pub base_topic: String,
    pub db_path: String,
    pub schema_policy: SchemaPolicy,
    pub http_addr: String,
    /// Fill percentage at or above which a HIGH_FILL alarm is raised.
    pub fill_threshold: f64,
    /// Interval of the periodic store summary log, in seconds.
    pub poll_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            mqtt_broker: optional("MQTT_BROKER", "localhost"),
            mqtt_port: optional("MQTT_PORT", "1883")
                .parse()
                .context("MQTT_PORT must be a valid port number")?,
            mqtt_username: nonempty("MQTT_USERNAME"),
            mqtt_password: nonempty("MQTT_PASSWORD"),
            base_topic: optional("BASE_TOPIC", "municipal/bins"),
            db_path: optional("DB_PATH", "bin_data.db"),
            schema_policy: optional("DB_SCHEMA_POLICY", "preserve")
                .parse()
                .map_err(anyhow::Error::msg)?,
            http_addr: optional("HTTP_ADDR", "0.0.0.0:8080"),
            fill_threshold: optional("FILL_LEVEL_THRESHOLD", "80.0")
                .parse()
                .context("FILL_LEVEL_THRESHOLD must be a number")?,
            poll_interval_secs: optional("POLL_INTERVAL_SECS", "10")
                .parse()
                .context("POLL_INTERVAL_SECS must be a positive integer")?,
        })
    }
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
