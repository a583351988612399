use chrono::Utc;
use tracing::{debug, warn};

use crate::errors::{Error, Result};
use crate::model::{ActuatorState, AlarmKind, AlarmNotice, EventKind};
use crate::store::Store;
use crate::topic::{Classified, TelemetryKind, Topics};

/// Turns delivered bus messages into store rows and alarm notices.
pub struct Pipeline {
    store: Store,
    topics: Topics,
    fill_threshold: f64,
}

impl Pipeline {
    pub fn new(store: Store, topics: Topics, fill_threshold: f64) -> Self {
        Pipeline {
            store,
            topics,
            fill_threshold,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Handle one delivered message to completion.
    ///
    /// When a rule fired, the returned notice is ready to publish and its
    /// alarm row is already persisted. Malformed payloads and storage
    /// failures abort the message with no further side effects.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> Result<Option<AlarmNotice>> {
        let (bin_id, kind) = match self.topics.classify(topic) {
            Classified::Telemetry { bin_id, kind } => (bin_id, kind),
            Classified::AlarmEcho => {
                debug!("Ignoring own alarm notification echoed on {}", topic);
                return Ok(None);
            }
            Classified::UnknownKind { kind } => {
                debug!("Ignoring unknown data kind '{}' on topic {}", kind, topic);
                return Ok(None);
            }
            Classified::Foreign => {
                debug!("Ignoring message on unrelated topic {}", topic);
                return Ok(None);
            }
        };

        let text = std::str::from_utf8(payload)
            .map_err(|_| Error::Malformed(format!("payload on {topic} is not valid UTF-8")))?;

        match kind {
            TelemetryKind::FillLevel => self.handle_fill_level(bin_id, text).await,
            TelemetryKind::Status => self.handle_status(bin_id, text).await,
            TelemetryKind::ActuatorState => self.handle_actuator_state(bin_id, text).await,
        }
    }

    async fn handle_fill_level(&self, bin_id: &str, raw: &str) -> Result<Option<AlarmNotice>> {
        let fill_level: f64 = raw.trim().parse().map_err(|_| {
            Error::Malformed(format!("invalid fill level value '{raw}' from {bin_id}"))
        })?;

        self.store
            .record_reading(bin_id, fill_level, Utc::now())
            .await?;
        debug!("Recorded fill level {:.1}% for {}", fill_level, bin_id);

        if fill_level >= self.fill_threshold {
            let message = format!("Bin {} is {:.1}% full", bin_id, fill_level);
            return self
                .raise_alarm(bin_id, AlarmKind::HighFill, message)
                .await
                .map(Some);
        }
        Ok(None)
    }

    async fn handle_status(&self, bin_id: &str, status: &str) -> Result<Option<AlarmNotice>> {
        if status.is_empty() {
            return Err(Error::Malformed(format!(
                "empty status payload from {bin_id}"
            )));
        }
        self.store
            .record_event(bin_id, EventKind::StatusChange, status, Utc::now())
            .await?;
        Ok(None)
    }

    async fn handle_actuator_state(&self, bin_id: &str, state: &str) -> Result<Option<AlarmNotice>> {
        self.store
            .record_event(bin_id, EventKind::ActuatorState, state, Utc::now())
            .await?;
        match state.parse::<ActuatorState>() {
            Ok(ActuatorState::Error) => {
                let message = format!("Bin {} actuator reported an error", bin_id);
                self.raise_alarm(bin_id, AlarmKind::ActuatorError, message)
                    .await
                    .map(Some)
            }
            Ok(_) | Err(()) => Ok(None),
        }
    }

    /// Persist the alarm; the notice to publish exists only once the row does.
    async fn raise_alarm(
        &self,
        bin_id: &str,
        alarm_type: AlarmKind,
        message: String,
    ) -> Result<AlarmNotice> {
        let timestamp = Utc::now();
        let id = self
            .store
            .create_alarm(bin_id, alarm_type, &message, timestamp)
            .await?;
        warn!("Alarm created (id {}): {}", id, message);
        Ok(AlarmNotice {
            bin_id: bin_id.to_string(),
            alarm_type,
            message,
            timestamp,
        })
    }
}
