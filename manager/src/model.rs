use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single fill-level measurement reported by a bin.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reading {
    pub bin_id: String,
    pub fill_level: f64,
    pub timestamp: DateTime<Utc>,
}

/// An audit-trail entry for non-numeric bin telemetry.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BinEvent {
    pub bin_id: String,
    pub event_type: EventKind,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    StatusChange,
    ActuatorState,
}

/// A persisted alarm. `acknowledged` only ever moves false -> true.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Alarm {
    pub id: i64,
    pub bin_id: String,
    pub alarm_type: AlarmKind,
    pub message: String,
    pub acknowledged: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmKind {
    HighFill,
    ActuatorError,
}

/// Notification published on the alarm topic when a rule fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmNotice {
    pub bin_id: String,
    #[serde(rename = "type")]
    pub alarm_type: AlarmKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Lid actuator states as reported on the actuator_state topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorState {
    Idle,
    Opening,
    Emptying,
    Closing,
    Error,
}

impl FromStr for ActuatorState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(ActuatorState::Idle),
            "OPENING" => Ok(ActuatorState::Opening),
            "EMPTYING" => Ok(ActuatorState::Emptying),
            "CLOSING" => Ok(ActuatorState::Closing),
            "ERROR" => Ok(ActuatorState::Error),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ActuatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            ActuatorState::Idle => "IDLE",
            ActuatorState::Opening => "OPENING",
            ActuatorState::Emptying => "EMPTYING",
            ActuatorState::Closing => "CLOSING",
            ActuatorState::Error => "ERROR",
        };
        f.write_str(token)
    }
}

/// REST API response wrapper for history queries.
#[derive(Debug, Serialize)]
pub struct HistoryResponse<T> {
    pub data: Vec<T>,
    pub total: usize,
    pub limit: usize,
}
