use std::str::FromStr;

/// Topic scheme for a configured base topic.
///
/// Bin telemetry lives on `{base}/{bin_id}/{kind}`; alarm notifications on
/// the reserved `{base}/alarm` topic.
#[derive(Debug, Clone)]
pub struct Topics {
    prefix: String,
    alarm: String,
}

/// The data kind carried by the last segment of a bin telemetry topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryKind {
    FillLevel,
    Status,
    ActuatorState,
}

impl FromStr for TelemetryKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fill_level" => Ok(TelemetryKind::FillLevel),
            "status" => Ok(TelemetryKind::Status),
            "actuator_state" => Ok(TelemetryKind::ActuatorState),
            _ => Err(()),
        }
    }
}

/// Where a delivered message belongs in the topic scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classified<'t> {
    /// Bin telemetry: bin id is the second-to-last segment, kind the last.
    Telemetry { bin_id: &'t str, kind: TelemetryKind },
    /// One of our own alarm notifications echoed back by the broker.
    AlarmEcho,
    /// Bin-scoped topic with a data kind we do not handle.
    UnknownKind { kind: &'t str },
    /// Not part of the scheme at all.
    Foreign,
}

impl Topics {
    pub fn new(base_topic: &str) -> Self {
        let base = base_topic.trim_end_matches('/');
        Topics {
            prefix: format!("{}/", base),
            alarm: format!("{}/alarm", base),
        }
    }

    pub fn alarm(&self) -> &str {
        &self.alarm
    }

    /// Subscription filters covering every topic the manager consumes.
    pub fn filters(&self) -> [String; 4] {
        [
            format!("{}+/fill_level", self.prefix),
            format!("{}+/status", self.prefix),
            format!("{}+/actuator_state", self.prefix),
            self.alarm.clone(),
        ]
    }

    pub fn classify<'t>(&self, topic: &'t str) -> Classified<'t> {
        // The alarm topic shares the base prefix, so it must win first.
        if topic == self.alarm {
            return Classified::AlarmEcho;
        }
        let Some(rest) = topic.strip_prefix(&self.prefix) else {
            return Classified::Foreign;
        };
        let mut segments = rest.split('/');
        match (segments.next(), segments.next(), segments.next()) {
            (Some(bin_id), Some(kind), None) if !bin_id.is_empty() && !kind.is_empty() => {
                match kind.parse::<TelemetryKind>() {
                    Ok(kind) => Classified::Telemetry { bin_id, kind },
                    Err(()) => Classified::UnknownKind { kind },
                }
            }
            _ => Classified::Foreign,
        }
    }
}
