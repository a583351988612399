use std::fmt;
use std::time::Duration;

/// Lid actuator states, published verbatim on the actuator_state topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorState {
    Idle,
    Opening,
    Emptying,
    Closing,
    Error,
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

/// The phases of one emptying cycle, in order, with their dwell times.
pub fn emptying_sequence() -> [(ActuatorState, Duration); 3] {
    [
        (ActuatorState::Opening, Duration::from_secs(2)),
        (ActuatorState::Emptying, Duration::from_secs(3)),
        (ActuatorState::Closing, Duration::from_secs(2)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_phases_in_order() {
        let phases: Vec<ActuatorState> =
            emptying_sequence().iter().map(|(state, _)| *state).collect();
        assert_eq!(
            phases,
            vec![
                ActuatorState::Opening,
                ActuatorState::Emptying,
                ActuatorState::Closing
            ]
        );
    }

    #[test]
    fn test_cycle_never_contains_terminal_states() {
        for (state, dwell) in emptying_sequence() {
            assert_ne!(state, ActuatorState::Idle);
            assert_ne!(state, ActuatorState::Error);
            assert!(dwell > Duration::ZERO);
        }
    }

    #[test]
    fn test_state_tokens() {
        assert_eq!(ActuatorState::Idle.to_string(), "IDLE");
        assert_eq!(ActuatorState::Opening.to_string(), "OPENING");
        assert_eq!(ActuatorState::Emptying.to_string(), "EMPTYING");
        assert_eq!(ActuatorState::Closing.to_string(), "CLOSING");
        assert_eq!(ActuatorState::Error.to_string(), "ERROR");
    }
}
