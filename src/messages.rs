// Message types exchanged with command sources and state listeners

use serde::{Deserialize, Serialize};

use crate::gait::GaitFormation;
use crate::servo::{JointState, CHANNEL_COUNT};

/// Directional intent from teleop, navigation or scripts -> runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Stance,
    Advance,
    Retreat,
    TurnLeft,
    TurnRight,
}

/// Joint snapshot published by runtime after every tick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GaitStatus {
    pub formation: GaitFormation,
    pub angles: [u8; CHANNEL_COUNT],
}

impl GaitStatus {
    pub fn new(formation: GaitFormation, joints: &JointState) -> Self {
        Self {
            formation,
            angles: joints.angles(),
        }
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    /// Waiting for a fresh command
    Idle,
    Walking,
    CmdStale,
    Fault,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_names() {
        let cmd: Command = serde_json::from_str("\"turn_left\"").unwrap();
        assert_eq!(cmd, Command::TurnLeft);
        assert_eq!(serde_json::to_string(&Command::Advance).unwrap(), "\"advance\"");
        assert!(serde_json::from_str::<Command>("\"jump\"").is_err());
    }

    #[test]
    fn test_status_serializes_formation_and_angles() {
        let status = GaitStatus::new(GaitFormation::FormationB, &JointState::default());
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["formation"], "formation_b");
        assert_eq!(json["angles"].as_array().unwrap().len(), CHANNEL_COUNT);
    }
}
