// Loop rate, timeouts, topics, bus wiring and gait calibration
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gait::{GaitFormation, GaitPlan, Leg, LegId, LegMove, Motion};
use crate::servo::CHANNEL_COUNT;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// A command older than this when the engine is free is dropped
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_GAIT: &str = "creep/cmd/gait"; // commands
pub const TOPIC_JOINTS: &str = "creep/state/joints"; // joint snapshot
pub const TOPIC_HEALTH: &str = "creep/state/health"; // health status

// I2C bus and address of the PCA9685 board
pub const I2C_DEVICE: &str = "/dev/i2c-1";
pub const PCA9685_ADDRESS: u8 = 0x40;

// Servo PWM frequency programmed into the driver
pub const PWM_FREQUENCY_HZ: u32 = 60;

// Actuation: one step of STEP_DEGREES per tick caps joint speed
pub const ACTUATION_TICK_MS: u64 = 5;
pub const STEP_DEGREES: u8 = 1;
// Pause between sub-moves of one leg (mechanical settle)
pub const SETTLE_DELAY_MS: u64 = 10;
// Pause between the phases of a gait sequence
pub const PHASE_SETTLE_MS: u64 = 100;

// Gait angles, logical degrees before calibration offsets
pub const FRONT_PARALLEL: i16 = 90;
pub const FRONT_LATERAL: i16 = 140;
pub const BACK_PARALLEL: i16 = 90;
pub const BACK_LATERAL: i16 = 40;
pub const FOOT_UP: i16 = 0;
pub const FOOT_DOWN: i16 = 60;
pub const TIBIA_NEUTRAL: i16 = 90;

// Leg that settles alone after the others during stance
pub const ANCHOR_LEG: LegId = LegId::BackRight;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Leg {leg} uses channel {channel}, bus only has channels 0-11")]
    ChannelOutOfRange { leg: LegId, channel: u8 },

    #[error("Channel {channel} is wired to more than one joint")]
    SharedChannel { channel: u8 },

    #[error("Leg {leg} marks channel {channel} inverted but does not own it")]
    StrayInverted { leg: LegId, channel: u8 },

    #[error("I2C address 0x{address:02X} is outside the PCA9685 range 0x40-0x7F")]
    BadAddress { address: u8 },

    #[error("Actuation tick and step must be non-zero")]
    ZeroStep,

    #[error("Gait poses give no {motion:?} sequence from {formation:?}")]
    UnplannableGait {
        motion: Motion,
        formation: GaitFormation,
    },
}

/// Wiring and calibration of one leg.
///
/// Offsets are signed degrees added to every raw target of that joint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegConfig {
    pub channels: [u8; 3],
    #[serde(default)]
    pub offsets: [i16; 3],
    #[serde(default)]
    pub inverted: BTreeSet<u8>,
}

/// Where the PWM board sits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub device: String,
    pub address: u8,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            device: I2C_DEVICE.to_string(),
            address: PCA9685_ADDRESS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionTiming {
    pub tick_ms: u64,
    pub step_degrees: u8,
    pub settle_ms: u64,
    pub phase_settle_ms: u64,
}

impl Default for MotionTiming {
    fn default() -> Self {
        Self {
            tick_ms: ACTUATION_TICK_MS,
            step_degrees: STEP_DEGREES,
            settle_ms: SETTLE_DELAY_MS,
            phase_settle_ms: PHASE_SETTLE_MS,
        }
    }
}

impl MotionTiming {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn phase_settle(&self) -> Duration {
        Duration::from_millis(self.phase_settle_ms)
    }
}

/// Waypoint angles of the creep gait.
///
/// Left legs sit at their parallel hip angle in formation A and right legs
/// at their lateral one; formation B swaps them. Stance uses formation A.
/// Retreat and turn sequences reuse these values and still need checking on
/// the real robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaitPoses {
    pub front_parallel: i16,
    pub front_lateral: i16,
    pub back_parallel: i16,
    pub back_lateral: i16,
    pub foot_up: i16,
    pub foot_down: i16,
    pub tibia: i16,
}

impl Default for GaitPoses {
    fn default() -> Self {
        Self {
            front_parallel: FRONT_PARALLEL,
            front_lateral: FRONT_LATERAL,
            back_parallel: BACK_PARALLEL,
            back_lateral: BACK_LATERAL,
            foot_up: FOOT_UP,
            foot_down: FOOT_DOWN,
            tibia: TIBIA_NEUTRAL,
        }
    }
}

impl GaitPoses {
    pub fn hip(&self, leg: LegId, formation: GaitFormation) -> i16 {
        let (parallel, lateral) = if leg.is_front() {
            (self.front_parallel, self.front_lateral)
        } else {
            (self.back_parallel, self.back_lateral)
        };
        let at_parallel = match formation {
            GaitFormation::FormationB => !leg.is_left(),
            GaitFormation::Stance | GaitFormation::FormationA => leg.is_left(),
        };
        if at_parallel { parallel } else { lateral }
    }

    /// Foot on the ground, hip at its `formation` angle
    pub fn grounded(&self, leg: LegId, formation: GaitFormation) -> [i16; 3] {
        [self.hip(leg, formation), self.foot_down, self.tibia]
    }

    /// Lift, swing and drop of one leg between two formations
    pub fn swing(&self, leg: LegId, from: GaitFormation, to: GaitFormation) -> [LegMove; 3] {
        let (hip_from, hip_to) = (self.hip(leg, from), self.hip(leg, to));
        [
            LegMove::new(leg, [hip_from, self.foot_up, self.tibia]),
            LegMove::new(leg, [hip_to, self.foot_up, self.tibia]),
            LegMove::new(leg, [hip_to, self.foot_down, self.tibia]),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotConfig {
    /// Indexed by [`LegId`]
    pub legs: [LegConfig; 4],
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub timing: MotionTiming,
    #[serde(default)]
    pub poses: GaitPoses,
}

impl Default for RobotConfig {
    fn default() -> Self {
        // right-side legs are mounted mirror-reversed
        let right: fn(u8) -> BTreeSet<u8> = |first| (first..first + 3).collect();
        Self {
            legs: [
                LegConfig {
                    channels: [0, 1, 2],
                    offsets: [2, 3, 0],
                    inverted: BTreeSet::new(),
                },
                LegConfig {
                    channels: [3, 4, 5],
                    offsets: [-1, 4, 0],
                    inverted: right(3),
                },
                LegConfig {
                    channels: [6, 7, 8],
                    offsets: [0, 2, -2],
                    inverted: BTreeSet::new(),
                },
                LegConfig {
                    channels: [9, 10, 11],
                    offsets: [3, 0, 1],
                    inverted: right(9),
                },
            ],
            bus: BusConfig::default(),
            timing: MotionTiming::default(),
            poses: GaitPoses::default(),
        }
    }
}

impl RobotConfig {
    /// Read and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: RobotConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut used = BTreeSet::new();
        for (leg, cfg) in LegId::ALL.into_iter().zip(&self.legs) {
            for &channel in &cfg.channels {
                if channel as usize >= CHANNEL_COUNT {
                    return Err(ConfigError::ChannelOutOfRange { leg, channel });
                }
                if !used.insert(channel) {
                    return Err(ConfigError::SharedChannel { channel });
                }
            }
            if let Some(&channel) = cfg.inverted.iter().find(|c| !cfg.channels.contains(c)) {
                return Err(ConfigError::StrayInverted { leg, channel });
            }
        }

        if !(0x40..=0x7F).contains(&self.bus.address) {
            return Err(ConfigError::BadAddress {
                address: self.bus.address,
            });
        }

        if self.timing.tick_ms == 0 || self.timing.step_degrees == 0 {
            return Err(ConfigError::ZeroStep);
        }

        for motion in Motion::ALL {
            for formation in [GaitFormation::FormationA, GaitFormation::FormationB] {
                if GaitPlan::derive(motion, formation, &self.poses).is_none() {
                    return Err(ConfigError::UnplannableGait { motion, formation });
                }
            }
        }
        Ok(())
    }

    pub fn legs(&self) -> [Leg; 4] {
        LegId::ALL.map(|id| {
            let cfg = &self.legs[id.index()];
            Leg::new(id, cfg.channels, cfg.offsets, cfg.inverted.clone())
        })
    }
}

/// Legs of the default calibration
pub fn default_legs() -> [Leg; 4] {
    RobotConfig::default().legs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        RobotConfig::default().validate().unwrap();
    }

    #[test]
    fn test_formation_hips() {
        let poses = GaitPoses::default();
        let a = LegId::ALL.map(|leg| poses.hip(leg, GaitFormation::FormationA));
        let b = LegId::ALL.map(|leg| poses.hip(leg, GaitFormation::FormationB));
        assert_eq!(a, [90, 140, 90, 40]);
        assert_eq!(b, [140, 90, 40, 90]);
    }

    #[test]
    fn test_shared_channel_rejected() {
        let mut config = RobotConfig::default();
        config.legs[2].channels = [6, 7, 2];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SharedChannel { channel: 2 })
        ));
    }

    #[test]
    fn test_stray_inverted_rejected() {
        let mut config = RobotConfig::default();
        config.legs[0].inverted.insert(9);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::StrayInverted {
                leg: LegId::FrontLeft,
                channel: 9
            })
        ));
    }

    #[test]
    fn test_channel_out_of_range_rejected() {
        let mut config = RobotConfig::default();
        config.legs[3].channels = [9, 10, 12];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ChannelOutOfRange { channel: 12, .. })
        ));
    }

    #[test]
    fn test_bus_address_outside_chip_range_rejected() {
        let mut config = RobotConfig::default();
        config.bus.address = 0x20;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadAddress { address: 0x20 })
        ));
    }

    #[test]
    fn test_zero_step_rejected() {
        let mut config = RobotConfig::default();
        config.timing.step_degrees = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroStep)));
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let json = r#"{
            "legs": [
                {"channels": [0, 1, 2], "offsets": [1, 0, 0]},
                {"channels": [3, 4, 5], "inverted": [3, 4, 5]},
                {"channels": [6, 7, 8]},
                {"channels": [9, 10, 11], "inverted": [9, 10, 11]}
            ],
            "timing": {"tick_ms": 2}
        }"#;
        let config: RobotConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.timing.tick_ms, 2);
        assert_eq!(config.timing.step_degrees, STEP_DEGREES);
        assert_eq!(config.poses, GaitPoses::default());
        assert_eq!(config.legs[1].offsets, [0, 0, 0]);
        assert_eq!(config.bus, BusConfig::default());
    }
}
