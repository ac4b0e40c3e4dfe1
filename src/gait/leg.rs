// Leg and joint identities plus per-leg calibration

use std::collections::BTreeSet;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::servo::clamp_angle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegId {
    FrontLeft = 0,
    FrontRight = 1,
    BackLeft = 2,
    BackRight = 3,
}

impl LegId {
    pub const ALL: [LegId; 4] = [
        LegId::FrontLeft,
        LegId::FrontRight,
        LegId::BackLeft,
        LegId::BackRight,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_front(self) -> bool {
        matches!(self, LegId::FrontLeft | LegId::FrontRight)
    }

    pub fn is_left(self) -> bool {
        matches!(self, LegId::FrontLeft | LegId::BackLeft)
    }
}

impl Display for LegId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LegId::FrontLeft => f.write_str("front left"),
            LegId::FrontRight => f.write_str("front right"),
            LegId::BackLeft => f.write_str("back left"),
            LegId::BackRight => f.write_str("back right"),
        }
    }
}

/// Joint position within a leg's channel triple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Joint {
    /// Hip: swings the leg forward and back
    Coxa = 0,
    /// Knee: lifts and drops the foot
    Femur = 1,
    Tibia = 2,
}

impl Joint {
    pub const ALL: [Joint; 3] = [Joint::Coxa, Joint::Femur, Joint::Tibia];
}

impl Display for Joint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Joint::Coxa => f.write_str("coxa"),
            Joint::Femur => f.write_str("femur"),
            Joint::Tibia => f.write_str("tibia"),
        }
    }
}

/// One leg's wiring and calibration, fixed after configuration load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leg {
    id: LegId,
    channels: [u8; 3],
    offsets: [i16; 3],
    inverted: BTreeSet<u8>,
}

impl Leg {
    pub fn new(id: LegId, channels: [u8; 3], offsets: [i16; 3], inverted: BTreeSet<u8>) -> Self {
        Self {
            id,
            channels,
            offsets,
            inverted,
        }
    }

    pub fn id(&self) -> LegId {
        self.id
    }

    pub fn channels(&self) -> &[u8; 3] {
        &self.channels
    }

    pub fn channel(&self, joint: Joint) -> u8 {
        self.channels[joint as usize]
    }

    pub fn offsets(&self) -> &[i16; 3] {
        &self.offsets
    }

    pub fn is_inverted(&self, channel: u8) -> bool {
        self.inverted.contains(&channel)
    }

    /// Raw joint targets shifted by this leg's offsets, inside [0, 180]
    pub fn calibrated(&self, raw: [i16; 3]) -> [u8; 3] {
        let mut goal = [0u8; 3];
        for joint in Joint::ALL {
            let i = joint as usize;
            goal[i] = clamp_angle(raw[i].saturating_add(self.offsets[i]));
        }
        goal
    }
}
