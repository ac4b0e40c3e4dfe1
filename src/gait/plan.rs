// Gait formations and the phase plans that move between them
//
// Every walking motion shares one skeleton:
//   lead leg lift -> swing -> drop
//   concurrent push of the other three legs
//   trailing leg lift -> swing -> drop
// Motions only differ in which legs swing and which ones push.

use serde::{Deserialize, Serialize};

use super::leg::LegId;
use super::scheduler::LegMove;
use crate::config::GaitPoses;
use crate::messages::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GaitFormation {
    Stance,
    FormationA,
    FormationB,
}

impl GaitFormation {
    /// Formation a complete walking sequence ends in
    pub fn next(self) -> Option<Self> {
        match self {
            GaitFormation::Stance => None,
            GaitFormation::FormationA => Some(GaitFormation::FormationB),
            GaitFormation::FormationB => Some(GaitFormation::FormationA),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    Advance,
    Retreat,
    TurnLeft,
    TurnRight,
}

impl Motion {
    pub const ALL: [Motion; 4] = [
        Motion::Advance,
        Motion::Retreat,
        Motion::TurnLeft,
        Motion::TurnRight,
    ];

    pub fn from_command(command: Command) -> Option<Self> {
        match command {
            Command::Stance => None,
            Command::Advance => Some(Motion::Advance),
            Command::Retreat => Some(Motion::Retreat),
            Command::TurnLeft => Some(Motion::TurnLeft),
            Command::TurnRight => Some(Motion::TurnRight),
        }
    }

    pub fn command(self) -> Command {
        match self {
            Motion::Advance => Command::Advance,
            Motion::Retreat => Command::Retreat,
            Motion::TurnLeft => Command::TurnLeft,
            Motion::TurnRight => Command::TurnRight,
        }
    }

    /// Sign of the hip travel of a grounded (pushing) leg
    fn push_sense(self, leg: LegId) -> i16 {
        match self {
            Motion::Advance => -1,
            Motion::Retreat => 1,
            Motion::TurnLeft if leg.is_left() => 1,
            Motion::TurnLeft => -1,
            Motion::TurnRight if leg.is_left() => -1,
            Motion::TurnRight => 1,
        }
    }

    /// Whether `leg` goes first among the two swinging legs
    fn leads_with(self, leg: LegId) -> bool {
        match self {
            Motion::Advance => leg.is_front(),
            Motion::Retreat => !leg.is_front(),
            Motion::TurnLeft => leg.is_left(),
            Motion::TurnRight => !leg.is_left(),
        }
    }
}

/// Declarative description of one complete walking sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GaitPlan {
    pub motion: Motion,
    pub from: GaitFormation,
    pub to: GaitFormation,
    pub lead: LegId,
    pub trailing: LegId,
    /// lift, swing, drop of the lead leg
    pub lead_steps: [LegMove; 3],
    /// every leg but the lead, grounded
    pub push: [LegMove; 3],
    /// lift, swing, drop of the trailing leg
    pub trailing_steps: [LegMove; 3],
}

impl GaitPlan {
    /// Build the plan for `motion` starting in `from`.
    ///
    /// `None` when there is no sequence: from `Stance`, or when `poses` do
    /// not split the legs into exactly two swinging and two pushing.
    pub fn derive(motion: Motion, from: GaitFormation, poses: &GaitPoses) -> Option<Self> {
        let to = from.next()?;

        let swinging: Vec<LegId> = LegId::ALL
            .into_iter()
            .filter(|&leg| {
                let delta = poses.hip(leg, to) - poses.hip(leg, from);
                delta.signum() != motion.push_sense(leg)
            })
            .collect();
        let &[a, b] = swinging.as_slice() else {
            return None;
        };
        let (lead, trailing) = match (motion.leads_with(a), motion.leads_with(b)) {
            (true, false) => (a, b),
            (false, true) => (b, a),
            _ => return None,
        };

        // the trailing leg holds its hip until its own swing
        let push: Vec<LegMove> = LegId::ALL
            .into_iter()
            .filter(|&leg| leg != lead)
            .map(|leg| {
                let formation = if leg == trailing { from } else { to };
                LegMove::new(leg, poses.grounded(leg, formation))
            })
            .collect();

        Some(Self {
            motion,
            from,
            to,
            lead,
            trailing,
            lead_steps: poses.swing(lead, from, to),
            push: push.try_into().ok()?,
            trailing_steps: poses.swing(trailing, from, to),
        })
    }
}
