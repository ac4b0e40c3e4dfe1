// Gait state machine: Stance -> FormationA <-> FormationB

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use super::actuator::{CancelFlag, LegActuator};
use super::leg::LegId;
use super::plan::{GaitFormation, GaitPlan, Motion};
use super::scheduler::{LegMove, MotionScheduler};
use crate::config::{GaitPoses, RobotConfig, ANCHOR_LEG};
use crate::error::{GaitError, Result};
use crate::messages::Command;
use crate::servo::ServoBus;

/// Sequences leg phases for every [`Command`].
///
/// Operations take `&mut self`, so only one sequence can be in flight and
/// the formation is never read mid-transition.
pub struct GaitEngine {
    scheduler: MotionScheduler,
    poses: GaitPoses,
    phase_settle: Duration,
    formation: GaitFormation,
    cancel: CancelFlag,
}

impl GaitEngine {
    pub fn new(bus: Arc<ServoBus>, config: &RobotConfig, cancel: CancelFlag) -> Self {
        let actuator = Arc::new(LegActuator::new(
            bus,
            config.legs(),
            config.timing,
            cancel.clone(),
        ));
        Self {
            scheduler: MotionScheduler::new(actuator, config.timing.settle()),
            poses: config.poses,
            phase_settle: config.timing.phase_settle(),
            formation: GaitFormation::Stance,
            cancel,
        }
    }

    pub fn formation(&self) -> GaitFormation {
        self.formation
    }

    pub fn bus(&self) -> &Arc<ServoBus> {
        self.scheduler.actuator().bus()
    }

    pub async fn execute(&mut self, command: Command) -> Result<()> {
        match Motion::from_command(command) {
            Some(motion) => self.walk(motion).await,
            None => self.stance().await,
        }
    }

    /// Settle every leg in the formation A pose.
    ///
    /// Three legs move together, then the anchor leg alone. Clears any
    /// earlier stop request.
    pub async fn stance(&mut self) -> Result<()> {
        self.cancel.clear();
        info!("Stance from {:?}", self.formation);

        let (anchor, group): (Vec<LegMove>, Vec<LegMove>) = LegId::ALL
            .into_iter()
            .map(|leg| LegMove::new(leg, self.poses.grounded(leg, GaitFormation::FormationA)))
            .partition(|mv| mv.leg == ANCHOR_LEG);

        self.scheduler.run_concurrent(&group).await?;
        self.scheduler.run_sequential(&anchor).await?;

        self.formation = GaitFormation::FormationA;
        info!("Stance reached");
        Ok(())
    }

    pub async fn advance(&mut self) -> Result<()> {
        self.walk(Motion::Advance).await
    }

    pub async fn retreat(&mut self) -> Result<()> {
        self.walk(Motion::Retreat).await
    }

    pub async fn turn_left(&mut self) -> Result<()> {
        self.walk(Motion::TurnLeft).await
    }

    pub async fn turn_right(&mut self) -> Result<()> {
        self.walk(Motion::TurnRight).await
    }

    async fn walk(&mut self, motion: Motion) -> Result<()> {
        let plan = GaitPlan::derive(motion, self.formation, &self.poses).ok_or(
            GaitError::InvalidCommand {
                command: motion.command(),
                formation: self.formation,
            },
        )?;
        info!(
            "{:?} {:?} -> {:?}: lead {}, trailing {}",
            motion, plan.from, plan.to, plan.lead, plan.trailing
        );

        self.swing(&plan.lead_steps).await?;
        sleep(self.phase_settle).await;

        self.scheduler.run_concurrent(&plan.push).await?;
        sleep(self.phase_settle).await;

        self.swing(&plan.trailing_steps).await?;

        self.formation = plan.to;
        info!("{:?} done, now in {:?}", motion, self.formation);
        Ok(())
    }

    /// Lift, swing and drop one leg; an interrupted swing still lands
    async fn swing(&self, steps: &[LegMove; 3]) -> Result<()> {
        let result = self.scheduler.run_sequential(steps).await;
        if let Err(GaitError::Cancelled { leg }) = &result {
            warn!("Swing of {} interrupted, putting the foot down", leg);
            self.scheduler
                .actuator()
                .ground(*leg, self.poses.foot_down)
                .await?;
        }
        result
    }
}
