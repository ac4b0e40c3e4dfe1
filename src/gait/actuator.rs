// Bounded-step interpolation of one leg's joints toward a target triple

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use super::leg::{Joint, Leg, LegId};
use crate::config::MotionTiming;
use crate::error::{GaitError, Result};
use crate::servo::{clamp_angle, ServoBus};

/// Stop request shared between the command source and every actuation task.
///
/// Sampled once per actuator tick.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives legs joint-by-joint through the [`ServoBus`].
///
/// Each tick moves every unfinished joint by at most `step_degrees`, which
/// caps angular velocity (and with it the current spike a servo draws) at
/// the cost of longer moves.
pub struct LegActuator {
    bus: Arc<ServoBus>,
    legs: [Leg; 4],
    timing: MotionTiming,
    cancel: CancelFlag,
}

impl LegActuator {
    /// `legs` may come in any order; each is filed under its own [`LegId`]
    pub fn new(bus: Arc<ServoBus>, mut legs: [Leg; 4], timing: MotionTiming, cancel: CancelFlag) -> Self {
        legs.sort_by_key(Leg::id);
        Self {
            bus,
            legs,
            timing,
            cancel,
        }
    }

    pub fn leg(&self, id: LegId) -> &Leg {
        &self.legs[id.index()]
    }

    pub fn bus(&self) -> &Arc<ServoBus> {
        &self.bus
    }

    pub fn timing(&self) -> &MotionTiming {
        &self.timing
    }

    /// Move `leg` to `targets` (raw angles, offsets applied here).
    ///
    /// Returns once every joint sits on its calibrated target. If the cancel
    /// flag is seen on the way the move still completes, then reports
    /// [`GaitError::Cancelled`].
    pub async fn move_to(&self, leg: LegId, targets: [i16; 3]) -> Result<()> {
        let goal = self.leg(leg).calibrated(targets);
        self.drive(leg, goal, true).await
    }

    /// Put the foot back on the ground without leaving the hip or tibia.
    ///
    /// Ignores the cancel flag: this is how an interrupted swing reaches a
    /// stable waypoint.
    pub async fn ground(&self, leg: LegId, foot_down: i16) -> Result<()> {
        let l = self.leg(leg);
        let offset = l.offsets()[Joint::Femur as usize];
        let goal = [
            self.bus.angle(l.channel(Joint::Coxa)),
            clamp_angle(foot_down.saturating_add(offset)),
            self.bus.angle(l.channel(Joint::Tibia)),
        ];
        self.drive(leg, goal, false).await
    }

    async fn drive(&self, leg: LegId, goal: [u8; 3], cancellable: bool) -> Result<()> {
        let channels = *self.leg(leg).channels();
        debug!("Leg {} -> {:?} on channels {:?}", leg, goal, channels);
        let targets: [(u8, i16); 3] =
            std::array::from_fn(|i| (channels[i], i16::from(goal[i])));

        let mut ticker = interval(self.timing.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cancelled = false;

        loop {
            ticker.tick().await;

            if cancellable && !cancelled && self.cancel.is_raised() {
                warn!("Leg {} saw a stop request, finishing current waypoint", leg);
                cancelled = true;
            }

            let changed = self
                .bus
                .step_channels(targets, self.timing.step_degrees)
                .await?;
            if !changed {
                break;
            }
        }

        if cancelled {
            return Err(GaitError::Cancelled { leg });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RobotConfig;
    use crate::servo::{SimDriver, WriteLog, BOOT_ANGLE};
    use tokio::time::Instant;

    fn actuator(driver: SimDriver) -> (LegActuator, WriteLog) {
        let config = RobotConfig::default();
        let log = driver.log();
        let legs = config.legs();
        let bus = Arc::new(ServoBus::new(Box::new(driver), &legs));
        (
            LegActuator::new(bus, legs, config.timing, CancelFlag::new()),
            log,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_reaches_calibrated_targets() {
        let (act, _log) = actuator(SimDriver::new());
        act.move_to(LegId::FrontLeft, [100, 60, 90]).await.unwrap();

        let leg = act.leg(LegId::FrontLeft);
        let expected = leg.calibrated([100, 60, 90]);
        for (channel, angle) in leg.channels().iter().zip(expected) {
            assert_eq!(act.bus().angle(*channel), angle);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_steps_one_degree_per_tick() {
        let (act, log) = actuator(SimDriver::new());
        let coxa = act.leg(LegId::BackLeft).channel(Joint::Coxa);
        let offset = act.leg(LegId::BackLeft).offsets()[0];
        let started = Instant::now();

        // 10 degrees on the hip only
        let target = i16::from(BOOT_ANGLE) + 10 - offset;
        let tibia = i16::from(BOOT_ANGLE) - act.leg(LegId::BackLeft).offsets()[2];
        let femur = i16::from(BOOT_ANGLE) - act.leg(LegId::BackLeft).offsets()[1];
        act.move_to(LegId::BackLeft, [target, femur, tibia])
            .await
            .unwrap();

        let hip_writes: Vec<_> = log
            .records()
            .into_iter()
            .filter(|r| r.channel == coxa)
            .collect();
        assert_eq!(hip_writes.len(), 10);
        for pair in hip_writes.windows(2) {
            assert_eq!(pair[1].at - pair[0].at, act.timing.tick());
        }
        // 10 moving ticks plus the idle one that ends the loop
        assert_eq!(Instant::now() - started, act.timing.tick() * 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_target_terminates() {
        let (act, _log) = actuator(SimDriver::new());
        act.move_to(LegId::FrontRight, [400, -50, 90]).await.unwrap();
        let leg = act.leg(LegId::FrontRight);
        assert_eq!(act.bus().angle(leg.channel(Joint::Coxa)), 180);
        assert_eq!(act.bus().angle(leg.channel(Joint::Femur)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_move_finishes_waypoint_then_reports() {
        let (act, _log) = actuator(SimDriver::new());
        act.cancel.raise();
        let err = act.move_to(LegId::BackRight, [70, 60, 90]).await.unwrap_err();
        assert!(matches!(err, GaitError::Cancelled { leg: LegId::BackRight }));

        let leg = act.leg(LegId::BackRight);
        let goal = leg.calibrated([70, 60, 90]);
        assert_eq!(act.bus().angle(leg.channel(Joint::Coxa)), goal[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ground_ignores_cancel_and_keeps_hip() {
        let (act, _log) = actuator(SimDriver::new());
        act.move_to(LegId::FrontLeft, [120, 0, 90]).await.unwrap();
        act.cancel.raise();

        act.ground(LegId::FrontLeft, 60).await.unwrap();
        let leg = act.leg(LegId::FrontLeft);
        assert_eq!(act.bus().angle(leg.channel(Joint::Coxa)), leg.calibrated([120, 0, 90])[0]);
        assert_eq!(act.bus().angle(leg.channel(Joint::Femur)), leg.calibrated([0, 60, 0])[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_legs_resolved_by_identity() {
        let config = RobotConfig::default();
        let mut legs = config.legs();
        legs.reverse();
        let driver = SimDriver::new();
        let log = driver.log();
        let bus = Arc::new(ServoBus::new(Box::new(driver), &legs));
        let act = LegActuator::new(bus, legs, config.timing, CancelFlag::new());

        for id in LegId::ALL {
            assert_eq!(act.leg(id).id(), id);
        }
        act.move_to(LegId::FrontLeft, [100, 60, 90]).await.unwrap();
        assert!(log.records().iter().all(|r| r.channel < 3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hardware_error_surfaces_immediately() {
        let (act, log) = actuator(SimDriver::failing_on(7));
        let err = act.move_to(LegId::BackLeft, [90, 20, 90]).await.unwrap_err();
        assert!(matches!(err, GaitError::HardwareWrite { channel: 7, .. }));
        assert!(log.pulses(7).is_empty());
    }
}
