// Shared actuation bus: angle->pulse mapping and serialized channel writes

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::{debug, error};

use super::pca9685::{DriverError, PwmDriver};
use crate::error::{GaitError, Result};
use crate::gait::Leg;

/// Servo channels on the bus (4 legs x 3 joints)
pub const CHANNEL_COUNT: usize = 12;

pub const MIN_ANGLE: i16 = 0;
pub const MAX_ANGLE: i16 = 180;

/// Angle every joint is assumed to hold before the first stance
pub const BOOT_ANGLE: u8 = 90;

pub fn clamp_angle(angle: i16) -> u8 {
    angle.clamp(MIN_ANGLE, MAX_ANGLE) as u8
}

/// How a channel turns an angle into a pulse count.
///
/// `Inverted` is for joints mounted mirror-reversed relative to their
/// sibling leg. Both variants agree at 90 degrees (375 counts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseMapping {
    #[default]
    Normal,
    Inverted,
}

impl PulseMapping {
    /// `angle*2.5 + 150` or `angle*(-2.5) + 600`, truncated to whole counts
    pub fn pulse(self, angle: u8) -> u16 {
        let half_steps = u16::from(angle.min(MAX_ANGLE as u8)) * 5;
        match self {
            PulseMapping::Normal => 150 + half_steps / 2,
            PulseMapping::Inverted => 600 - half_steps.div_ceil(2),
        }
    }
}

/// Commanded angle of every channel, mirroring the physical servos
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointState {
    angles: [u8; CHANNEL_COUNT],
}

impl Default for JointState {
    fn default() -> Self {
        Self {
            angles: [BOOT_ANGLE; CHANNEL_COUNT],
        }
    }
}

impl JointState {
    /// Unknown channels read as the boot angle
    pub fn angle(&self, channel: u8) -> u8 {
        self.angles
            .get(channel as usize)
            .copied()
            .unwrap_or(BOOT_ANGLE)
    }

    pub fn angles(&self) -> [u8; CHANNEL_COUNT] {
        self.angles
    }
}

struct BusInner {
    driver: Box<dyn PwmDriver>,
    joints: JointState,
}

/// The single writer in front of the PWM driver.
///
/// Every write, and every read-modify-write of [`JointState`], happens under
/// one lock held for exactly one channel. Concurrent legs interleave at the
/// granularity of single writes.
pub struct ServoBus {
    inner: Mutex<BusInner>,
    mappings: [PulseMapping; CHANNEL_COUNT],
}

impl ServoBus {
    pub fn new(driver: Box<dyn PwmDriver>, legs: &[Leg]) -> Self {
        let mut mappings = [PulseMapping::Normal; CHANNEL_COUNT];
        for leg in legs {
            for &channel in leg.channels() {
                if leg.is_inverted(channel) {
                    if let Some(mapping) = mappings.get_mut(channel as usize) {
                        *mapping = PulseMapping::Inverted;
                    }
                }
            }
        }

        Self {
            inner: Mutex::new(BusInner {
                driver,
                joints: JointState::default(),
            }),
            mappings,
        }
    }

    /// Program the driver's PWM frequency
    pub fn initialize(&self, frequency_hz: u32) -> std::result::Result<(), DriverError> {
        self.lock().driver.set_pwm_freq(frequency_hz)
    }

    pub fn mapping(&self, channel: u8) -> PulseMapping {
        self.mappings
            .get(channel as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Clamp `angle` and put it on `channel`
    pub fn write(&self, channel: u8, angle: i16) -> Result<()> {
        let angle = clamp_angle(angle);
        let mut inner = self.lock();
        self.put(&mut inner, channel, angle)
    }

    /// Move `channel` at most `step` degrees toward `target`.
    ///
    /// Returns `false` without touching the bus when the channel already
    /// holds the (clamped) target.
    pub fn step_toward(&self, channel: u8, target: i16, step: u8) -> Result<bool> {
        let target = clamp_angle(target);
        let mut inner = self.lock();
        let current = inner
            .joints
            .angles
            .get(channel as usize)
            .copied()
            .ok_or(GaitError::HardwareWrite {
                channel,
                source: DriverError::ChannelOutOfRange { channel },
            })?;

        if current == target {
            return Ok(false);
        }
        let next = if current < target {
            current.saturating_add(step).min(target)
        } else {
            current.saturating_sub(step).max(target)
        };
        self.put(&mut inner, channel, next)?;
        Ok(true)
    }

    /// [`Self::step_toward`] for several channels, run on the blocking pool.
    ///
    /// Driver calls block on bus I/O and must stay off the async workers.
    /// The lock is still taken once per channel, so concurrent legs keep
    /// interleaving write by write.
    pub async fn step_channels<const N: usize>(
        self: &Arc<Self>,
        targets: [(u8, i16); N],
        step: u8,
    ) -> Result<bool> {
        let bus = Arc::clone(self);
        task::spawn_blocking(move || -> Result<bool> {
            let mut changed = false;
            for (channel, target) in targets {
                changed |= bus.step_toward(channel, target, step)?;
            }
            Ok(changed)
        })
        .await
        .map_err(|e| GaitError::TaskFailed(e.to_string()))?
    }

    pub fn angle(&self, channel: u8) -> u8 {
        self.lock().joints.angle(channel)
    }

    pub fn snapshot(&self) -> JointState {
        self.lock().joints
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn put(&self, inner: &mut BusInner, channel: u8, angle: u8) -> Result<()> {
        if channel as usize >= CHANNEL_COUNT {
            return Err(GaitError::HardwareWrite {
                channel,
                source: DriverError::ChannelOutOfRange { channel },
            });
        }
        let pulse = self.mapping(channel).pulse(angle);
        debug!("channel {} -> {} deg ({} counts)", channel, angle, pulse);

        if let Err(source) = inner.driver.set_pwm(channel, 0, pulse) {
            error!("Write of {} deg to channel {} failed: {}", angle, channel, source);
            return Err(GaitError::HardwareWrite { channel, source });
        }
        inner.joints.angles[channel as usize] = angle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_legs;
    use crate::servo::SimDriver;

    fn sim_bus() -> (ServoBus, crate::servo::WriteLog) {
        let driver = SimDriver::new();
        let log = driver.log();
        (ServoBus::new(Box::new(driver), &default_legs()), log)
    }

    #[test]
    fn test_pulse_mapping_reference_points() {
        assert_eq!(PulseMapping::Normal.pulse(90), 375);
        assert_eq!(PulseMapping::Inverted.pulse(90), 375);
        assert_eq!(PulseMapping::Normal.pulse(0), 150);
        assert_eq!(PulseMapping::Inverted.pulse(0), 600);
        assert_eq!(PulseMapping::Normal.pulse(180), 600);
        assert_eq!(PulseMapping::Inverted.pulse(180), 150);
    }

    #[test]
    fn test_pulse_mapping_truncates_half_counts() {
        // 1*2.5 + 150 = 152.5, 1*(-2.5) + 600 = 597.5
        assert_eq!(PulseMapping::Normal.pulse(1), 152);
        assert_eq!(PulseMapping::Inverted.pulse(1), 597);
        assert_eq!(PulseMapping::Normal.pulse(61), 302);
        assert_eq!(PulseMapping::Inverted.pulse(61), 447);
    }

    #[test]
    fn test_write_clamps_out_of_range_angles() {
        let (bus, log) = sim_bus();
        bus.write(0, -10).unwrap();
        bus.write(0, 0).unwrap();
        bus.write(1, 250).unwrap();
        bus.write(1, 180).unwrap();

        assert_eq!(log.pulses(0), vec![150, 150]);
        assert_eq!(log.pulses(1), vec![600, 600]);
        assert_eq!(bus.angle(0), 0);
        assert_eq!(bus.angle(1), 180);
    }

    #[test]
    fn test_inverted_channels_follow_leg_config() {
        let (bus, log) = sim_bus();
        // front-right (3..=5) is mounted mirror-reversed
        assert_eq!(bus.mapping(0), PulseMapping::Normal);
        assert_eq!(bus.mapping(3), PulseMapping::Inverted);

        bus.write(3, 0).unwrap();
        assert_eq!(log.pulses(3), vec![600]);
    }

    #[test]
    fn test_step_toward_moves_one_step_and_stops_at_target() {
        let (bus, log) = sim_bus();
        assert!(bus.step_toward(2, 92, 1).unwrap());
        assert_eq!(bus.angle(2), 91);
        assert!(bus.step_toward(2, 92, 5).unwrap());
        assert_eq!(bus.angle(2), 92);
        assert!(!bus.step_toward(2, 92, 1).unwrap());
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_failed_write_leaves_snapshot_untouched() {
        let bus = ServoBus::new(Box::new(SimDriver::failing_on(4)), &default_legs());
        let err = bus.write(4, 10).unwrap_err();
        assert!(matches!(err, GaitError::HardwareWrite { channel: 4, .. }));
        assert_eq!(bus.angle(4), BOOT_ANGLE);
    }

    #[test]
    fn test_unknown_channel_is_rejected() {
        let (bus, log) = sim_bus();
        assert!(bus.write(12, 90).is_err());
        assert!(bus.step_toward(40, 90, 1).is_err());
        assert!(log.is_empty());
    }
}
