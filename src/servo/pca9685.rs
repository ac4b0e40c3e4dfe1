// PCA9685 16-channel PWM driver on a Linux I2C bus
//
// Chip access goes through the pwm-pca9685 driver; this module adapts it to
// the PwmDriver seam the servo bus writes through and maps its errors.

use embedded_hal::i2c::{Error as _, ErrorKind, I2c};
use pwm_pca9685::{Address, Channel, Pca9685};
use tracing::{debug, info};

/// PCA9685 internal oscillator and counter resolution
pub const OSCILLATOR_HZ: f64 = 25_000_000.0;
pub const COUNTER_STEPS: u16 = 4096;

const CHANNELS: [Channel; 16] = [
    Channel::C0,
    Channel::C1,
    Channel::C2,
    Channel::C3,
    Channel::C4,
    Channel::C5,
    Channel::C6,
    Channel::C7,
    Channel::C8,
    Channel::C9,
    Channel::C10,
    Channel::C11,
    Channel::C12,
    Channel::C13,
    Channel::C14,
    Channel::C15,
];

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Cannot open I2C device {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("No acknowledge from the PWM board while writing channel {channel}")]
    NoAcknowledge { channel: u8 },

    #[error("I2C transfer failed: {0}")]
    I2c(String),

    #[error("PWM board rejected an out-of-range value")]
    InvalidInput,

    #[error("Channel {channel} is not wired to a servo")]
    ChannelOutOfRange { channel: u8 },

    #[error("Pulse {pulse} on channel {channel} exceeds the counter range")]
    PulseOutOfRange { channel: u8, pulse: u16 },
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// Anything that can hold a pulse on a PWM channel.
///
/// `on`/`off` are counter ticks within one PWM period (0..4096). Calls may
/// block on bus I/O.
pub trait PwmDriver: Send {
    fn set_pwm_freq(&mut self, hz: u32) -> Result<()>;

    fn set_pwm(&mut self, channel: u8, on: u16, off: u16) -> Result<()>;
}

/// Prescale register value for an output frequency
pub fn prescale_for(hz: u32) -> u8 {
    let prescale = OSCILLATOR_HZ / f64::from(COUNTER_STEPS) / f64::from(hz.max(1)) - 1.0;
    (prescale + 0.5).floor().clamp(3.0, 255.0) as u8
}

fn chip_error<E: embedded_hal::i2c::Error>(
    channel: Option<u8>,
    err: pwm_pca9685::Error<E>,
) -> DriverError {
    match err {
        pwm_pca9685::Error::I2C(e) => match (e.kind(), channel) {
            (ErrorKind::NoAcknowledge(_), Some(channel)) => DriverError::NoAcknowledge { channel },
            _ => DriverError::I2c(format!("{:?}", e)),
        },
        pwm_pca9685::Error::InvalidInputData => DriverError::InvalidInput,
    }
}

impl<I2C> PwmDriver for Pca9685<I2C>
where
    I2C: I2c + Send,
{
    fn set_pwm_freq(&mut self, hz: u32) -> Result<()> {
        let prescale = prescale_for(hz);
        debug!("PWM frequency {} Hz -> prescale {}", hz, prescale);
        self.set_prescale(prescale).map_err(|e| chip_error(None, e))?;
        self.enable().map_err(|e| chip_error(None, e))
    }

    fn set_pwm(&mut self, channel: u8, on: u16, off: u16) -> Result<()> {
        let output = CHANNELS
            .get(channel as usize)
            .copied()
            .ok_or(DriverError::ChannelOutOfRange { channel })?;
        if on >= COUNTER_STEPS || off >= COUNTER_STEPS {
            return Err(DriverError::PulseOutOfRange {
                channel,
                pulse: off.max(on),
            });
        }
        self.set_channel_on_off(output, on, off)
            .map_err(|e| chip_error(Some(channel), e))
    }
}

/// Open the board at `address` on the I2C device `path`
#[cfg(target_os = "linux")]
pub fn open_board(path: &str, address: u8) -> Result<Box<dyn PwmDriver>> {
    info!("Opening PCA9685 at 0x{:02X} on {}...", address, path);
    let dev = linux_embedded_hal::I2cdev::new(path).map_err(|e| DriverError::Open {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    let board = Pca9685::new(dev, Address::from(address)).map_err(|e| chip_error(None, e))?;
    Ok(Box::new(board))
}

#[cfg(not(target_os = "linux"))]
pub fn open_board(path: &str, address: u8) -> Result<Box<dyn PwmDriver>> {
    info!("Opening PCA9685 at 0x{:02X} on {}...", address, path);
    Err(DriverError::Open {
        path: path.to_string(),
        reason: "I2C devices are only available on Linux, use --sim".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorType, NoAcknowledgeSource, Operation};
    use std::sync::{Arc, Mutex};

    /// Bus that keeps every written frame, or refuses all of them
    #[derive(Default, Clone)]
    struct RecordingI2c {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        nack: bool,
    }

    impl ErrorType for RecordingI2c {
        type Error = ErrorKind;
    }

    impl I2c for RecordingI2c {
        fn transaction(
            &mut self,
            _address: u8,
            operations: &mut [Operation<'_>],
        ) -> std::result::Result<(), ErrorKind> {
            if self.nack {
                return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
            }
            for op in operations {
                match op {
                    Operation::Write(bytes) => self.writes.lock().unwrap().push(bytes.to_vec()),
                    Operation::Read(buf) => buf.fill(0),
                }
            }
            Ok(())
        }
    }

    fn board(i2c: RecordingI2c) -> Pca9685<RecordingI2c> {
        Pca9685::new(i2c, Address::default()).unwrap()
    }

    #[test]
    fn test_prescale_for_servo_frequencies() {
        // 25MHz / 4096 / 60Hz - 1 = 100.7
        assert_eq!(prescale_for(60), 101);
        assert_eq!(prescale_for(50), 121);
        // register floor
        assert_eq!(prescale_for(100_000), 3);
    }

    #[test]
    fn test_frequency_programs_prescale_register() {
        let i2c = RecordingI2c::default();
        let mut pwm = board(i2c.clone());
        pwm.set_pwm_freq(60).unwrap();

        // PRE_SCALE lives at 0xFE
        let writes = i2c.writes.lock().unwrap();
        assert!(writes.iter().any(|w| w.as_slice() == [0xFE, 101]));
    }

    #[test]
    fn test_channel_pulse_reaches_led_registers() {
        let i2c = RecordingI2c::default();
        let mut pwm = board(i2c.clone());
        pwm.set_pwm(3, 0, 375).unwrap();

        // channel 3 registers start at 0x06 + 4 * 3; off = 375 = 0x0177
        let writes = i2c.writes.lock().unwrap();
        assert!(writes.iter().any(|w| {
            (0x12..=0x15).contains(&w[0]) && w.windows(2).any(|pair| pair == [0x77, 0x01])
        }));
    }

    #[test]
    fn test_unwired_channel_and_pulse_rejected_without_traffic() {
        let i2c = RecordingI2c::default();
        let mut pwm = board(i2c.clone());
        let writes_before = i2c.writes.lock().unwrap().len();

        assert!(matches!(
            pwm.set_pwm(16, 0, 375),
            Err(DriverError::ChannelOutOfRange { channel: 16 })
        ));
        assert!(matches!(
            pwm.set_pwm(2, 0, 4096),
            Err(DriverError::PulseOutOfRange { channel: 2, .. })
        ));
        assert_eq!(i2c.writes.lock().unwrap().len(), writes_before);
    }

    #[test]
    fn test_missing_acknowledge_names_the_channel() {
        let mut pwm = board(RecordingI2c {
            nack: true,
            ..RecordingI2c::default()
        });
        assert!(matches!(
            pwm.set_pwm(4, 0, 300),
            Err(DriverError::NoAcknowledge { channel: 4 })
        ));
        assert!(matches!(pwm.set_pwm_freq(60), Err(DriverError::I2c(_))));
    }
}
