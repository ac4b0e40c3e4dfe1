// Servo actuation layer for the quadruped
//
// Provides:
// - The PCA9685 PWM board on Linux I2C (the physical driver)
// - An in-memory driver that records writes
// - The shared ServoBus that serializes every channel write

mod bus;
pub mod pca9685;
pub mod sim;

pub use bus::{
    clamp_angle, JointState, PulseMapping, ServoBus, BOOT_ANGLE, CHANNEL_COUNT, MAX_ANGLE,
    MIN_ANGLE,
};
pub use pca9685::{open_board, DriverError, PwmDriver};
pub use sim::{SimDriver, WriteLog, WriteRecord};
