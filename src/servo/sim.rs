// In-memory PWM driver standing in for the board
//
// The runtime uses it without hardware (log off). Tests keep the log to
// inspect the exact write sequence a gait produced.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::time::Instant;
use tracing::debug;

use super::pca9685::{DriverError, PwmDriver, Result};

/// One pulse written to the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    /// Position in the global write order
    pub seq: u64,
    pub channel: u8,
    pub pulse: u16,
    pub at: Instant,
}

/// Shared view of the writes a [`SimDriver`] has accepted
#[derive(Debug, Clone, Default)]
pub struct WriteLog {
    records: Arc<Mutex<Vec<WriteRecord>>>,
}

impl WriteLog {
    pub fn records(&self) -> Vec<WriteRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pulses written to one channel, oldest first
    pub fn pulses(&self, channel: u8) -> Vec<u16> {
        self.records()
            .into_iter()
            .filter(|r| r.channel == channel)
            .map(|r| r.pulse)
            .collect()
    }

    fn push(&self, channel: u8, pulse: u16) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = records.len() as u64;
        records.push(WriteRecord {
            seq,
            channel,
            pulse,
            at: Instant::now(),
        });
    }
}

#[derive(Debug)]
pub struct SimDriver {
    log: WriteLog,
    recording: bool,
    frequency: Option<u32>,
    dead_channel: Option<u8>,
}

impl Default for SimDriver {
    fn default() -> Self {
        Self {
            log: WriteLog::default(),
            recording: true,
            frequency: None,
            dead_channel: None,
        }
    }
}

impl SimDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept writes without keeping them, for long-running `--sim` sessions
    pub fn without_log() -> Self {
        Self {
            recording: false,
            ..Self::default()
        }
    }

    /// Simulate a disconnected servo: writes to `channel` are rejected
    pub fn failing_on(channel: u8) -> Self {
        Self {
            dead_channel: Some(channel),
            ..Self::default()
        }
    }

    pub fn log(&self) -> WriteLog {
        self.log.clone()
    }

    pub fn frequency(&self) -> Option<u32> {
        self.frequency
    }
}

impl PwmDriver for SimDriver {
    fn set_pwm_freq(&mut self, hz: u32) -> Result<()> {
        debug!("Simulated PWM frequency set to {} Hz", hz);
        self.frequency = Some(hz);
        Ok(())
    }

    fn set_pwm(&mut self, channel: u8, _on: u16, off: u16) -> Result<()> {
        if self.dead_channel == Some(channel) {
            return Err(DriverError::NoAcknowledge { channel });
        }
        if self.recording {
            self.log.push(channel, off);
        }
        Ok(())
    }
}
