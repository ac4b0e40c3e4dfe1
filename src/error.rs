// Errors surfaced by the gait engine to its command sources

use crate::gait::{GaitFormation, LegId};
use crate::messages::Command;
use crate::servo::DriverError;

/// Failure of a gait operation.
///
/// None of these are retried inside the engine: a half-executed phase cannot
/// be resumed blindly, so the caller decides whether to retry or command a
/// fresh stance.
#[derive(Debug, thiserror::Error)]
pub enum GaitError {
    #[error("Hardware write failed on channel {channel}: {source}")]
    HardwareWrite {
        channel: u8,
        #[source]
        source: DriverError,
    },

    #[error("No {command:?} sequence is defined in formation {formation:?}")]
    InvalidCommand {
        command: Command,
        formation: GaitFormation,
    },

    #[error("Motion of leg {leg} was cancelled")]
    Cancelled { leg: LegId },

    #[error("Leg {leg} appears twice in one concurrent group")]
    OverlappingChannels { leg: LegId },

    #[error("Actuation task failed: {0}")]
    TaskFailed(String),
}

impl GaitError {
    /// Whether the error came from the physical bus.
    pub fn is_hardware(&self) -> bool {
        matches!(self, GaitError::HardwareWrite { .. })
    }
}

pub type Result<T> = std::result::Result<T, GaitError>;
