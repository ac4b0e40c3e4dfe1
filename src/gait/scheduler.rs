// Concurrent and sequential dispatch of leg moves

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use super::actuator::LegActuator;
use super::leg::LegId;
use crate::error::{GaitError, Result};

/// One leg driven to one raw target triple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegMove {
    pub leg: LegId,
    pub targets: [i16; 3],
}

impl LegMove {
    pub fn new(leg: LegId, targets: [i16; 3]) -> Self {
        Self { leg, targets }
    }
}

/// Turns declarative phases into actuation tasks.
///
/// Tasks live for one group only: spawned on entry, all joined before
/// returning.
pub struct MotionScheduler {
    actuator: Arc<LegActuator>,
    settle: Duration,
}

impl MotionScheduler {
    pub fn new(actuator: Arc<LegActuator>, settle: Duration) -> Self {
        Self { actuator, settle }
    }

    pub fn actuator(&self) -> &Arc<LegActuator> {
        &self.actuator
    }

    /// Run every move at once and wait for all of them.
    ///
    /// A failing participant does not cut the others short; the first error
    /// is returned after the whole group has been joined.
    pub async fn run_concurrent(&self, moves: &[LegMove]) -> Result<()> {
        let mut seen = BTreeSet::new();
        for mv in moves {
            if !seen.insert(mv.leg) {
                return Err(GaitError::OverlappingChannels { leg: mv.leg });
            }
        }

        debug!("Concurrent group: {:?}", moves);
        let mut tasks = JoinSet::new();
        for &mv in moves {
            let actuator = Arc::clone(&self.actuator);
            tasks.spawn(async move { actuator.move_to(mv.leg, mv.targets).await });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| GaitError::TaskFailed(e.to_string()))
                .and_then(|r| r);
            if let Err(e) = outcome {
                if first_error.is_none() {
                    error!("Concurrent group participant failed: {}", e);
                    first_error = Some(e);
                } else {
                    warn!("Further failure in the same group: {}", e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run moves one after another with a settle delay between them
    pub async fn run_sequential(&self, moves: &[LegMove]) -> Result<()> {
        for (i, mv) in moves.iter().enumerate() {
            if i > 0 {
                sleep(self.settle).await;
            }
            self.actuator.move_to(mv.leg, mv.targets).await?;
        }
        Ok(())
    }
}
