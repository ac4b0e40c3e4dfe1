// 50 Hz loop with watchdog around the gait engine
// A command is only executed if it is still fresh when the engine is free:
// a teleop that crashed mid-walk must not leave a queued step behind.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::{
    RobotConfig, CMD_TIMEOUT, LOOP_HZ, PWM_FREQUENCY_HZ, TOPIC_CMD_GAIT, TOPIC_HEALTH,
    TOPIC_JOINTS,
};
use crate::error::GaitError;
use crate::gait::{CancelFlag, GaitEngine};
use crate::messages::{Command, GaitStatus, RuntimeHealth};
use crate::servo::{open_board, PwmDriver, ServoBus, SimDriver};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Startup choices taken from the command line
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub sim: bool,
    pub config: RobotConfig,
}

pub struct Runtime {
    pending: Option<(Command, Instant)>,
    health: RuntimeHealth,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            pending: None,
            health: RuntimeHealth::Idle,
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Keep only the latest command, stamped with its arrival time
    pub fn on_command(&mut self, cmd: Command, received_at: Instant) {
        info!("Received command: {:?}", cmd);
        self.pending = Some((cmd, received_at));
    }

    /// Take the pending command if it is still fresh at `now`
    pub fn next_command(&mut self, now: Instant) -> Option<Command> {
        let (cmd, received_at) = self.pending.take()?;
        let age = now.saturating_duration_since(received_at);
        if age > CMD_TIMEOUT {
            warn!("Command {:?} stale ({:?} old), dropping it", cmd, age);
            self.health = RuntimeHealth::CmdStale;
            return None;
        }
        self.health = RuntimeHealth::Walking;
        Some(cmd)
    }

    /// Record how the last executed command ended
    pub fn on_result(&mut self, result: &Result<(), GaitError>) {
        self.health = match result {
            Ok(()) => RuntimeHealth::Idle,
            Err(e) if e.is_hardware() => RuntimeHealth::Fault,
            Err(_) => RuntimeHealth::Idle,
        };
    }
}

fn open_driver(options: &RuntimeOptions) -> Result<Box<dyn PwmDriver>, BoxError> {
    if options.sim {
        info!("Using simulated PWM driver");
        return Ok(Box::new(SimDriver::without_log()));
    }

    let bus = &options.config.bus;
    Ok(open_board(&bus.device, bus.address)?)
}

pub async fn run(options: RuntimeOptions) -> Result<(), BoxError> {
    let driver = open_driver(&options)?;
    let bus = Arc::new(ServoBus::new(driver, &options.config.legs()));
    {
        let bus = Arc::clone(&bus);
        tokio::task::spawn_blocking(move || bus.initialize(PWM_FREQUENCY_HZ)).await??;
    }
    info!("PWM frequency set to {} Hz", PWM_FREQUENCY_HZ);

    let cancel = CancelFlag::new();
    let shutdown = CancelFlag::new();
    let mut engine = GaitEngine::new(Arc::clone(&bus), &options.config, cancel.clone());

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_GAIT).await?;
    let pub_joints = session.declare_publisher(TOPIC_JOINTS).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    // The loop is busy for whole gait sequences, so commands are stamped as
    // they arrive rather than when the loop gets to them.
    let (cmd_tx, mut cmd_rx) = watch::channel(None::<(Command, Instant)>);
    tokio::spawn(async move {
        while let Ok(sample) = subscriber.recv_async().await {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<Command>(&payload) {
                Ok(cmd) => {
                    if cmd_tx.send(Some((cmd, Instant::now()))).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }
    });

    {
        let cancel = cancel.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping after the current waypoint");
                cancel.raise();
                shutdown.raise();
            }
        });
    }

    let mut runtime = Runtime::new();
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CMD_GAIT);
    info!("Publishing to: {}, {}", TOPIC_JOINTS, TOPIC_HEALTH);

    loop {
        tick.tick().await;
        if shutdown.is_raised() {
            break;
        }

        // 1. Pick up the latest command, if a new one arrived
        if matches!(cmd_rx.has_changed(), Ok(true)) {
            if let Some((cmd, at)) = *cmd_rx.borrow_and_update() {
                runtime.on_command(cmd, at);
            }
        }

        // 2. Watchdog, then run the whole sequence
        if let Some(cmd) = runtime.next_command(Instant::now()) {
            pub_health.put(serde_json::to_string(&runtime.health())?).await?;

            let result = engine.execute(cmd).await;
            runtime.on_result(&result);
            match result {
                Ok(()) => {}
                Err(e) if e.is_hardware() => {
                    error!("Hardware fault, stopping runtime: {}", e);
                    pub_health.put(serde_json::to_string(&runtime.health())?).await?;
                    return Err(e.into());
                }
                Err(GaitError::Cancelled { leg }) => {
                    info!("Sequence cancelled at leg {}, feet are down", leg);
                    break;
                }
                Err(e) => warn!("Command {:?} rejected: {}", cmd, e),
            }
        }

        // 3. Publish joint snapshot
        let status = GaitStatus::new(engine.formation(), &bus.snapshot());
        pub_joints.put(serde_json::to_string(&status)?).await?;

        // 4. Publish health
        pub_health.put(serde_json::to_string(&runtime.health())?).await?;
    }

    info!("Runtime stopped in {:?}", engine.formation());
    Ok(())
}
