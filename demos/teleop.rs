// Keyboard teleop: W advance, S retreat, A/D turn, Space stance, Q quit
//
// Each key press publishes one gait command. Holding a key keeps publishing
// on auto-repeat, so the robot keeps walking while the key is down and the
// runtime watchdog drops whatever is left once it is released.
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::Duration;
use tracing::info;

use creep_gait_runtime::config::TOPIC_CMD_GAIT;
use creep_gait_runtime::messages::Command;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_GAIT).await?;

    info!("Controls: W=advance, S=retreat, A/D=turn, Space=stance, Q=quit");
    info!("Send stance first, walking is rejected until the robot stands");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

fn command_for(code: KeyCode) -> Option<Command> {
    match code {
        KeyCode::Char('w') | KeyCode::Up => Some(Command::Advance),
        KeyCode::Char('s') | KeyCode::Down => Some(Command::Retreat),
        KeyCode::Char('a') | KeyCode::Left => Some(Command::TurnLeft),
        KeyCode::Char('d') | KeyCode::Right => Some(Command::TurnRight),
        KeyCode::Char(' ') => Some(Command::Stance),
        _ => None,
    }
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        if !event::poll(Duration::from_millis(20))? {
            continue;
        }
        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        if kind != KeyEventKind::Press && kind != KeyEventKind::Repeat {
            continue;
        }

        if matches!(code, KeyCode::Char('q') | KeyCode::Esc) {
            break;
        }
        if let Some(cmd) = command_for(code) {
            info!("Sending {:?}", cmd);
            publisher.put(serde_json::to_string(&cmd)?).await?;
        }
    }

    Ok(())
}
