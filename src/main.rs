use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use creep_gait_runtime::config::RobotConfig;
use creep_gait_runtime::runtime::{self, RuntimeOptions};

#[derive(Parser, Debug)]
#[command(name = "creep-gait-runtime")]
#[command(about = "Quadruped creep gait runtime")]
struct Args {
    /// I2C device of the PCA9685 board (overrides the config file)
    #[arg(short, long)]
    i2c: Option<String>,

    /// I2C address of the PCA9685 board, decimal or 0x-prefixed hex
    #[arg(short, long, value_parser = parse_address)]
    address: Option<u8>,

    /// Drive an in-memory board instead of hardware
    #[arg(long)]
    sim: bool,

    /// JSON file with leg wiring, calibration and gait timing
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn parse_address(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid I2C address {:?}: {}", s, e))
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match RobotConfig::load(path) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                eprintln!("Config error: {}", e);
                std::process::exit(1);
            }
        },
        None => RobotConfig::default(),
    };

    if let Some(device) = args.i2c {
        config.bus.device = device;
    }
    if let Some(address) = args.address {
        config.bus.address = address;
    }
    if let Err(e) = config.validate() {
        eprintln!("Config error: {}", e);
        std::process::exit(1);
    }

    let options = RuntimeOptions {
        sim: args.sim,
        config,
    };

    if let Err(e) = runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_accepts_hex_and_decimal() {
        assert_eq!(parse_address("0x41"), Ok(0x41));
        assert_eq!(parse_address("64"), Ok(0x40));
        assert!(parse_address("0x1FF").is_err());
    }
}
