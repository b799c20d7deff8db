//! # SIANA robot daemon
//!
//! Runs the control core and speaks line-delimited JSON over stdio:
//!
//! ```text
//! stdin  -> {"action":"forward"}
//!           {"action":"set_speed","value":40}
//! stdout <- {"type":"cmd_ack","accepted":true,"message":"Moving forward",...}
//!           {"type":"telemetry","timestamp":...,"data":{...}}
//! ```
//!
//! Logs go to stderr. `RUST_LOG` overrides the configured `log_level`.

mod link;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, never, select, tick};
use link::{Inbound, Outbound};
use siana_control::{Hardware, Robot};
use siana_tools::RobotConfig;
use std::io;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// SIANA inspection robot daemon
#[derive(Parser, Debug)]
#[command(name = "siana-robotd")]
#[command(about = "Control daemon for the SIANA inspection robot", long_about = None)]
#[command(version)]
struct Args {
    /// Config file (TOML)
    ///
    /// Default: <config dir>/siana/robot.toml if it exists, built-in defaults otherwise
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Telemetry period in milliseconds, overrides the config
    #[arg(long)]
    telemetry_interval_ms: Option<u64>,

    /// Do not emit periodic telemetry
    #[arg(long)]
    no_telemetry: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("siana").join("robot.toml"))
}

fn load_config(args: &Args) -> Result<RobotConfig> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(RobotConfig::default()),
        },
    };
    RobotConfig::load_from_file(&path)
        .with_context(|| format!("Failed to load config {}", path.display()))
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(&args)?;
    if let Some(ms) = args.telemetry_interval_ms {
        config.telemetry_interval_ms = ms;
    }
    config.validate().context("Invalid configuration")?;

    if args.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    init_logging(&config.log_level);

    let (interrupt_tx, interrupt_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })
    .context("Failed to set Ctrl+C handler")?;

    let telemetry_period = config.telemetry_interval();
    let robot = Robot::build(config, Hardware::simulated()).context("Failed to build robot")?;
    robot.start().context("Failed to start robot")?;

    let inbound = link::spawn_reader(io::stdin()).context("Failed to start stdin reader")?;
    let mut outbound = Outbound::new(io::stdout().lock());
    let ticker = if args.no_telemetry {
        never()
    } else {
        tick(telemetry_period)
    };

    info!("siana-robotd ready, reading commands from stdin");
    loop {
        select! {
            recv(inbound) -> message => match message {
                Ok(Inbound::Command(request)) => {
                    let result = robot.handle_command(&request);
                    outbound.ack(&result)?;
                },
                Ok(Inbound::Invalid(error)) => {
                    robot.safety().heartbeat();
                    outbound.error(&format!("Invalid command: {}", error))?;
                },
                Err(_) => {
                    info!("Operator link closed");
                    break;
                },
            },
            recv(ticker) -> _ => outbound.telemetry(&robot.telemetry_tick())?,
            recv(interrupt_rx) -> _ => {
                info!("Interrupt received");
                break;
            },
        }
    }

    robot.shutdown();
    Ok(())
}
