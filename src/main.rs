//! # Tank Level Sensor Entry Point
//!
//! Wires the real collaborators (serial sensor, UDP broadcast, host network,
//! MQTT broker) into a [`Station`] and drives it from a fixed-period timer.
//!
//! - `--simulate` replaces the serial sensor with a synthetic tank
//! - `--stdout` prints the status panel to the terminal
//!
//! When the network fail-safe gives up, the process exits with
//! [`RESTART_EXIT_CODE`] so the service manager starts it afresh.

use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tank_level_lib::config::{Config, DEFAULT_CONFIG_PATH};
use tank_level_lib::display::ConsoleDisplay;
use tank_level_lib::sensor::{Ds1603lSensor, SensorSource};
use tank_level_lib::simulator::SimulatedSensor;
use tank_level_lib::station::{Station, TickOutcome, RESTART_EXIT_CODE};
use tank_level_lib::transport::{MqttLink, NetworkLink, UdpBroadcast};
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;

/// Tank level to NMEA0183 bridge.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use a simulated tank instead of the serial sensor
    #[arg(long)]
    simulate: bool,

    /// Print the status panel to stdout
    #[arg(long)]
    stdout: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = Config::load_from_path(&args.config);
    config.validate().context("invalid configuration")?;

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(run(&args, &config))?;
    drop(rt);

    if outcome == TickOutcome::Restart {
        warn!("Exiting with status {} for restart", RESTART_EXIT_CODE);
        std::process::exit(RESTART_EXIT_CODE);
    }
    Ok(())
}

/// Drive the station until Ctrl-C or a restart request.
async fn run(args: &Args, config: &Config) -> anyhow::Result<TickOutcome> {
    let started = Instant::now();

    let sensor: Box<dyn SensorSource> = if args.simulate {
        info!("Using simulated tank ({} mm)", config.tank.height_mm);
        Box::new(SimulatedSensor::new(started, config.tank.height_mm))
    } else {
        let stale_after = Duration::from_millis(config.sensor.stale_after_ms);
        Box::new(Ds1603lSensor::open(&config.sensor.device, stale_after).await?)
    };

    let broadcast = UdpBroadcast::bind(&config.broadcast, &config.network.probe_address)
        .context("cannot open broadcast socket")?;
    let network = NetworkLink::new(&config.network);
    let broker = MqttLink::new(&config.broker, Handle::current());

    let mut station = Station::new(config, started, sensor, broadcast, network, broker);
    if args.stdout {
        let display = ConsoleDisplay::stdout(config.driver.display_refresh_ticks);
        station = station.with_display(Box::new(display));
    }

    let mut interval = tokio::time::interval(Duration::from_millis(config.driver.tick_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!(
        "Level station running: tank {} mm, tick {} ms",
        config.tank.height_mm, config.driver.tick_ms
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if station.tick(Instant::now()) == TickOutcome::Restart {
                    return Ok(TickOutcome::Restart);
                }
            }
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                return Ok(TickOutcome::Continue);
            }
        }
    }
}
