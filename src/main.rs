use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

use psu_control_lib::device::{validate_current, validate_voltage, AppSettings, DeviceManager};
use psu_control_lib::serial::{PortOpener, SimulatedSupply, SystemPortOpener};

const SIMULATED_PORT: &str = "SIM0";
const SIMULATED_LOAD_OHMS: f64 = 10.0;

/// Control a bench power supply over its serial port
#[derive(Debug, Parser)]
#[command(name = "psu-control", version, about)]
struct Cli {
    /// Serial port of the supply, e.g. /dev/ttyUSB0 or COM3
    #[arg(short, long)]
    port: Option<String>,

    /// Talk to an in-process simulated supply instead of hardware
    #[arg(long)]
    simulate: bool,

    /// Print results as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show power state, voltage and current
    Status,
    /// Switch the output on
    On,
    /// Switch the output off
    Off,
    /// Set the output voltage
    SetVoltage {
        #[arg(allow_negative_numbers = true)]
        volts: f64,
    },
    /// Set the current limit
    SetMaxCurrent {
        #[arg(allow_negative_numbers = true)]
        amps: f64,
    },
    /// Report output current changes until interrupted
    Monitor {
        /// Seconds between samples
        #[arg(short, long, default_value_t = 1)]
        interval: u64,
        /// Stop after this many changes
        #[arg(short = 'n', long)]
        samples: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut settings = AppSettings {
        port: cli.port.clone(),
        ..AppSettings::default()
    };

    let opener: Arc<dyn PortOpener> = if cli.simulate {
        if settings.port.is_none() {
            settings.port = Some(SIMULATED_PORT.to_string());
        }
        let supply = SimulatedSupply::new();
        supply.set_load(SIMULATED_LOAD_OHMS);
        supply.set_voltage(5.0);
        supply.set_powered(true);
        Arc::new(supply)
    } else {
        Arc::new(SystemPortOpener)
    };

    let Some(port) = settings.port.clone() else {
        bail!("no serial port given, use --port or --simulate");
    };

    let manager = DeviceManager::with_settings(opener, &settings);
    manager
        .open(&port)
        .await
        .with_context(|| format!("failed to open port {}", port))?;

    let result = run(&cli.command, cli.json, &manager).await;
    manager.shutdown().await;
    result
}

async fn run(command: &Command, json: bool, manager: &DeviceManager) -> anyhow::Result<()> {
    match command {
        Command::Status => {
            let state = manager.state().await.context("failed to read supply state")?;
            if json {
                println!("{}", serde_json::to_string(&state)?);
            } else {
                println!(
                    "output {}  {:.3} V  {:.3} A",
                    if state.powered { "ON" } else { "OFF" },
                    state.voltage,
                    state.current
                );
            }
        }
        Command::On => manager.turn_on().await.context("failed to turn on supply")?,
        Command::Off => manager.turn_off().await.context("failed to turn off supply")?,
        Command::SetVoltage { volts } => {
            let volts = validate_voltage(*volts)?;
            manager.write_voltage(volts).await.context("failed to set voltage")?;
        }
        Command::SetMaxCurrent { amps } => {
            let amps = validate_current(*amps)?;
            manager
                .write_max_current(amps)
                .await
                .context("failed to set current limit")?;
        }
        Command::Monitor { interval, samples } => monitor(json, manager, *interval, *samples).await?,
    }
    Ok(())
}

async fn monitor(json: bool, manager: &DeviceManager, interval_secs: u64, limit: Option<usize>) -> anyhow::Result<()> {
    let mut events = manager.subscribe();
    manager.start_monitoring(interval_secs).await;

    let mut seen = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if json {
                        println!("{}", serde_json::to_string(&event)?);
                    } else {
                        println!("{}  {:.4} A", event.timestamp.format("%H:%M:%S%.3f"), event.current);
                    }
                    seen += 1;
                    if limit.is_some_and(|n| seen >= n) {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => log::warn!("Dropped {} current changes", missed),
                Err(RecvError::Closed) => break,
            }
        }
    }

    manager.stop_monitoring().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use psu_control_lib::DeviceError;

    async fn simulated_manager() -> (DeviceManager, SimulatedSupply) {
        let sim = SimulatedSupply::new();
        let manager = DeviceManager::with_opener(Arc::new(sim.clone()));
        manager.open(SIMULATED_PORT).await.unwrap();
        (manager, sim)
    }

    #[test]
    fn test_parse_negative_setpoint() {
        let cli = Cli::try_parse_from(["psu-control", "--simulate", "set-voltage", "-1"]).unwrap();
        assert!(cli.simulate);
        assert!(matches!(cli.command, Command::SetVoltage { volts } if volts == -1.0));

        let cli = Cli::try_parse_from(["psu-control", "-p", "COM3", "monitor", "-n", "3"]).unwrap();
        assert_eq!(cli.port.as_deref(), Some("COM3"));
        assert!(matches!(cli.command, Command::Monitor { interval: 1, samples: Some(3) }));
    }

    #[tokio::test]
    async fn test_invalid_setpoints_send_nothing() {
        let (manager, sim) = simulated_manager().await;

        let err = run(&Command::SetVoltage { volts: -1.0 }, false, &manager).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<DeviceError>(), Some(DeviceError::InvalidVoltage(_))));

        let err = run(&Command::SetMaxCurrent { amps: f64::NAN }, false, &manager).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<DeviceError>(), Some(DeviceError::InvalidCurrent(_))));

        assert!(sim.received().is_empty());
    }

    #[tokio::test]
    async fn test_setpoints_and_power_reach_supply() {
        let (manager, sim) = simulated_manager().await;

        run(&Command::SetVoltage { volts: 12.5 }, false, &manager).await.unwrap();
        run(&Command::SetMaxCurrent { amps: 0.75 }, false, &manager).await.unwrap();
        run(&Command::On, false, &manager).await.unwrap();
        assert_eq!(sim.voltage(), 12.5);
        assert_eq!(sim.max_current(), 0.75);
        assert!(sim.is_powered());

        run(&Command::Status, true, &manager).await.unwrap();
        run(&Command::Off, false, &manager).await.unwrap();
        assert!(!sim.is_powered());
    }

    #[tokio::test]
    async fn test_status_fails_when_closed() {
        let (manager, sim) = simulated_manager().await;
        manager.close().await;

        let err = run(&Command::Status, false, &manager).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<DeviceError>(), Some(DeviceError::DeviceNotConnected)));
        assert!(sim.received().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_stops_after_samples() {
        let (manager, sim) = simulated_manager().await;
        sim.push_current(0.5);
        sim.push_current(0.5);
        sim.set_current(0.8);

        let command = Command::Monitor {
            interval: 1,
            samples: Some(2),
        };
        run(&command, true, &manager).await.unwrap();

        assert!(!manager.is_monitoring().await);
        assert!(manager.is_open().await);
    }
}
