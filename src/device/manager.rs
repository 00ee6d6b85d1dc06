use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Duration;

use super::{AppSettings, DeviceState, PowerSupply, Result, DEFAULT_SAMPLE_INTERVAL_SECS};
use crate::serial::{PortOpener, SystemPortOpener};
use crate::telemetry::{CurrentChanged, CurrentMonitor};

/// Everything a front end needs to drive one bench supply.
///
/// Owns the power supply and its current monitor, and keeps the shutdown
/// order: the monitor is stopped before the port is closed.
pub struct DeviceManager {
    supply: Arc<PowerSupply>,
    monitor: CurrentMonitor,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self::with_opener(Arc::new(SystemPortOpener))
    }

    pub fn with_opener(opener: Arc<dyn PortOpener>) -> Self {
        Self::from_supply(PowerSupply::with_opener(opener))
    }

    pub fn with_settings(opener: Arc<dyn PortOpener>, settings: &AppSettings) -> Self {
        Self::from_supply(PowerSupply::with_settings(opener, settings.serial.clone()))
    }

    fn from_supply(supply: PowerSupply) -> Self {
        Self {
            supply: Arc::new(supply),
            monitor: CurrentMonitor::new(),
        }
    }

    /// The controller, for callers that need direct access.
    pub fn supply(&self) -> &Arc<PowerSupply> {
        &self.supply
    }

    /// Open `port_name`. Switching away from an open port stops the monitor
    /// first, so its state never carries over to the new session.
    pub async fn open(&self, port_name: &str) -> Result<()> {
        if let Some(current) = self.supply.port_name().await {
            if current != port_name {
                self.monitor.stop().await;
            }
        }
        self.supply.open(port_name).await
    }

    /// Stop monitoring, then close the port.
    pub async fn close(&self) {
        self.monitor.stop().await;
        self.supply.close().await;
    }

    pub async fn is_open(&self) -> bool {
        self.supply.is_open().await
    }

    pub async fn port_name(&self) -> Option<String> {
        self.supply.port_name().await
    }

    pub async fn turn_on(&self) -> Result<()> {
        self.supply.turn_on().await
    }

    pub async fn turn_off(&self) -> Result<()> {
        self.supply.turn_off().await
    }

    pub async fn is_on(&self) -> Result<bool> {
        self.supply.is_on().await
    }

    pub async fn write_voltage(&self, volts: f64) -> Result<()> {
        self.supply.write_voltage(volts).await
    }

    pub async fn read_voltage(&self) -> Result<f64> {
        self.supply.read_voltage().await
    }

    pub async fn read_current(&self) -> Result<f64> {
        self.supply.read_current().await
    }

    pub async fn write_max_current(&self, amps: f64) -> Result<()> {
        self.supply.write_max_current(amps).await
    }

    pub async fn read_max_current(&self) -> Result<f64> {
        self.supply.read_max_current().await
    }

    pub async fn state(&self) -> Result<DeviceState> {
        self.supply.state().await
    }

    /// Sample the current every `interval_secs` seconds; 0 falls back to the
    /// default of one second.
    pub async fn start_monitoring(&self, interval_secs: u64) {
        let secs = if interval_secs == 0 {
            log::warn!("Sample interval of 0s requested, using {}s", DEFAULT_SAMPLE_INTERVAL_SECS);
            DEFAULT_SAMPLE_INTERVAL_SECS
        } else {
            interval_secs
        };
        self.start_monitoring_every(Duration::from_secs(secs)).await;
    }

    pub async fn start_monitoring_every(&self, interval: Duration) {
        self.monitor.start(&self.supply, interval).await;
    }

    pub async fn stop_monitoring(&self) {
        self.monitor.stop().await;
    }

    pub async fn is_monitoring(&self) -> bool {
        self.monitor.is_running().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CurrentChanged> {
        self.monitor.subscribe()
    }

    /// Call `callback` from a background task for every current change.
    pub fn on_current_changed<F>(&self, mut callback: F) -> tokio::task::JoinHandle<()>
    where
        F: FnMut(f64) + Send + 'static,
    {
        let mut events = self.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => callback(event.current),
                    Err(RecvError::Lagged(missed)) => {
                        log::warn!("Current change listener fell behind, {} events dropped", missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Stop monitoring and close the port.
    pub async fn shutdown(&self) {
        log::info!("Shutting down power supply session");
        self.close().await;
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}
