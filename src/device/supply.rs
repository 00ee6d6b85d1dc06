use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use super::{DeviceError, DeviceState, Result};
use crate::serial::protocol::{format_number, parse_number, parse_power_state};
use crate::serial::{CommandProtocol, PortOpener, PsuCommand, SerialSession, SerialSettings};

/// Operational surface of the bench supply.
///
/// The protocol, and with it the serial session, sits behind a single async
/// mutex. Every operation holds the guard from its "is the port open" check
/// until the reply has been read, so exchanges from the foreground and from the
/// current monitor never interleave on the line.
pub struct PowerSupply {
    protocol: Mutex<CommandProtocol>,
}

impl PowerSupply {
    pub fn new() -> Self {
        Self::from_session(SerialSession::new())
    }

    pub fn with_opener(opener: Arc<dyn PortOpener>) -> Self {
        Self::from_session(SerialSession::with_opener(opener))
    }

    pub fn with_settings(opener: Arc<dyn PortOpener>, settings: SerialSettings) -> Self {
        Self::from_session(SerialSession::with_settings(opener, settings))
    }

    fn from_session(session: SerialSession) -> Self {
        Self {
            protocol: Mutex::new(CommandProtocol::new(session)),
        }
    }

    /// Open `port_name`. Asking again for the port that is already open does
    /// nothing; asking for another one closes the current port first.
    pub async fn open(&self, port_name: &str) -> Result<()> {
        let mut protocol = self.protocol.lock().await;
        let session = protocol.session_mut();

        if session.is_open() && session.port_name() == port_name {
            log::debug!("Port {} already open", port_name);
            return Ok(());
        }

        session.open(port_name).map_err(|e| {
            log::error!("Power supply: failed to open port {}: {}", port_name, e);
            DeviceError::DeviceNotConnected
        })
    }

    /// Close the port. Waits for any exchange in flight to finish.
    pub async fn close(&self) {
        self.protocol.lock().await.session_mut().close();
    }

    pub async fn is_open(&self) -> bool {
        self.protocol.lock().await.session().is_open()
    }

    /// Active port identifier, if a port is open.
    pub async fn port_name(&self) -> Option<String> {
        let protocol = self.protocol.lock().await;
        let session = protocol.session();
        session.is_open().then(|| session.port_name().to_string())
    }

    pub async fn turn_on(&self) -> Result<()> {
        self.command(PsuCommand::PowerOn, None).await?;
        log::info!("Power supply: turned on");
        Ok(())
    }

    pub async fn turn_off(&self) -> Result<()> {
        self.command(PsuCommand::PowerOff, None).await?;
        log::info!("Power supply: turned off");
        Ok(())
    }

    pub async fn is_on(&self) -> Result<bool> {
        let response = self.query(PsuCommand::QueryPower).await?;
        Ok(parse_power_state(&response)?)
    }

    /// Set the output voltage. The value is not range checked here, see
    /// [`validate_voltage`](super::validate_voltage).
    pub async fn write_voltage(&self, volts: f64) -> Result<()> {
        self.command(PsuCommand::WriteVoltage, Some(format_number(volts))).await?;
        log::info!("Power supply: set voltage to {}V", volts);
        Ok(())
    }

    pub async fn read_voltage(&self) -> Result<f64> {
        let response = self.query(PsuCommand::ReadVoltage).await?;
        Ok(parse_number(&response)?)
    }

    pub async fn read_current(&self) -> Result<f64> {
        let response = self.query(PsuCommand::ReadCurrent).await?;
        Ok(parse_number(&response)?)
    }

    /// Set the output current setpoint.
    pub async fn write_current(&self, amps: f64) -> Result<()> {
        self.command(PsuCommand::WriteCurrent, Some(format_number(amps))).await?;
        log::info!("Power supply: set current to {}A", amps);
        Ok(())
    }

    pub async fn write_max_current(&self, amps: f64) -> Result<()> {
        self.command(PsuCommand::WriteMaxCurrent, Some(format_number(amps))).await?;
        log::info!("Power supply: set current limit to {}A", amps);
        Ok(())
    }

    pub async fn read_max_current(&self) -> Result<f64> {
        let response = self.query(PsuCommand::ReadMaxCurrent).await?;
        Ok(parse_number(&response)?)
    }

    /// Power state, voltage and current read back to back without another
    /// exchange getting in between.
    pub async fn state(&self) -> Result<DeviceState> {
        let mut protocol = self.connected().await?;
        let powered = parse_power_state(&protocol.send_and_read(PsuCommand::QueryPower, None).await?)?;
        let voltage = parse_number(&protocol.send_and_read(PsuCommand::ReadVoltage, None).await?)?;
        let current = parse_number(&protocol.send_and_read(PsuCommand::ReadCurrent, None).await?)?;
        Ok(DeviceState { powered, voltage, current })
    }

    /// Lock the protocol, failing fast when no port is open.
    async fn connected(&self) -> Result<MutexGuard<'_, CommandProtocol>> {
        let protocol = self.protocol.lock().await;
        if !protocol.session().is_open() {
            log::debug!("Power supply: device not connected");
            return Err(DeviceError::DeviceNotConnected);
        }
        Ok(protocol)
    }

    async fn command(&self, command: PsuCommand, param: Option<String>) -> Result<()> {
        let mut protocol = self.connected().await?;
        protocol.send(command, param.as_deref())?;
        Ok(())
    }

    async fn query(&self, command: PsuCommand) -> Result<String> {
        let mut protocol = self.connected().await?;
        Ok(protocol.send_and_read(command, None).await?)
    }
}

impl Default for PowerSupply {
    fn default() -> Self {
        Self::new()
    }
}
