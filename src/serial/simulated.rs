//! In-process stand-in for the bench supply.
//!
//! Speaks the same line protocol as the hardware: it parses every command line
//! written to it and queues the reply line a real supply would send. Tests
//! script current readings and failures through it, and it also records
//! whether two exchanges ever overlapped on the line.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::protocol::{parse_number, PsuCommand};
use super::{PortOpener, Result, SerialError, SerialLink, SerialSettings};

/// One scripted answer to `MEAS:CURR?`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CurrentReading {
    Value(f64),
    /// The supply answers with a line that is not a number.
    Garbled,
    /// The supply does not answer at all.
    Silent,
}

#[derive(Debug, Default)]
struct SimState {
    powered: bool,
    voltage: f64,
    current: f64,
    current_limit: f64,
    max_current: f64,
    load_ohms: Option<f64>,
    readings: VecDeque<CurrentReading>,
    outbound: VecDeque<u8>,
    inbound: Vec<u8>,
    received: Vec<String>,
    awaiting_read: bool,
    overlaps: usize,
    unplugged: bool,
    refuse_open: bool,
    opened: Vec<String>,
}

/// Simulated supply; clones share the same device.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSupply {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedSupply {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        // A panicking test thread must not take every other assertion down with it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current reported once scripted readings run out.
    pub fn set_current(&self, amps: f64) {
        self.state().current = amps;
    }

    /// Queue answers for upcoming current reads, oldest first.
    pub fn push_readings<I>(&self, readings: I)
    where
        I: IntoIterator<Item = CurrentReading>,
    {
        self.state().readings.extend(readings);
    }

    pub fn push_current(&self, amps: f64) {
        self.push_readings([CurrentReading::Value(amps)]);
    }

    /// Attach a resistive load; unscripted current reads then follow Ohm's
    /// law while the output is on, capped by the current limit when one is set.
    pub fn set_load(&self, ohms: f64) {
        self.state().load_ohms = (ohms > 0.0).then_some(ohms);
    }

    pub fn set_voltage(&self, volts: f64) {
        self.state().voltage = volts;
    }

    pub fn set_powered(&self, powered: bool) {
        self.state().powered = powered;
    }

    pub fn is_powered(&self) -> bool {
        self.state().powered
    }

    pub fn voltage(&self) -> f64 {
        self.state().voltage
    }

    pub fn current_limit(&self) -> f64 {
        self.state().current_limit
    }

    pub fn max_current(&self) -> f64 {
        self.state().max_current
    }

    /// Every command line received so far, without terminators.
    pub fn received(&self) -> Vec<String> {
        self.state().received.clone()
    }

    /// Number of times a command arrived while an earlier reply was unread.
    pub fn overlapping_exchanges(&self) -> usize {
        self.state().overlaps
    }

    /// Port names the supply was opened under.
    pub fn opened_ports(&self) -> Vec<String> {
        self.state().opened.clone()
    }

    /// Make every further byte transfer fail as if the cable was pulled.
    pub fn unplug(&self) {
        self.state().unplugged = true;
    }

    pub fn plug_in(&self) {
        self.state().unplugged = false;
    }

    pub fn refuse_open(&self, refuse: bool) {
        self.state().refuse_open = refuse;
    }
}

impl SimState {
    fn present_current(&self) -> f64 {
        match self.load_ohms {
            Some(ohms) if self.powered => {
                let amps = self.voltage / ohms;
                if self.max_current > 0.0 {
                    amps.min(self.max_current)
                } else {
                    amps
                }
            }
            Some(_) => 0.0,
            None => self.current,
        }
    }

    fn handle_line(&mut self, line: &str) {
        self.received.push(line.to_string());
        if self.awaiting_read {
            self.overlaps += 1;
            self.outbound.clear();
        }

        let (mnemonic, param) = split_command(line);
        let reply = match PsuCommand::from_mnemonic(mnemonic) {
            Some(PsuCommand::WriteVoltage) => {
                self.voltage = parse_param(param, self.voltage);
                None
            }
            Some(PsuCommand::WriteCurrent) => {
                self.current_limit = parse_param(param, self.current_limit);
                None
            }
            Some(PsuCommand::WriteMaxCurrent) => {
                self.max_current = parse_param(param, self.max_current);
                None
            }
            Some(PsuCommand::PowerOn) => {
                self.powered = true;
                None
            }
            Some(PsuCommand::PowerOff) => {
                self.powered = false;
                None
            }
            Some(PsuCommand::ReadVoltage) => Some(format!("{}", self.voltage)),
            Some(PsuCommand::ReadMaxCurrent) => Some(format!("{}", self.max_current)),
            Some(PsuCommand::QueryPower) => Some(if self.powered { "1" } else { "0" }.to_string()),
            Some(PsuCommand::ReadCurrent) => match self.readings.pop_front() {
                Some(CurrentReading::Value(amps)) => {
                    self.current = amps;
                    Some(format!("{}", amps))
                }
                Some(CurrentReading::Garbled) => Some("ERR".to_string()),
                Some(CurrentReading::Silent) => None,
                None => Some(format!("{}", self.present_current())),
            },
            None => {
                log::debug!("Simulated supply ignoring unknown command {:?}", line);
                None
            }
        };

        if let Some(reply) = reply {
            self.outbound.extend(reply.as_bytes());
            self.outbound.push_back(b'\n');
            self.awaiting_read = true;
        }
    }
}

/// Split "VOLT 12.5" into ("VOLT", Some("12.5")); two-word mnemonics such as
/// "OUTP ON" stay whole.
fn split_command(line: &str) -> (&str, Option<&str>) {
    if PsuCommand::from_mnemonic(line).is_some() {
        return (line, None);
    }
    match line.split_once(' ') {
        Some((mnemonic, param)) => (mnemonic, Some(param.trim())),
        None => (line, None),
    }
}

fn parse_param(param: Option<&str>, fallback: f64) -> f64 {
    param.and_then(|p| parse_number(p).ok()).unwrap_or(fallback)
}

fn unplugged_error() -> SerialError {
    SerialError::IoError(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "simulated supply unplugged"))
}

impl SerialLink for SimulatedSupply {
    fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.state();
        if state.unplugged {
            return Err(unplugged_error());
        }

        state.inbound.extend_from_slice(data);
        while let Some(pos) = state.inbound.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = state.inbound.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                state.handle_line(&line);
            }
        }
        Ok(())
    }

    fn pending_bytes(&mut self) -> Result<u32> {
        let state = self.state();
        if state.unplugged {
            return Err(unplugged_error());
        }
        Ok(state.outbound.len() as u32)
    }

    fn recv_bytes(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut state = self.state();
        if state.unplugged {
            return Err(unplugged_error());
        }

        let n = buffer.len().min(state.outbound.len());
        for (slot, byte) in buffer.iter_mut().zip(state.outbound.drain(..n)) {
            *slot = byte;
        }
        if state.outbound.is_empty() {
            state.awaiting_read = false;
        }
        Ok(n)
    }

    fn discard_input(&mut self) -> Result<()> {
        let mut state = self.state();
        if state.unplugged {
            return Err(unplugged_error());
        }
        if state.awaiting_read {
            state.overlaps += 1;
            state.outbound.clear();
            state.awaiting_read = false;
        }
        Ok(())
    }
}

impl PortOpener for SimulatedSupply {
    fn open(&self, port_name: &str, _settings: &SerialSettings) -> Result<Box<dyn SerialLink>> {
        let mut state = self.state();
        if state.unplugged || state.refuse_open {
            return Err(SerialError::PortNotFound(port_name.to_string()));
        }
        state.opened.push(port_name.to_string());
        state.outbound.clear();
        state.awaiting_read = false;
        drop(state);
        Ok(Box::new(self.clone()))
    }
}
