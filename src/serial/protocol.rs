use std::fmt;

use super::{Result, SerialError, SerialSession};

/// Commands understood by the supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PsuCommand {
    WriteVoltage,
    WriteCurrent,
    WriteMaxCurrent,
    ReadVoltage,
    ReadCurrent,
    ReadMaxCurrent,
    QueryPower,
    PowerOn,
    PowerOff,
}

impl PsuCommand {
    pub const ALL: [PsuCommand; 9] = [
        PsuCommand::WriteVoltage,
        PsuCommand::WriteCurrent,
        PsuCommand::WriteMaxCurrent,
        PsuCommand::ReadVoltage,
        PsuCommand::ReadCurrent,
        PsuCommand::ReadMaxCurrent,
        PsuCommand::QueryPower,
        PsuCommand::PowerOn,
        PsuCommand::PowerOff,
    ];

    /// Keyword sent on the wire.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            PsuCommand::WriteVoltage => "VOLT",
            PsuCommand::WriteCurrent => "CURR",
            PsuCommand::WriteMaxCurrent => "IMAX",
            PsuCommand::ReadVoltage => "MEAS:VOLT?",
            PsuCommand::ReadCurrent => "MEAS:CURR?",
            PsuCommand::ReadMaxCurrent => "IMAX?",
            PsuCommand::QueryPower => "OUTP?",
            PsuCommand::PowerOn => "OUTP ON",
            PsuCommand::PowerOff => "OUTP OFF",
        }
    }

    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.mnemonic() == mnemonic)
    }
}

impl fmt::Display for PsuCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Build the text of a command line, without the terminator.
pub fn format_command(command: PsuCommand, param: Option<&str>) -> String {
    match param {
        Some(value) if !value.is_empty() => format!("{} {}", command.mnemonic(), value),
        _ => command.mnemonic().to_string(),
    }
}

/// Format a numeric setpoint as a command parameter.
///
/// `Display` for `f64` is the shortest text that reads back as the same value.
pub fn format_number(value: f64) -> String {
    format!("{}", value)
}

/// Parse a decimal reading the way `atof` does: the longest leading number
/// counts and trailing text such as a unit is ignored.
///
/// A response without a leading number is a protocol error rather than 0.0.
pub fn parse_number(response: &str) -> Result<f64> {
    let text = response.trim();
    let bytes = text.as_bytes();
    let mut end = 0;
    let mut digits = 0;

    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end += 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
        digits += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return Err(SerialError::ProtocolError(format!("Not a number: {:?}", response)));
    }

    // Exponent only counts when it carries digits, "1.5E" reads as 1.5.
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+') | Some(b'-')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    text[..end]
        .parse::<f64>()
        .map_err(|e| SerialError::ProtocolError(format!("Not a number: {:?} ({})", response, e)))
}

/// Parse the answer to `OUTP?`: a leading '1' is on, a leading '0' is off.
pub fn parse_power_state(response: &str) -> Result<bool> {
    match response.trim_start().chars().next() {
        Some('1') => Ok(true),
        Some('0') => Ok(false),
        _ => Err(SerialError::ProtocolError(format!("Unknown power state: {:?}", response))),
    }
}

/// Line protocol spoken by the supply, on top of a serial session.
pub struct CommandProtocol {
    session: SerialSession,
}

impl CommandProtocol {
    pub fn new(session: SerialSession) -> Self {
        Self { session }
    }

    /// Send a command that has no answer.
    pub fn send(&mut self, command: PsuCommand, param: Option<&str>) -> Result<()> {
        let line = format_command(command, param);
        log::debug!("Sending command: {}", line);
        self.session.write_line(&line).map_err(|e| {
            log::warn!("Failed to send {}: {}", command, e);
            e
        })
    }

    /// Send a command and read the single line it produces.
    pub async fn send_and_read(&mut self, command: PsuCommand, param: Option<&str>) -> Result<String> {
        self.send(command, param)?;
        let response = self.session.read_line().await.map_err(|e| {
            log::warn!("No response to {}: {}", command, e);
            e
        })?;
        log::debug!("Response to {}: {}", command, response);
        Ok(response)
    }

    pub fn session(&self) -> &SerialSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SerialSession {
        &mut self.session
    }
}
