use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use super::{PortOpener, Result, SerialError, SerialLink, SerialSettings, SystemPortOpener, MIN_PORT_NAME_LEN};

/// Interval between checks for incoming bytes while waiting on a response line.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(5);
const READ_CHUNK: usize = 64;

/// The open connection to the supply's serial line.
///
/// The link is `Some` exactly while the session is open, and the port name is
/// empty whenever it is closed.
pub struct SerialSession {
    opener: Arc<dyn PortOpener>,
    settings: SerialSettings,
    link: Option<Box<dyn SerialLink>>,
    port_name: String,
    partial: Vec<u8>,
}

impl SerialSession {
    pub fn new() -> Self {
        Self::with_opener(Arc::new(SystemPortOpener))
    }

    pub fn with_opener(opener: Arc<dyn PortOpener>) -> Self {
        Self::with_settings(opener, SerialSettings::default())
    }

    pub fn with_settings(opener: Arc<dyn PortOpener>, settings: SerialSettings) -> Self {
        Self {
            opener,
            settings,
            link: None,
            port_name: String::new(),
            partial: Vec::new(),
        }
    }

    /// Open and configure `port_name`.
    ///
    /// Whatever was open before is released first; on failure the session is
    /// left closed.
    pub fn open(&mut self, port_name: &str) -> Result<()> {
        self.close();

        if port_name.chars().count() < MIN_PORT_NAME_LEN {
            log::warn!("Refusing to open invalid port {:?}", port_name);
            return Err(SerialError::InvalidPort(port_name.to_string()));
        }

        log::info!("Opening {} at {} baud", port_name, self.settings.baud_rate);
        let link = self.opener.open(port_name, &self.settings).map_err(|e| {
            log::error!("Failed to open {}: {}", port_name, e);
            e
        })?;

        self.link = Some(link);
        self.port_name = port_name.to_string();
        log::info!("Opened {}", port_name);
        Ok(())
    }

    /// Release the link. Safe to call on a closed session.
    pub fn close(&mut self) {
        if self.link.take().is_some() {
            log::info!("Closing {}", self.port_name);
        }
        self.port_name.clear();
        self.partial.clear();
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// Active port identifier, empty when closed.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Send one line, appending the terminator.
    ///
    /// Bytes still waiting from an earlier exchange are discarded first so a
    /// late reply cannot be taken as the answer to this line.
    pub fn write_line(&mut self, text: &str) -> Result<()> {
        let terminator = self.settings.terminator;
        let link = self.link.as_mut().ok_or(SerialError::NotOpen)?;

        let mut data = Vec::with_capacity(text.len() + 1);
        data.extend_from_slice(text.as_bytes());
        data.push(terminator);

        self.partial.clear();
        let result = link.discard_input().and_then(|_| link.send_bytes(&data));
        self.check_link(result)
    }

    /// Read one terminated line, without the terminator and surrounding
    /// whitespace. Gives up after the configured timeout.
    pub async fn read_line(&mut self) -> Result<String> {
        let terminator = self.settings.terminator;
        let timeout_ms = self.settings.timeout_ms;
        let link = self.link.as_mut().ok_or(SerialError::NotOpen)?;
        let partial = &mut self.partial;

        let result = timeout(Duration::from_millis(timeout_ms), read_until(link.as_mut(), partial, terminator))
            .await
            .unwrap_or(Err(SerialError::Timeout));
        self.check_link(result)
    }

    /// Release the session when an error means the device went away.
    fn check_link<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            if e.is_link_lost() {
                log::warn!("Lost connection to {}: {}", self.port_name, e);
                self.close();
            }
        }
        result
    }
}

async fn read_until(link: &mut dyn SerialLink, partial: &mut Vec<u8>, terminator: u8) -> Result<String> {
    loop {
        if let Some(pos) = partial.iter().position(|&b| b == terminator) {
            let line: Vec<u8> = partial.drain(..=pos).collect();
            return Ok(String::from_utf8_lossy(&line).trim().to_string());
        }

        match link.pending_bytes()? {
            0 => tokio::time::sleep(READ_POLL_INTERVAL).await,
            _ => {
                let mut buffer = [0u8; READ_CHUNK];
                match link.recv_bytes(&mut buffer) {
                    Ok(n) => partial.extend_from_slice(&buffer[..n]),
                    Err(SerialError::IoError(ref e)) if e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => return Err(e),
                }
            }
        }
    }
}

impl Default for SerialSession {
    fn default() -> Self {
        Self::new()
    }
}
