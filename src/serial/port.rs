use std::io::{Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use super::{Result, SerialError, SerialSettings};

/// Byte-level access to an opened serial line.
///
/// Implemented for real ports and for the simulated supply, so everything above
/// the session runs unchanged against either.
pub trait SerialLink: Send {
    /// Write the whole buffer and flush it to the wire.
    fn send_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// Number of received bytes waiting to be read.
    fn pending_bytes(&mut self) -> Result<u32>;

    /// Read whatever is available into `buffer`.
    fn recv_bytes(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Drop any received bytes nobody asked for.
    fn discard_input(&mut self) -> Result<()>;
}

impl SerialLink for Box<dyn SerialPort> {
    fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.write_all(data)?;
        self.flush()?;
        Ok(())
    }

    fn pending_bytes(&mut self) -> Result<u32> {
        Ok(self.bytes_to_read()?)
    }

    fn recv_bytes(&mut self, buffer: &mut [u8]) -> Result<usize> {
        Ok(self.read(buffer)?)
    }

    fn discard_input(&mut self) -> Result<()> {
        Ok(self.clear(ClearBuffer::Input)?)
    }
}

/// Acquires and configures the transport for a port identifier.
pub trait PortOpener: Send + Sync {
    fn open(&self, port_name: &str, settings: &SerialSettings) -> Result<Box<dyn SerialLink>>;
}

/// Opens operating system serial ports through `serialport`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPortOpener;

impl PortOpener for SystemPortOpener {
    fn open(&self, port_name: &str, settings: &SerialSettings) -> Result<Box<dyn SerialLink>> {
        let port = serialport::new(port_name, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(settings.timeout_ms))
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => SerialError::PortNotFound(port_name.to_string()),
                _ => SerialError::ConnectionFailed(e.to_string()),
            })?;

        Ok(Box::new(port))
    }
}
