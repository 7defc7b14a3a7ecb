//! Serial port transport implementation

use super::{discard_overlong, take_line, terminated, LineTransport, TransportError, TransportFactory, MAX_LINE_LEN};
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use serialport::{SerialPort, SerialPortInfo};
use std::fmt;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Per-read timeout handed to the OS driver; `read_line` loops on it until
/// its own deadline so a silent device never blocks longer than asked.
const CHUNK_TIMEOUT: Duration = Duration::from_millis(10);

/// Serial port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Baud rate
    pub baud_rate: u32,
}

impl SerialConfig {
    /// Create a new serial configuration
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new(115_200)
    }
}

/// Serial port transport
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
    buffer: BytesMut,
}

impl SerialTransport {
    /// Open `port_name` at the configured baud rate
    pub fn open(port_name: &str, config: &SerialConfig) -> Result<Self, TransportError> {
        let port = serialport::new(port_name, config.baud_rate)
            .timeout(CHUNK_TIMEOUT)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => TransportError::PortNotFound(port_name.to_string()),
                serialport::ErrorKind::Io(io_kind) => match io_kind {
                    std::io::ErrorKind::PermissionDenied => {
                        TransportError::PermissionDenied(port_name.to_string())
                    }
                    std::io::ErrorKind::AddrInUse | std::io::ErrorKind::WouldBlock => {
                        TransportError::PortInUse(port_name.to_string())
                    }
                    _ => TransportError::OpenFailed {
                        port: port_name.to_string(),
                        reason: e.to_string(),
                    },
                },
                _ => TransportError::OpenFailed {
                    port: port_name.to_string(),
                    reason: e.to_string(),
                },
            })?;

        tracing::debug!("Opened {} at {} baud", port_name, config.baud_rate);

        Ok(Self {
            port_name: port_name.to_string(),
            baud_rate: config.baud_rate,
            port: Some(port),
            buffer: BytesMut::with_capacity(256),
        })
    }

}

impl fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port", &self.port_name)
            .field("baud_rate", &self.baud_rate)
            .field("open", &self.port.is_some())
            .field("pending", &self.buffer.len())
            .finish()
    }
}

impl LineTransport for SerialTransport {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if let Some(line) = take_line(&mut self.buffer) {
            return Ok(line);
        }

        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];

        loop {
            match port.read(&mut chunk) {
                Ok(0) => return Err(TransportError::Disconnected),
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    if let Some(line) = take_line(&mut self.buffer) {
                        return Ok(line);
                    }
                    let dropped = discard_overlong(&mut self.buffer, MAX_LINE_LEN);
                    if dropped > 0 {
                        tracing::warn!("{}: discarded {} bytes without a line terminator", self.port_name, dropped);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(TransportError::Io(e)),
            }

            if Instant::now() >= deadline {
                return Err(TransportError::Timeout(timeout));
            }
        }
    }

    fn write_line(&mut self, line: &[u8]) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;
        port.write_all(&terminated(line))?;
        port.flush()?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::debug!("Closed {}", self.port_name);
        }
        self.buffer.clear();
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens physical serial ports
#[derive(Debug, Clone, Default)]
pub struct SerialPortFactory {
    config: SerialConfig,
}

impl SerialPortFactory {
    /// Create a factory opening ports with `config`
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for SerialPortFactory {
    fn candidates(&self) -> Result<Vec<String>, TransportError> {
        Ok(list_ports()?.into_iter().map(|p| p.port_name).collect())
    }

    fn open(&self, port: &str) -> Result<Box<dyn LineTransport>, TransportError> {
        Ok(Box::new(SerialTransport::open(port, &self.config)?))
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::Enumeration(e.to_string()))
}
