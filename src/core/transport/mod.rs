//! Transport layer for the bench link
//!
//! A transport is a line-framed duplex channel: the bench talks ASCII lines
//! terminated by CR and/or LF in both directions. Two pieces live here:
//! - [`LineTransport`] - one open channel (read a line, write a line, close)
//! - [`TransportFactory`] - enumerates candidate ports and opens them
//!
//! Implementations:
//! - [`SerialTransport`] over a physical serial port
//! - [`ScriptedTransport`] replaying fixed lines, for tests
//! - [`crate::core::simulator::SimulatedBench`] emulating the bench firmware

pub mod mock;
mod serial;

pub use mock::{ScriptStep, ScriptedFactory, ScriptedTransport, TransportEvent, TransportLog};
pub use serial::{list_ports, SerialConfig, SerialPortFactory, SerialTransport};

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Longest line kept while waiting for a terminator
pub const MAX_LINE_LEN: usize = 4096;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Port already in use
    #[error("Port already in use: {0}")]
    PortInUse(String),

    /// Opening the port failed for another reason
    #[error("Failed to open {port}: {reason}")]
    OpenFailed {
        /// Port identifier
        port: String,
        /// Underlying error text
        reason: String,
    },

    /// Enumerating ports failed
    #[error("Port enumeration failed: {0}")]
    Enumeration(String),

    /// No complete line arrived before the deadline
    #[error("Read timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Device went away
    #[error("Disconnected")]
    Disconnected,

    /// Operation on a closed transport
    #[error("Not connected")]
    NotConnected,
}

impl TransportError {
    /// Errors that only concern opening a single candidate
    pub fn is_open_failure(&self) -> bool {
        matches!(
            self,
            Self::PortNotFound(_) | Self::PermissionDenied(_) | Self::PortInUse(_) | Self::OpenFailed { .. }
        )
    }

    /// True for a read that simply saw no complete line in time
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// A single open, line-framed channel to a device
///
/// Owned by exactly one session; it is moved, never shared.
pub trait LineTransport: Send + fmt::Debug {
    /// Port identifier this transport is bound to
    fn port_name(&self) -> &str;

    /// Read one line, without its CR/LF terminator.
    ///
    /// Returns [`TransportError::Timeout`] when no complete line arrives
    /// within `timeout`. Partial data is kept for the next call.
    fn read_line(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Write one line; the `\n` terminator is appended when missing.
    fn write_line(&mut self, line: &[u8]) -> Result<(), TransportError>;

    /// Check if the channel is still open
    fn is_open(&self) -> bool;

    /// Release the underlying handle. Idempotent.
    fn close(&mut self);
}

/// Enumerates and opens candidate transports
#[cfg_attr(test, mockall::automock)]
pub trait TransportFactory: Send + Sync {
    /// Currently visible candidates, in platform enumeration order
    fn candidates(&self) -> Result<Vec<String>, TransportError>;

    /// Open one candidate
    fn open(&self, port: &str) -> Result<Box<dyn LineTransport>, TransportError>;
}

/// Split the first complete line off `buffer`.
///
/// A line ends at the first CR or LF; the terminator is consumed. Empty
/// lines (e.g. the LF of a CRLF pair) are skipped.
pub(crate) fn take_line(buffer: &mut bytes::BytesMut) -> Option<Vec<u8>> {
    loop {
        let end = buffer.iter().position(|b| *b == b'\n' || *b == b'\r')?;
        let line = buffer.split_to(end);
        let _ = buffer.split_to(1);
        if !line.is_empty() {
            return Some(line.to_vec());
        }
    }
}

/// Drop a pending partial line that has outgrown `max` bytes without a
/// terminator. Returns the number of bytes discarded.
pub(crate) fn discard_overlong(buffer: &mut bytes::BytesMut, max: usize) -> usize {
    if buffer.len() <= max || buffer.iter().any(|b| *b == b'\n' || *b == b'\r') {
        return 0;
    }
    let dropped = buffer.len();
    buffer.clear();
    dropped
}

/// Append the line terminator when the caller left it off
pub(crate) fn terminated(line: &[u8]) -> Vec<u8> {
    let mut out = line.to_vec();
    if !out.ends_with(b"\n") {
        out.push(b'\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_take_line_crlf() {
        let mut buf = BytesMut::from(&b"ready\r\nnext\n"[..]);
        assert_eq!(take_line(&mut buf), Some(b"ready".to_vec()));
        assert_eq!(take_line(&mut buf), Some(b"next".to_vec()));
        assert_eq!(take_line(&mut buf), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_take_line_cr_only_and_partial() {
        let mut buf = BytesMut::from(&b"a\rb\rpart"[..]);
        assert_eq!(take_line(&mut buf), Some(b"a".to_vec()));
        assert_eq!(take_line(&mut buf), Some(b"b".to_vec()));
        assert_eq!(take_line(&mut buf), None);
        assert_eq!(&buf[..], b"part");
    }

    #[test]
    fn test_overlong_partial_line_is_discarded() {
        let mut buf = BytesMut::from(&[b'x'; 10][..]);
        assert_eq!(discard_overlong(&mut buf, 16), 0);
        assert_eq!(buf.len(), 10);

        buf.extend_from_slice(&[b'x'; 10]);
        assert_eq!(discard_overlong(&mut buf, 16), 20);
        assert!(buf.is_empty());

        // a buffered terminator means a line is still to be taken
        let mut buf = BytesMut::from(&b"0123456789abcdef\nrest"[..]);
        assert_eq!(discard_overlong(&mut buf, 8), 0);
    }

    #[test]
    fn test_terminated() {
        assert_eq!(terminated(b"go"), b"go\n".to_vec());
        assert_eq!(terminated(b"stop\n"), b"stop\n".to_vec());
    }

    #[test]
    fn test_open_failure_classification() {
        assert!(TransportError::PortInUse("COM3".into()).is_open_failure());
        assert!(!TransportError::Disconnected.is_open_failure());
        assert!(TransportError::Timeout(Duration::from_millis(5)).is_timeout());
    }
}
