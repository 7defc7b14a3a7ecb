//! CLI Exit Codes
//!
//! Exit codes for scripted bench runs. Every library failure maps to one code
//! so a calling script can tell "no bench plugged in" from "bench lost
//! mid-test" without parsing stderr.

use crate::config::ConfigError;
use crate::core::bench::BenchError;
use crate::core::discovery::DiscoveryError;
use crate::core::driver::DriverError;
use crate::core::session::SessionError;
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection lost during a run
    pub const CONNECTION_LOST: u8 = 3;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Bench speaks an unsupported protocol
    pub const PROTOCOL_ERROR: u8 = 9;

    /// Export failed
    pub const EXPORT_FAILED: u8 = 10;

    /// User cancelled
    pub const CANCELLED: u8 = 11;

    /// No bench found
    pub const DEVICE_NOT_FOUND: u8 = 12;

    /// Bench never reported ready
    pub const DEVICE_NOT_READY: u8 = 13;

    /// Ports could not be enumerated
    pub const PORT_ENUMERATION_FAILED: u8 = 14;

    /// Command not allowed in the current state
    pub const INVALID_STATE: u8 = 16;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

const TABLE: &[(u8, &str)] = &[
    (ExitCodes::SUCCESS, "Success"),
    (ExitCodes::ERROR, "General error"),
    (ExitCodes::INVALID_ARGS, "Invalid arguments"),
    (ExitCodes::CONNECTION_LOST, "Connection lost"),
    (ExitCodes::PERMISSION_DENIED, "Permission denied"),
    (ExitCodes::CONFIG_ERROR, "Configuration error"),
    (ExitCodes::PROTOCOL_ERROR, "Unsupported protocol version"),
    (ExitCodes::EXPORT_FAILED, "Export failed"),
    (ExitCodes::CANCELLED, "Operation cancelled"),
    (ExitCodes::DEVICE_NOT_FOUND, "Device not found"),
    (ExitCodes::DEVICE_NOT_READY, "Device not ready"),
    (ExitCodes::PORT_ENUMERATION_FAILED, "Port enumeration failed"),
    (ExitCodes::INVALID_STATE, "Command not allowed in current state"),
    (ExitCodes::INTERNAL_ERROR, "Internal error"),
];

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success with a message for stdout
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Error with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let code = match err.kind() {
            ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
            ErrorKind::Interrupted => ExitCodes::CANCELLED,
            _ => ExitCodes::ERROR,
        };

        Self::Error(code, err.to_string())
    }
}

impl From<&BenchError> for CliResult {
    fn from(err: &BenchError) -> Self {
        Self::Error(bench_error_code(err), err.to_string())
    }
}

impl From<anyhow::Error> for CliResult {
    fn from(err: anyhow::Error) -> Self {
        let code = err
            .chain()
            .find_map(|cause| {
                if let Some(e) = cause.downcast_ref::<BenchError>() {
                    Some(bench_error_code(e))
                } else if let Some(e) = cause.downcast_ref::<DriverError>() {
                    Some(match e {
                        DriverError::Command(e) => bench_error_code(e),
                        // only a shutdown request ends the loop early
                        DriverError::Stopped => ExitCodes::CANCELLED,
                    })
                } else if let Some(e) = cause.downcast_ref::<DiscoveryError>() {
                    Some(discovery_error_code(e))
                } else if let Some(e) = cause.downcast_ref::<TransportError>() {
                    Some(transport_error_code(e))
                } else if cause.is::<ConfigError>() {
                    Some(ExitCodes::CONFIG_ERROR)
                } else {
                    None
                }
            })
            .unwrap_or(ExitCodes::ERROR);
        Self::Error(code, format!("{err:#}"))
    }
}

fn bench_error_code(err: &BenchError) -> u8 {
    match err {
        BenchError::Discovery(e) => discovery_error_code(e),
        BenchError::Session(SessionError::InvalidCommandForState { .. }) => ExitCodes::INVALID_STATE,
        BenchError::Session(SessionError::Transport(_)) => ExitCodes::CONNECTION_LOST,
        BenchError::Export(_) => ExitCodes::EXPORT_FAILED,
    }
}

fn discovery_error_code(err: &DiscoveryError) -> u8 {
    match err {
        DiscoveryError::NoDeviceFound => ExitCodes::DEVICE_NOT_FOUND,
        DiscoveryError::UnsupportedProtocol(_) => ExitCodes::PROTOCOL_ERROR,
        DiscoveryError::DeviceNotReady => ExitCodes::DEVICE_NOT_READY,
        DiscoveryError::Enumeration(_) => ExitCodes::PORT_ENUMERATION_FAILED,
        DiscoveryError::Transport(_) => ExitCodes::CONNECTION_LOST,
        DiscoveryError::Cancelled => ExitCodes::CANCELLED,
    }
}

fn transport_error_code(err: &TransportError) -> u8 {
    match err {
        TransportError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
        TransportError::Enumeration(_) => ExitCodes::PORT_ENUMERATION_FAILED,
        TransportError::PortNotFound(_) => ExitCodes::DEVICE_NOT_FOUND,
        _ => ExitCodes::CONNECTION_LOST,
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map_or("Unknown error", |(_, text)| text)
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for (code, text) in TABLE {
        println!("  {:>3}  {}", code, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::export::ExportError;

    #[test]
    fn test_cli_result() {
        let success = CliResult::success();
        assert!(success.is_success());
        assert_eq!(success.code(), 0);

        let error = CliResult::error(3, "Connection lost");
        assert!(!error.is_success());
        assert_eq!(error.code(), 3);
        assert_eq!(error.message(), Some("Connection lost"));
    }

    #[test]
    fn test_discovery_codes() {
        let err = BenchError::from(DiscoveryError::UnsupportedProtocol(Some(2)));
        assert_eq!(CliResult::from(&err).code(), ExitCodes::PROTOCOL_ERROR);
        let err = BenchError::from(DiscoveryError::NoDeviceFound);
        assert_eq!(CliResult::from(&err).code(), ExitCodes::DEVICE_NOT_FOUND);
        let err = BenchError::from(DiscoveryError::Cancelled);
        assert_eq!(CliResult::from(&err).code(), ExitCodes::CANCELLED);
    }

    #[test]
    fn test_anyhow_chain_is_searched() {
        let err = anyhow::Error::new(BenchError::from(ExportError::Empty)).context("saving run");
        let result = CliResult::from(err);
        assert_eq!(result.code(), ExitCodes::EXPORT_FAILED);
        assert!(result.message().unwrap().starts_with("saving run"));

        let unrelated = CliResult::from(anyhow::anyhow!("boom"));
        assert_eq!(unrelated.code(), ExitCodes::ERROR);
    }

    #[test]
    fn test_descriptions_cover_table() {
        for (code, _) in TABLE {
            assert_ne!(exit_code_description(*code), "Unknown error");
        }
        assert_eq!(exit_code_description(200), "Unknown error");
    }
}
