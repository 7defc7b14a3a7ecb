//! Session protocol with the connected bench
//!
//! A [`Session`] exists only while a validated bench is attached. It owns
//! the transport and the run state, and it is the only thing that writes
//! commands to the device. The protocol is strictly command-then-drain: no
//! command other than `stop` is accepted while a test is running.
//!
//! Dropping a session always sends `stop` before the transport is released,
//! so the crosshead never keeps moving after the host lets go of the port.

use super::discovery::DeviceIdentity;
use super::transport::{LineTransport, TransportError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Connection state as seen by consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// No bench attached
    Disconnected,
    /// Discovery in progress
    Connecting,
    /// Attached, no test running
    Idle,
    /// Attached, test running
    Running,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
        }
    }
}

/// Device commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Start the test (crosshead moves, telemetry flows)
    Start,
    /// Stop the test
    Stop,
    /// Drive back to the start position
    Reverse,
    /// Zero the load cell
    Tare,
    /// Flip the travel direction
    SwitchDirection,
}

impl Command {
    /// Line sent to the firmware
    pub fn wire(&self) -> &'static [u8] {
        match self {
            Self::Start => b"go",
            Self::Stop => b"stop",
            Self::Reverse => b"reverse",
            Self::Tare => b"tare",
            Self::SwitchDirection => b"switchDir",
        }
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Reverse => "reverse",
            Self::Tare => "tare",
            Self::SwitchDirection => "switch-direction",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Run state of an attached bench
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Waiting for a command; `has_moved` is set by a start and cleared by a reverse
    Idle {
        /// Crosshead left its start position since the last reverse
        has_moved: bool,
    },
    /// Test running
    Running,
}

impl RunState {
    /// Transition table. `None` means the command is not allowed here.
    pub fn apply(self, command: Command) -> Option<RunState> {
        match (self, command) {
            (Self::Idle { .. }, Command::Start) => Some(Self::Running),
            (Self::Running, Command::Stop) => Some(Self::Idle { has_moved: true }),
            (Self::Idle { has_moved: true }, Command::Reverse) => Some(Self::Idle { has_moved: false }),
            (Self::Idle { has_moved }, Command::Tare | Command::SwitchDirection) => {
                Some(Self::Idle { has_moved })
            }
            _ => None,
        }
    }

    /// Consumer-facing state
    pub fn state(&self) -> SessionState {
        match self {
            Self::Idle { .. } => SessionState::Idle,
            Self::Running => SessionState::Running,
        }
    }
}

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Command not valid in the current state; nothing was sent
    #[error("{command} is not allowed while {state}")]
    InvalidCommandForState {
        /// Rejected command
        command: &'static str,
        /// State at the time
        state: SessionState,
    },

    /// Device I/O failed
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// Active session with an identified bench
pub struct Session {
    transport: Box<dyn LineTransport>,
    identity: DeviceIdentity,
    run: RunState,
    unparsed_streak: u32,
    released: bool,
}

impl Session {
    /// Take ownership of a transport that completed the handshake
    pub fn new(transport: Box<dyn LineTransport>, identity: DeviceIdentity) -> Self {
        Self {
            transport,
            identity,
            run: RunState::Idle { has_moved: false },
            unparsed_streak: 0,
            released: false,
        }
    }

    /// Device identity from the handshake
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Current run state
    pub fn run_state(&self) -> RunState {
        self.run
    }

    /// Consumer-facing state
    pub fn state(&self) -> SessionState {
        self.run.state()
    }

    /// Check if a test is running
    pub fn is_running(&self) -> bool {
        self.run == RunState::Running
    }

    /// Whether a reverse is currently meaningful
    pub fn has_moved(&self) -> bool {
        matches!(self.run, RunState::Idle { has_moved: true } | RunState::Running)
    }

    /// Lines since the last valid sample that did not parse
    pub fn unparsed_streak(&self) -> u32 {
        self.unparsed_streak
    }

    /// Validate, send and apply a command
    pub fn execute(&mut self, command: Command) -> Result<(), SessionError> {
        let next = self.run.apply(command).ok_or(SessionError::InvalidCommandForState {
            command: command.name(),
            state: self.state(),
        })?;

        self.transport.write_line(command.wire())?;
        info!("{} -> {}", command, self.identity.port);
        self.run = next;
        if next == RunState::Running {
            self.unparsed_streak = 0;
        }
        Ok(())
    }

    /// Start a test
    pub fn start(&mut self) -> Result<(), SessionError> {
        self.execute(Command::Start)
    }

    /// Stop the running test
    pub fn stop(&mut self) -> Result<(), SessionError> {
        self.execute(Command::Stop)
    }

    /// Return to the start position
    pub fn reverse(&mut self) -> Result<(), SessionError> {
        self.execute(Command::Reverse)
    }

    /// Zero the load cell
    pub fn tare(&mut self) -> Result<(), SessionError> {
        self.execute(Command::Tare)
    }

    /// Flip the travel direction
    pub fn switch_direction(&mut self) -> Result<(), SessionError> {
        self.execute(Command::SwitchDirection)
    }

    /// Read one telemetry line
    pub fn read_line(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.transport.read_line(timeout)
    }

    pub(crate) fn note_sample(&mut self) {
        self.unparsed_streak = 0;
    }

    pub(crate) fn note_unparsed(&mut self) -> u32 {
        self.unparsed_streak = self.unparsed_streak.saturating_add(1);
        self.unparsed_streak
    }

    /// Stop the bench and release the transport
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if self.transport.is_open() {
            if let Err(e) = self.transport.write_line(Command::Stop.wire()) {
                warn!("Could not send stop to {} during teardown: {}", self.identity.port, e);
            }
            self.transport.close();
        }
        self.run = RunState::Idle { has_moved: false };
        info!("Released {}", self.identity.port);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("run", &self.run)
            .field("unparsed_streak", &self.unparsed_streak)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::{ScriptedTransport, TransportEvent, TransportLog};

    fn session() -> (Session, TransportLog) {
        let transport = ScriptedTransport::new("mock0", Vec::<&[u8]>::new());
        let log = transport.log();
        let identity = DeviceIdentity {
            name: "EulerBucklingTestBench".into(),
            protocol_version: 1,
            port: "mock0".into(),
        };
        (Session::new(Box::new(transport), identity), log)
    }

    #[test]
    fn test_transition_table() {
        let idle = RunState::Idle { has_moved: false };
        assert_eq!(idle.apply(Command::Start), Some(RunState::Running));
        assert_eq!(idle.apply(Command::Stop), None);
        assert_eq!(idle.apply(Command::Reverse), None);
        assert_eq!(idle.apply(Command::Tare), Some(idle));
        assert_eq!(RunState::Running.apply(Command::Start), None);
        assert_eq!(RunState::Running.apply(Command::Tare), None);
        assert_eq!(RunState::Running.apply(Command::SwitchDirection), None);
        assert_eq!(
            RunState::Idle { has_moved: true }.apply(Command::Reverse),
            Some(RunState::Idle { has_moved: false })
        );
    }

    #[test]
    fn test_start_stop_reverse_wire() {
        let (mut s, log) = session();
        s.start().unwrap();
        assert_eq!(s.state(), SessionState::Running);
        s.stop().unwrap();
        s.reverse().unwrap();
        s.tare().unwrap();
        s.switch_direction().unwrap();
        assert_eq!(log.writes(), vec!["go", "stop", "reverse", "tare", "switchDir"]);
    }

    #[test]
    fn test_start_rejected_while_running() {
        let (mut s, log) = session();
        s.start().unwrap();
        let err = s.start().unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidCommandForState { command: "start", state: SessionState::Running }
        ));
        assert_eq!(log.writes(), vec!["go"]);
    }

    #[test]
    fn test_reverse_requires_move() {
        let (mut s, log) = session();
        assert!(s.reverse().is_err());
        assert!(log.writes().is_empty());

        s.start().unwrap();
        s.stop().unwrap();
        s.reverse().unwrap();
        assert!(!s.has_moved());
        assert!(s.reverse().is_err());
    }

    #[test]
    fn test_close_while_running_sends_stop_last() {
        let (mut s, log) = session();
        s.start().unwrap();
        s.close();
        assert_eq!(log.last_write().as_deref(), Some("stop"));
        assert_eq!(
            log.events().last(),
            Some(&TransportEvent::Close),
            "stop must precede release"
        );
    }

    #[test]
    fn test_drop_releases_even_if_write_fails() {
        let transport = ScriptedTransport::new("mock0", Vec::<&[u8]>::new()).failing_writes();
        let log = transport.log();
        let identity = DeviceIdentity {
            name: "EulerBucklingTestBench".into(),
            protocol_version: 1,
            port: "mock0".into(),
        };
        drop(Session::new(Box::new(transport), identity));
        assert!(log.is_closed());
    }
}
