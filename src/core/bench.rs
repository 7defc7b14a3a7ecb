//! Bench controller
//!
//! [`Bench`] is the single entry point for everything a front end can ask of
//! the test bench. It owns:
//! - the optional [`Session`] (present only while a validated bench is attached)
//! - the [`SampleBuffer`] of the current dataset
//! - the status text shown next to the connect control
//!
//! Failures are returned to the caller and mirrored into the status text;
//! none of them leaves the controller in an unusable state.

use super::buffer::{SampleBuffer, SampleSnapshot};
use super::discovery::{Discovered, DeviceIdentity, DiscoveryConfig, DiscoveryError, DiscoveryTask};
use super::export::{ExportError, Exporter};
use super::pipeline::{self, PipelineConfig, StepOutcome};
use super::session::{Command, RunState, Session, SessionError, SessionState};
use super::telemetry::Sample;
use super::transport::{TransportError, TransportFactory};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Status text before the first connection attempt
pub const STATUS_DISCONNECTED: &str = "DISCONNECTED";
/// Status text while discovery runs
pub const STATUS_SEARCHING: &str = "SEARCHING";
/// Status text after the device vanished mid-session
pub const STATUS_CONNECTION_LOST: &str = "CONNECTION LOST";

/// Any failure surfaced by the controller
#[derive(Error, Debug)]
pub enum BenchError {
    /// Discovery failed
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Command rejected or device I/O failed
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Export failed
    #[error(transparent)]
    Export(#[from] ExportError),
}

impl BenchError {
    pub(crate) fn rejected(command: &'static str, state: SessionState) -> Self {
        Self::Session(SessionError::InvalidCommandForState { command, state })
    }

    /// True when the command was refused before any device I/O
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Session(SessionError::InvalidCommandForState { .. }))
    }
}

/// Everything a front end can ask for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BenchCommand {
    /// Run discovery and attach the bench
    Connect,
    /// Start a test
    Start,
    /// Stop the running test
    Stop,
    /// Return the crosshead to its start position
    Reverse,
    /// Zero the load cell
    Tare,
    /// Flip the travel direction
    SwitchDirection,
    /// Drop the current dataset
    Clear,
    /// Export the current dataset under a name
    Save(String),
    /// Stop the bench and release the port
    Disconnect,
    /// Tear down and end the driving loop
    Shutdown,
}

impl BenchCommand {
    /// Command name without arguments
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Reverse => "reverse",
            Self::Tare => "tare",
            Self::SwitchDirection => "switch-direction",
            Self::Clear => "clear",
            Self::Save(_) => "save",
            Self::Disconnect => "disconnect",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for BenchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Save(name) => write!(f, "save {name}"),
            other => f.write_str(other.name()),
        }
    }
}

/// What a successful command produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Command applied
    Done,
    /// Dataset written to this path
    Saved(PathBuf),
}

/// Which commands are currently available
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controls {
    /// Connect
    pub connect: bool,
    /// Start
    pub start: bool,
    /// Stop
    pub stop: bool,
    /// Reverse / return
    pub reverse: bool,
    /// Tare
    pub tare: bool,
    /// Switch direction
    pub switch_direction: bool,
    /// Clear dataset
    pub clear: bool,
    /// Save dataset
    pub save: bool,
    /// Disconnect
    pub disconnect: bool,
}

impl Controls {
    /// Check whether a command is currently available
    pub fn allows(&self, command: &BenchCommand) -> bool {
        match command {
            BenchCommand::Connect => self.connect,
            BenchCommand::Start => self.start,
            BenchCommand::Stop => self.stop,
            BenchCommand::Reverse => self.reverse,
            BenchCommand::Tare => self.tare,
            BenchCommand::SwitchDirection => self.switch_direction,
            BenchCommand::Clear => self.clear,
            BenchCommand::Save(_) => self.save,
            BenchCommand::Disconnect => self.disconnect,
            BenchCommand::Shutdown => true,
        }
    }
}

/// Consumer-facing picture of the bench, published once per tick
///
/// While a test is running the view carries no dataset snapshot: a held
/// snapshot would make every following append copy the whole buffer.
#[derive(Debug, Clone, Serialize)]
pub struct BenchView {
    /// Connection / run state
    pub state: SessionState,
    /// Last status text
    pub status: String,
    /// Available commands
    pub controls: Controls,
    /// Attached device
    pub identity: Option<DeviceIdentity>,
    /// Samples in the dataset
    pub sample_count: usize,
    /// Most recent sample
    pub last_sample: Option<Sample>,
    /// Sample with the largest force so far
    pub peak_sample: Option<Sample>,
    /// Lines without a sample since the last valid one
    pub unparsed_streak: u32,
    /// Dataset at publish time; `None` while a test is running
    #[serde(skip)]
    pub samples: Option<SampleSnapshot>,
}

impl Default for BenchView {
    fn default() -> Self {
        Self {
            state: SessionState::Disconnected,
            status: STATUS_DISCONNECTED.to_string(),
            controls: Controls {
                connect: true,
                ..Controls::default()
            },
            identity: None,
            sample_count: 0,
            last_sample: None,
            peak_sample: None,
            unparsed_streak: 0,
            samples: Some(SampleSnapshot::default()),
        }
    }
}

/// Controller for one test bench
pub struct Bench {
    factory: Arc<dyn TransportFactory>,
    discovery: DiscoveryConfig,
    pipeline: PipelineConfig,
    exporter: Exporter,
    session: Option<Session>,
    buffer: SampleBuffer,
    status: String,
    connecting: bool,
}

impl Bench {
    /// Create a disconnected controller
    pub fn new(
        factory: Box<dyn TransportFactory>,
        discovery: DiscoveryConfig,
        pipeline: PipelineConfig,
        exporter: Exporter,
    ) -> Self {
        Self {
            factory: Arc::from(factory),
            discovery,
            pipeline,
            exporter,
            session: None,
            buffer: SampleBuffer::new(),
            status: STATUS_DISCONNECTED.to_string(),
            connecting: false,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        if self.connecting {
            return SessionState::Connecting;
        }
        self.session
            .as_ref()
            .map_or(SessionState::Disconnected, Session::state)
    }

    /// Last status text
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Attached device, if any
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.session.as_ref().map(Session::identity)
    }

    /// Immutable view of the dataset
    pub fn sample_snapshot(&self) -> SampleSnapshot {
        self.buffer.snapshot()
    }

    /// Derive which commands are available right now
    pub fn controls(&self) -> Controls {
        let has_data = !self.buffer.is_empty();
        let run = self.session.as_ref().map(Session::run_state);
        let idle = matches!(run, Some(RunState::Idle { .. }));

        Controls {
            connect: self.state() == SessionState::Disconnected,
            start: idle,
            stop: run == Some(RunState::Running),
            reverse: run == Some(RunState::Idle { has_moved: true }),
            tare: idle,
            switch_direction: idle,
            clear: idle && has_data,
            save: has_data && run != Some(RunState::Running),
            disconnect: run.is_some(),
        }
    }

    /// Snapshot of everything a consumer displays
    pub fn view(&self) -> BenchView {
        let state = self.state();
        BenchView {
            state,
            status: self.status.clone(),
            controls: self.controls(),
            identity: self.identity().cloned(),
            sample_count: self.buffer.len(),
            last_sample: self.buffer.last(),
            peak_sample: self.buffer.peak(),
            unparsed_streak: self.session.as_ref().map_or(0, Session::unparsed_streak),
            samples: (state != SessionState::Running).then(|| self.buffer.snapshot()),
        }
    }

    /// Enter `Connecting` and hand back the search to run. The caller awaits
    /// [`DiscoveryTask::run`] and passes the result to [`Bench::finish_connect`].
    pub fn begin_connect(&mut self) -> Result<DiscoveryTask, BenchError> {
        let state = self.state();
        if state != SessionState::Disconnected {
            return Err(BenchError::rejected("connect", state));
        }
        self.connecting = true;
        self.status = STATUS_SEARCHING.to_string();
        Ok(DiscoveryTask::new(Arc::clone(&self.factory), self.discovery.clone()))
    }

    /// Attach the bench found by [`Bench::begin_connect`]'s search, or record why not
    pub fn finish_connect(&mut self, result: Result<Discovered, DiscoveryError>) -> Result<(), BenchError> {
        self.connecting = false;

        match result {
            Ok((transport, identity)) => {
                self.status = format!("CONNECTED ({})", identity.port);
                info!(
                    "Connected to {} on {} (protocol {})",
                    identity.name, identity.port, identity.protocol_version
                );
                self.session = Some(Session::new(transport, identity));
                Ok(())
            }
            Err(e) => {
                self.status = e.status();
                Err(e.into())
            }
        }
    }

    /// Discover and attach the bench
    pub async fn connect(&mut self) -> Result<(), BenchError> {
        let search = self.begin_connect()?;
        let result = search.run().await;
        self.finish_connect(result)
    }

    fn command(&mut self, command: Command) -> Result<(), BenchError> {
        let Some(session) = self.session.as_mut() else {
            return Err(BenchError::rejected(command.name(), self.state()));
        };

        match session.execute(command) {
            Ok(()) => {
                self.status = match command {
                    Command::Start => "RUNNING".to_string(),
                    Command::Stop => "STOPPED".to_string(),
                    Command::Reverse => "RETURNING".to_string(),
                    Command::Tare => "TARED".to_string(),
                    Command::SwitchDirection => "DIRECTION SWITCHED".to_string(),
                };
                Ok(())
            }
            Err(SessionError::Transport(e)) => {
                self.lose_session(&e);
                Err(SessionError::Transport(e).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Start a test
    pub fn start(&mut self) -> Result<(), BenchError> {
        self.command(Command::Start)
    }

    /// Stop the running test
    pub fn stop(&mut self) -> Result<(), BenchError> {
        self.command(Command::Stop)
    }

    /// Return to the start position
    pub fn reverse(&mut self) -> Result<(), BenchError> {
        self.command(Command::Reverse)
    }

    /// Zero the load cell
    pub fn tare(&mut self) -> Result<(), BenchError> {
        self.command(Command::Tare)
    }

    /// Flip the travel direction
    pub fn switch_direction(&mut self) -> Result<(), BenchError> {
        self.command(Command::SwitchDirection)
    }

    /// Drop the dataset; only while Idle
    pub fn clear(&mut self) -> Result<(), BenchError> {
        let state = self.state();
        if state != SessionState::Idle {
            return Err(BenchError::rejected("clear", state));
        }
        self.buffer.clear();
        Ok(())
    }

    /// Export the dataset as `name`; refused while Running
    pub fn save(&mut self, name: &str) -> Result<PathBuf, BenchError> {
        let state = self.state();
        if state == SessionState::Running {
            return Err(BenchError::rejected("save", state));
        }
        let path = self
            .exporter
            .export(name, &self.buffer.snapshot(), self.identity())?;
        self.status = format!("SAVED {}", path.display());
        Ok(path)
    }

    /// Stop the bench and release the port
    pub fn disconnect(&mut self) -> Result<(), BenchError> {
        let Some(session) = self.session.take() else {
            return Err(BenchError::rejected("disconnect", self.state()));
        };
        session.close();
        self.status = STATUS_DISCONNECTED.to_string();
        Ok(())
    }

    /// Release everything; safe to call in any state
    pub fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
            self.status = STATUS_DISCONNECTED.to_string();
        }
    }

    /// Apply one front-end command
    pub async fn apply(&mut self, command: BenchCommand) -> Result<CommandOutcome, BenchError> {
        match command {
            BenchCommand::Connect => self.connect().await?,
            BenchCommand::Start => self.start()?,
            BenchCommand::Stop => self.stop()?,
            BenchCommand::Reverse => self.reverse()?,
            BenchCommand::Tare => self.tare()?,
            BenchCommand::SwitchDirection => self.switch_direction()?,
            BenchCommand::Clear => self.clear()?,
            BenchCommand::Save(name) => return Ok(CommandOutcome::Saved(self.save(&name)?)),
            BenchCommand::Disconnect => self.disconnect()?,
            BenchCommand::Shutdown => self.shutdown(),
        }
        Ok(CommandOutcome::Done)
    }

    /// One pipeline step; a transport failure drops the session
    pub fn tick(&mut self) -> Option<StepOutcome> {
        let session = self.session.as_mut()?;
        match pipeline::step(session, &mut self.buffer, &self.pipeline) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                self.lose_session(&e);
                None
            }
        }
    }

    fn lose_session(&mut self, cause: &TransportError) {
        if let Some(session) = self.session.take() {
            error!("Lost {}: {}", session.identity().port, cause);
            session.close();
        }
        self.status = STATUS_CONNECTION_LOST.to_string();
    }
}

impl Drop for Bench {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Bench {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bench")
            .field("state", &self.state())
            .field("status", &self.status)
            .field("samples", &self.buffer.len())
            .finish_non_exhaustive()
    }
}
