//! Scripted in-memory transport
//!
//! Replays a fixed sequence of device lines and records every write, so
//! discovery, session and pipeline behavior can be checked without hardware.
//! The record lives behind a shared [`TransportLog`] handle that stays
//! readable after the transport itself has been moved into a session.

use super::{terminated, LineTransport, TransportError, TransportFactory};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// One scripted reaction to a `read_line` call
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Deliver this line
    Line(Vec<u8>),
    /// Report a read timeout
    Timeout,
    /// Report the device as gone
    Disconnect,
}

/// What happened on a scripted transport, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A line was written (terminator included)
    Write(Vec<u8>),
    /// The transport was closed
    Close,
}

#[derive(Debug, Default)]
struct LogState {
    events: Vec<TransportEvent>,
    reads: usize,
}

/// Shared view of a scripted transport's activity
#[derive(Debug, Clone, Default)]
pub struct TransportLog {
    state: Arc<Mutex<LogState>>,
}

impl TransportLog {
    /// All events so far
    pub fn events(&self) -> Vec<TransportEvent> {
        self.state.lock().events.clone()
    }

    /// Written lines without their terminator
    pub fn writes(&self) -> Vec<String> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Write(bytes) => {
                    Some(String::from_utf8_lossy(bytes).trim_end().to_string())
                }
                TransportEvent::Close => None,
            })
            .collect()
    }

    /// Last written line, if any
    pub fn last_write(&self) -> Option<String> {
        self.writes().pop()
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.state.lock().events.contains(&TransportEvent::Close)
    }

    /// Number of `read_line` calls served
    pub fn reads(&self) -> usize {
        self.state.lock().reads
    }
}

/// Transport replaying a fixed script
#[derive(Debug)]
pub struct ScriptedTransport {
    port_name: String,
    script: VecDeque<ScriptStep>,
    log: TransportLog,
    open: bool,
    fail_writes: bool,
    blocking_timeouts: bool,
}

impl ScriptedTransport {
    /// Create a transport that will deliver `lines` in order, then time out
    pub fn new<I, L>(port_name: &str, lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        Self {
            port_name: port_name.to_string(),
            script: lines
                .into_iter()
                .map(|l| ScriptStep::Line(l.as_ref().to_vec()))
                .collect(),
            log: TransportLog::default(),
            open: true,
            fail_writes: false,
            blocking_timeouts: false,
        }
    }

    /// Append an arbitrary step to the script
    #[must_use]
    pub fn then(mut self, step: ScriptStep) -> Self {
        self.script.push_back(step);
        self
    }

    /// Make every write fail as if the device was unplugged
    #[must_use]
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Make a timed-out read take its full timeout, like a silent port
    #[must_use]
    pub fn blocking_timeouts(mut self) -> Self {
        self.blocking_timeouts = true;
        self
    }

    /// Handle to the activity record
    pub fn log(&self) -> TransportLog {
        self.log.clone()
    }
}

impl LineTransport for ScriptedTransport {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        self.log.state.lock().reads += 1;
        match self.script.pop_front() {
            Some(ScriptStep::Line(line)) => Ok(line),
            Some(ScriptStep::Disconnect) => Err(TransportError::Disconnected),
            Some(ScriptStep::Timeout) | None => {
                if self.blocking_timeouts {
                    std::thread::sleep(timeout);
                }
                Err(TransportError::Timeout(timeout))
            }
        }
    }

    fn write_line(&mut self, line: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        if self.fail_writes {
            return Err(TransportError::Disconnected);
        }
        self.log
            .state
            .lock()
            .events
            .push(TransportEvent::Write(terminated(line)));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.log.state.lock().events.push(TransportEvent::Close);
        }
    }
}

/// Factory handing out pre-built scripted transports by port name
#[derive(Default)]
pub struct ScriptedFactory {
    order: Vec<String>,
    ports: Mutex<HashMap<String, Option<ScriptedTransport>>>,
    opened: Arc<Mutex<Vec<String>>>,
}

impl ScriptedFactory {
    /// Create an empty factory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a candidate backed by `transport`
    #[must_use]
    pub fn with_port(mut self, transport: ScriptedTransport) -> Self {
        let name = transport.port_name.clone();
        self.order.push(name.clone());
        self.ports.get_mut().insert(name, Some(transport));
        self
    }

    /// Register a candidate that refuses to open
    #[must_use]
    pub fn with_busy_port(mut self, name: &str) -> Self {
        self.order.push(name.to_string());
        self.ports.get_mut().insert(name.to_string(), None);
        self
    }

    /// Shared list of ports `open` was called for, in call order
    pub fn opened(&self) -> Arc<Mutex<Vec<String>>> {
        self.opened.clone()
    }
}

impl TransportFactory for ScriptedFactory {
    fn candidates(&self) -> Result<Vec<String>, TransportError> {
        Ok(self.order.clone())
    }

    fn open(&self, port: &str) -> Result<Box<dyn LineTransport>, TransportError> {
        self.opened.lock().push(port.to_string());
        let mut ports = self.ports.lock();
        match ports.get_mut(port) {
            // a scripted transport can be opened once; afterwards it is busy
            Some(slot) => match slot.take() {
                Some(transport) => Ok(Box::new(transport)),
                None => Err(TransportError::PortInUse(port.to_string())),
            },
            None => Err(TransportError::PortNotFound(port.to_string())),
        }
    }
}
