//! Device discovery and handshake
//!
//! Every visible port is a candidate. A candidate is the bench when, after a
//! settle delay (USB-serial bridges reset the board on open), its first line
//! is the device name. The next line carries the protocol version, then the
//! firmware prints status chatter until `ready`.
//!
//! The handshake tolerates chatter but not version mismatches: once the
//! identity is confirmed, an unsupported version ends discovery at once and
//! later candidates are not probed.
//!
//! Discovery blocks on port reads. [`DiscoveryTask`] runs it on the blocking
//! pool with a cancel flag that is checked between reads, so a cancelled
//! search ends within one read timeout.

use super::telemetry::describe_line;
use super::transport::{LineTransport, TransportError, TransportFactory};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Expected name line of the bench firmware
pub const DEVICE_NAME: &str = "EulerBucklingTestBench";

/// Protocol versions this host speaks
pub const SUPPORTED_PROTOCOLS: &[u32] = &[1];

const VERSION_PREFIX: &str = "protocol version:";
const READY_LINE: &[u8] = b"ready";
const SETTLE_SLICE: Duration = Duration::from_millis(50);

/// Identity reported by the device during the handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Device name line
    pub name: String,
    /// Negotiated protocol version
    pub protocol_version: u32,
    /// Port the device answered on
    pub port: String,
}

/// Discovery parameters
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Name line the device must print first
    pub device_name: String,
    /// Accepted protocol versions
    pub supported_protocols: Vec<u32>,
    /// Wait after opening before the first read
    pub settle_delay: Duration,
    /// Timeout for each handshake read
    pub read_timeout: Duration,
    /// Lines to wait for `ready` before giving up
    pub ready_attempts: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            device_name: DEVICE_NAME.to_string(),
            supported_protocols: SUPPORTED_PROTOCOLS.to_vec(),
            settle_delay: Duration::from_secs(1),
            read_timeout: Duration::from_secs(1),
            ready_attempts: 10,
        }
    }
}

/// Discovery failures; each one ends the attempt
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// No candidate identified itself as the bench
    #[error("no device found")]
    NoDeviceFound,

    /// Bench found, but it speaks a protocol version we do not
    #[error("unsupported protocol ({})", version_text(.0))]
    UnsupportedProtocol(Option<u32>),

    /// Bench never reported `ready`
    #[error("device not ready")]
    DeviceNotReady,

    /// Ports could not be enumerated
    #[error("port enumeration failed: {0}")]
    Enumeration(#[source] TransportError),

    /// I/O failed after the bench was identified
    #[error("handshake I/O failed: {0}")]
    Transport(#[source] TransportError),

    /// The search was called off
    #[error("discovery cancelled")]
    Cancelled,
}

impl DiscoveryError {
    /// Short status text for display next to the connect control
    pub fn status(&self) -> String {
        match self {
            Self::NoDeviceFound => "NO DEVICE FOUND".to_string(),
            Self::UnsupportedProtocol(v) => format!("UNSUPPORTED PROTOCOL ({})", version_text(v)),
            Self::DeviceNotReady => "DEVICE NOT READY".to_string(),
            Self::Enumeration(_) => "PORT ENUMERATION FAILED".to_string(),
            Self::Transport(_) => "HANDSHAKE FAILED".to_string(),
            Self::Cancelled => "SEARCH CANCELLED".to_string(),
        }
    }
}

fn version_text(version: &Option<u32>) -> String {
    version.map_or_else(|| "?".to_string(), |v| v.to_string())
}

/// Result of a successful search
pub type Discovered = (Box<dyn LineTransport>, DeviceIdentity);

/// A discovery run on the blocking pool. Clones share the cancel flag.
#[derive(Clone)]
pub struct DiscoveryTask {
    factory: Arc<dyn TransportFactory>,
    config: DiscoveryConfig,
    cancel: Arc<AtomicBool>,
}

impl DiscoveryTask {
    /// Prepare a search; nothing is opened until [`DiscoveryTask::run`]
    pub fn new(factory: Arc<dyn TransportFactory>, config: DiscoveryConfig) -> Self {
        Self {
            factory,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ask a running search to stop at its next read
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Run the search without holding up the async runtime
    pub async fn run(self) -> Result<Discovered, DiscoveryError> {
        let Self { factory, config, cancel } = self;
        tokio::task::spawn_blocking(move || discover_until(&*factory, &config, &cancel))
            .await
            .map_err(|e| DiscoveryError::Transport(TransportError::Io(std::io::Error::other(e))))?
    }
}

impl fmt::Debug for DiscoveryTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryTask")
            .field("device_name", &self.config.device_name)
            .field("cancelled", &self.cancel.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Probe every candidate and return the first validated bench. Blocks.
pub fn discover(factory: &dyn TransportFactory, config: &DiscoveryConfig) -> Result<Discovered, DiscoveryError> {
    discover_until(factory, config, &AtomicBool::new(false))
}

/// [`discover`], giving up with [`DiscoveryError::Cancelled`] once `cancel` is set
pub fn discover_until(
    factory: &dyn TransportFactory,
    config: &DiscoveryConfig,
    cancel: &AtomicBool,
) -> Result<Discovered, DiscoveryError> {
    let candidates = factory.candidates().map_err(DiscoveryError::Enumeration)?;
    info!("Searching for {} on {} port(s)", config.device_name, candidates.len());

    for port in candidates {
        if cancel.load(Ordering::SeqCst) {
            info!("Discovery cancelled");
            return Err(DiscoveryError::Cancelled);
        }

        let mut transport = match factory.open(&port) {
            Ok(transport) => transport,
            Err(e) => {
                debug!("Skipping {}: {}", port, e);
                continue;
            }
        };

        if !settle(config.settle_delay, cancel) {
            transport.close();
            info!("Discovery cancelled");
            return Err(DiscoveryError::Cancelled);
        }

        match transport.read_line(config.read_timeout) {
            Ok(line) if line == config.device_name.as_bytes() => {}
            Ok(line) => {
                debug!("{} answered {:?}, not the bench", port, describe_line(&line));
                transport.close();
                continue;
            }
            Err(e) => {
                debug!("{} did not identify itself: {}", port, e);
                transport.close();
                continue;
            }
        }

        info!("Bench identified on {}", port);
        return match handshake(transport.as_mut(), config, cancel) {
            Ok(protocol_version) => {
                info!("{} ready, protocol version {}", port, protocol_version);
                let identity = DeviceIdentity {
                    name: config.device_name.clone(),
                    protocol_version,
                    port,
                };
                Ok((transport, identity))
            }
            Err(e) => {
                warn!("Handshake on {} failed: {}", port, e);
                transport.close();
                Err(e)
            }
        };
    }

    warn!("Could not find {}", config.device_name);
    Err(DiscoveryError::NoDeviceFound)
}

/// Sleep out the settle delay in short slices. False if cancelled meanwhile.
fn settle(delay: Duration, cancel: &AtomicBool) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(SETTLE_SLICE.min(deadline - now));
    }
}

/// Version negotiation and readiness polling on an identified bench
fn handshake(
    transport: &mut dyn LineTransport,
    config: &DiscoveryConfig,
    cancel: &AtomicBool,
) -> Result<u32, DiscoveryError> {
    let version = match transport.read_line(config.read_timeout) {
        Ok(line) => parse_version(&line),
        Err(e) if e.is_timeout() => None,
        Err(e) => return Err(DiscoveryError::Transport(e)),
    };

    let version = match version {
        Some(v) if config.supported_protocols.contains(&v) => v,
        other => return Err(DiscoveryError::UnsupportedProtocol(other)),
    };

    for attempt in 1..=config.ready_attempts {
        if cancel.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Cancelled);
        }
        match transport.read_line(config.read_timeout) {
            Ok(line) if line == READY_LINE => return Ok(version),
            Ok(line) => info!(
                "Waiting for ready ({}/{}): {}",
                attempt,
                config.ready_attempts,
                describe_line(&line)
            ),
            Err(e) if e.is_timeout() => {
                debug!("Waiting for ready ({}/{}): no line", attempt, config.ready_attempts);
            }
            Err(e) => return Err(DiscoveryError::Transport(e)),
        }
    }

    Err(DiscoveryError::DeviceNotReady)
}

/// Parse `protocol version: <int>`
pub fn parse_version(line: &[u8]) -> Option<u32> {
    std::str::from_utf8(line)
        .ok()?
        .trim()
        .strip_prefix(VERSION_PREFIX)?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::{MockTransportFactory, ScriptedTransport};

    fn quick_config() -> DiscoveryConfig {
        DiscoveryConfig {
            settle_delay: Duration::ZERO,
            read_timeout: Duration::from_millis(1),
            ..DiscoveryConfig::default()
        }
    }

    fn bench(port: &str, lines: &[&str]) -> ScriptedTransport {
        ScriptedTransport::new(port, lines.iter().map(|l| l.as_bytes()))
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version(b"protocol version: 1"), Some(1));
        assert_eq!(parse_version(b"protocol version:12 "), Some(12));
        assert_eq!(parse_version(b"protocol version: x"), None);
        assert_eq!(parse_version(b"version 1"), None);
    }

    #[test]
    fn test_discovers_ready_device() {
        let mut factory = MockTransportFactory::new();
        factory
            .expect_candidates()
            .returning(|| Ok(vec!["/dev/ttyUSB0".to_string()]));
        factory.expect_open().times(1).returning(|port| {
            Ok(Box::new(bench(
                port,
                &[DEVICE_NAME, "protocol version: 1", "homing", "ready"],
            )))
        });

        let (transport, identity) = discover(&factory, &quick_config()).unwrap();
        assert_eq!(identity.protocol_version, 1);
        assert_eq!(identity.port, "/dev/ttyUSB0");
        assert!(transport.is_open());
    }

    #[test]
    fn test_unsupported_protocol_stops_search() {
        let mut factory = MockTransportFactory::new();
        factory
            .expect_candidates()
            .returning(|| Ok(vec!["A".to_string(), "B".to_string()]));
        factory
            .expect_open()
            .withf(|port| port == "A")
            .times(1)
            .returning(|port| Ok(Box::new(bench(port, &[DEVICE_NAME, "protocol version: 2"]))));
        factory.expect_open().withf(|port| port == "B").times(0);

        let err = discover(&factory, &quick_config()).unwrap_err();
        assert!(matches!(err, DiscoveryError::UnsupportedProtocol(Some(2))));
        assert_eq!(err.status(), "UNSUPPORTED PROTOCOL (2)");
    }

    #[test]
    fn test_unreadable_version_is_unsupported() {
        let mut factory = MockTransportFactory::new();
        factory.expect_candidates().returning(|| Ok(vec!["A".to_string()]));
        factory
            .expect_open()
            .returning(|port| Ok(Box::new(bench(port, &[DEVICE_NAME, "protocol version: one"]))));

        let err = discover(&factory, &quick_config()).unwrap_err();
        assert!(matches!(err, DiscoveryError::UnsupportedProtocol(None)));
    }

    #[test]
    fn test_device_not_ready_after_cap() {
        let mut factory = MockTransportFactory::new();
        factory.expect_candidates().returning(|| Ok(vec!["A".to_string()]));
        factory.expect_open().returning(|port| {
            let mut lines = vec![DEVICE_NAME, "protocol version: 1"];
            lines.extend(std::iter::repeat("calibrating").take(10));
            lines.push("ready");
            Ok(Box::new(bench(port, &lines)))
        });

        let err = discover(&factory, &quick_config()).unwrap_err();
        assert!(matches!(err, DiscoveryError::DeviceNotReady));
    }

    #[test]
    fn test_ready_on_last_attempt() {
        let mut factory = MockTransportFactory::new();
        factory.expect_candidates().returning(|| Ok(vec!["A".to_string()]));
        factory.expect_open().returning(|port| {
            let mut lines = vec![DEVICE_NAME, "protocol version: 1"];
            lines.extend(std::iter::repeat("calibrating").take(9));
            lines.push("ready");
            Ok(Box::new(bench(port, &lines)))
        });

        assert!(discover(&factory, &quick_config()).is_ok());
    }

    #[test]
    fn test_skips_busy_and_foreign_ports() {
        let mut factory = MockTransportFactory::new();
        factory.expect_candidates().returning(|| {
            Ok(vec!["busy".to_string(), "modem".to_string(), "bench".to_string()])
        });
        factory
            .expect_open()
            .withf(|port| port == "busy")
            .returning(|port| Err(TransportError::PortInUse(port.to_string())));
        factory
            .expect_open()
            .withf(|port| port == "modem")
            .returning(|port| Ok(Box::new(bench(port, &["OK", "AT"]))));
        factory.expect_open().withf(|port| port == "bench").returning(|port| {
            Ok(Box::new(bench(port, &[DEVICE_NAME, "protocol version: 1", "ready"])))
        });

        let (_, identity) = discover(&factory, &quick_config()).unwrap();
        assert_eq!(identity.port, "bench");
    }

    #[test]
    fn test_no_device_found() {
        let mut factory = MockTransportFactory::new();
        factory.expect_candidates().returning(|| Ok(vec!["silent".to_string()]));
        factory
            .expect_open()
            .returning(|port| Ok(Box::new(ScriptedTransport::new(port, Vec::<&[u8]>::new()))));

        let err = discover(&factory, &quick_config()).unwrap_err();
        assert!(matches!(err, DiscoveryError::NoDeviceFound));
        assert_eq!(err.status(), "NO DEVICE FOUND");
    }

    #[test]
    fn test_cancelled_before_first_candidate() {
        let mut factory = MockTransportFactory::new();
        factory.expect_candidates().returning(|| Ok(vec!["A".to_string()]));
        factory.expect_open().times(0);

        let cancel = AtomicBool::new(true);
        let err = discover_until(&factory, &quick_config(), &cancel).unwrap_err();
        assert!(matches!(err, DiscoveryError::Cancelled));
        assert_eq!(err.status(), "SEARCH CANCELLED");
    }

    #[test]
    fn test_unreadable_version_status() {
        assert_eq!(DiscoveryError::UnsupportedProtocol(None).status(), "UNSUPPORTED PROTOCOL (?)");
    }

    #[tokio::test]
    async fn test_task_cancel_ends_slow_search() {
        let factory = crate::core::transport::ScriptedFactory::new()
            .with_port(ScriptedTransport::new("slow", Vec::<&[u8]>::new()).blocking_timeouts());
        let config = DiscoveryConfig {
            settle_delay: Duration::from_secs(30),
            ..DiscoveryConfig::default()
        };
        let task = DiscoveryTask::new(Arc::new(factory), config);
        let canceller = task.clone();
        let search = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), search)
            .await
            .expect("cancelled search should end promptly")
            .unwrap();
        assert!(matches!(result, Err(DiscoveryError::Cancelled)));
    }
}
