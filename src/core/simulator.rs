//! Simulated bench firmware
//!
//! Emulates the buckling bench well enough to drive the whole host stack
//! without hardware:
//! - handshake (name, protocol version, status chatter, `ready`)
//! - `go` / `stop` / `reverse` / `tare` / `switchDir`
//! - telemetry along a buckling curve, with noise and stray debug lines
//! - an optional unplug after a number of samples

use super::discovery::DEVICE_NAME;
use super::transport::{LineTransport, TransportError, TransportFactory};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Port name the simulated bench answers on
pub const SIMULATED_PORT: &str = "sim0";

/// Simulated device behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Name line printed on open
    pub device_name: String,
    /// Protocol version announced after the name
    pub protocol_version: u32,
    /// Status lines printed before `ready`
    pub chatter_lines: usize,
    /// Crosshead travel per telemetry line (mm)
    pub step_mm: f64,
    /// Column stiffness before buckling (N/mm)
    pub stiffness: f64,
    /// Euler critical load (N)
    pub critical_load: f64,
    /// Peak-to-peak load noise (N)
    pub noise: f64,
    /// Chance that a line is a debug message instead of telemetry
    pub debug_probability: f64,
    /// Report the device gone after this many samples
    pub disconnect_after: Option<u64>,
    /// RNG seed; random when unset
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            device_name: DEVICE_NAME.to_string(),
            protocol_version: 1,
            chatter_lines: 2,
            step_mm: 0.05,
            stiffness: 120.0,
            critical_load: 450.0,
            noise: 1.5,
            debug_probability: 0.02,
            disconnect_after: None,
            seed: None,
        }
    }
}

/// Emulated bench behind a [`LineTransport`]
#[derive(Debug)]
pub struct SimulatedBench {
    config: SimulatorConfig,
    outbox: VecDeque<Vec<u8>>,
    received: Arc<Mutex<Vec<String>>>,
    rng: StdRng,
    open: bool,
    running: bool,
    position: f64,
    direction: f64,
    tare_offset: f64,
    emitted: u64,
}

impl SimulatedBench {
    /// Power up the bench; the handshake is queued immediately
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut outbox = VecDeque::new();
        outbox.push_back(config.device_name.as_bytes().to_vec());
        outbox.push_back(format!("protocol version: {}", config.protocol_version).into_bytes());
        for i in 0..config.chatter_lines {
            outbox.push_back(format!("homing axis ({}/{})", i + 1, config.chatter_lines).into_bytes());
        }
        outbox.push_back(b"ready".to_vec());

        Self {
            config,
            outbox,
            received: Arc::new(Mutex::new(Vec::new())),
            rng,
            open: true,
            running: false,
            position: 0.0,
            direction: 1.0,
            tare_offset: 0.0,
            emitted: 0,
        }
    }

    /// Shared record of the commands the bench received
    pub fn received(&self) -> Arc<Mutex<Vec<String>>> {
        self.received.clone()
    }

    fn raw_load(&self) -> f64 {
        let d = self.position.abs();
        let elastic = self.config.stiffness * d;
        if elastic <= self.config.critical_load {
            elastic
        } else {
            // past the critical load the column bows and sheds a little load
            let overshoot = d - self.config.critical_load / self.config.stiffness;
            self.config.critical_load * (1.0 - 0.02 * overshoot).max(0.8)
        }
    }

    fn telemetry(&mut self) -> Vec<u8> {
        if self.rng.gen_bool(self.config.debug_probability.clamp(0.0, 1.0)) {
            return format!("debug: strain gauge raw {}", self.rng.gen_range(0..4096)).into_bytes();
        }

        self.position += self.config.step_mm * self.direction;
        self.emitted += 1;
        let noise = if self.config.noise > 0.0 {
            self.rng.gen_range(-self.config.noise / 2.0..=self.config.noise / 2.0)
        } else {
            0.0
        };
        let load = self.raw_load() - self.tare_offset + noise;
        format!("{} dist:{:.3} force:{:.2}", self.emitted, self.position, load).into_bytes()
    }

    fn handle(&mut self, command: &str) {
        match command {
            "go" => self.running = true,
            "stop" => self.running = false,
            "reverse" => {
                self.position = 0.0;
                self.outbox.push_back(b"returning to start".to_vec());
            }
            "tare" => {
                self.tare_offset = self.raw_load();
                self.outbox.push_back(b"tared".to_vec());
            }
            "switchDir" => self.direction = -self.direction,
            other => self
                .outbox
                .push_back(format!("unknown command: {other}").into_bytes()),
        }
    }
}

impl LineTransport for SimulatedBench {
    fn port_name(&self) -> &str {
        SIMULATED_PORT
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        if let Some(line) = self.outbox.pop_front() {
            return Ok(line);
        }
        if !self.running {
            return Err(TransportError::Timeout(timeout));
        }
        if matches!(self.config.disconnect_after, Some(limit) if self.emitted >= limit) {
            self.open = false;
            return Err(TransportError::Disconnected);
        }
        Ok(self.telemetry())
    }

    fn write_line(&mut self, line: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        let command = String::from_utf8_lossy(line).trim().to_string();
        debug!("simulator <- {}", command);
        self.handle(&command);
        self.received.lock().push(command);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
        self.running = false;
    }
}

/// Factory exposing a single simulated bench on [`SIMULATED_PORT`]
#[derive(Debug, Clone, Default)]
pub struct SimulatedFactory {
    config: SimulatorConfig,
    received: Arc<Mutex<Vec<String>>>,
}

impl SimulatedFactory {
    /// Create a factory for benches built from `config`
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Commands received by every bench this factory opened, in order
    pub fn received(&self) -> Arc<Mutex<Vec<String>>> {
        self.received.clone()
    }
}

impl TransportFactory for SimulatedFactory {
    fn candidates(&self) -> Result<Vec<String>, TransportError> {
        Ok(vec![SIMULATED_PORT.to_string()])
    }

    fn open(&self, port: &str) -> Result<Box<dyn LineTransport>, TransportError> {
        if port != SIMULATED_PORT {
            return Err(TransportError::PortNotFound(port.to_string()));
        }
        let mut bench = SimulatedBench::new(self.config.clone());
        bench.received = self.received.clone();
        Ok(Box::new(bench))
    }
}
