//! Application settings

use crate::core::discovery::{DiscoveryConfig, DEVICE_NAME, SUPPORTED_PROTOCOLS};
use crate::core::export::{ExportFormat, Exporter};
use crate::core::pipeline::PipelineConfig;
use crate::core::simulator::SimulatorConfig;
use crate::core::transport::SerialConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No platform config directory
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// Reading or writing the file failed
    #[error("{path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Encoding failed
    #[error("Could not encode config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range
    #[error("Invalid setting {key}: {reason}")]
    Invalid {
        /// Dotted key, e.g. `serial.baud_rate`
        key: &'static str,
        /// What is wrong with it
        reason: &'static str,
    },
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial link
    pub serial: SerialSettings,
    /// Device identity and handshake
    pub device: DeviceSettings,
    /// Driving loop
    pub pipeline: PipelineSettings,
    /// Dataset export
    pub export: ExportSettings,
    /// Log output
    pub logging: LoggingSettings,
    /// Built-in simulator used by `--simulate`
    pub simulator: SimulatorSettings,
}

/// Serial link settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Baud rate
    pub baud_rate: u32,
    /// Timeout for each handshake line (ms)
    pub handshake_timeout_ms: u64,
    /// Timeout for each telemetry poll (ms)
    pub poll_timeout_ms: u64,
    /// Wait after opening a port before reading (ms)
    pub settle_delay_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            handshake_timeout_ms: 1000,
            poll_timeout_ms: 20,
            settle_delay_ms: 1000,
        }
    }
}

/// Device identity settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Name line the firmware prints first
    pub name: String,
    /// Accepted protocol versions
    pub supported_protocols: Vec<u32>,
    /// Lines to wait for `ready`
    pub ready_attempts: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            name: DEVICE_NAME.to_string(),
            supported_protocols: SUPPORTED_PROTOCOLS.to_vec(),
            ready_attempts: 10,
        }
    }
}

/// Driving loop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Tick interval (ms)
    pub tick_ms: u64,
    /// Warn after this many consecutive unparsed lines
    pub noise_warn_threshold: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            tick_ms: 20,
            noise_warn_threshold: 50,
        }
    }
}

/// Export settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Output directory
    pub directory: PathBuf,
    /// File name prefix
    pub file_prefix: String,
    /// Output format
    pub format: ExportFormat,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            file_prefix: "result_".to_string(),
            format: ExportFormat::Csv,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`)
    pub level: String,
    /// Also write logs to this file
    pub file: Option<PathBuf>,
    /// Emit JSON lines instead of text
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json: false,
        }
    }
}

/// Simulator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorSettings {
    /// Protocol version the simulated bench announces
    pub protocol_version: u32,
    /// Status lines before `ready`
    pub chatter_lines: usize,
    /// Peak-to-peak load noise (N)
    pub noise: f64,
    /// Euler critical load (N)
    pub critical_load: f64,
    /// Fixed RNG seed
    pub seed: Option<u64>,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        let sim = SimulatorConfig::default();
        Self {
            protocol_version: sim.protocol_version,
            chatter_lines: sim.chatter_lines,
            noise: sim.noise,
            critical_load: sim.critical_load,
            seed: sim.seed,
        }
    }
}

impl AppConfig {
    /// Load config from the default location; a missing file yields defaults
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::config_file().ok_or(ConfigError::NoConfigDir)?;
        Self::load_from(&path)
    }

    /// Load config from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = super::config_file().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save config to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        std::fs::write(path, self.to_toml()?).map_err(io)
    }

    /// Pretty TOML rendering
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the bench cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(bool, &'static str, &'static str); 8] = [
            (self.serial.baud_rate == 0, "serial.baud_rate", "must be positive"),
            (self.serial.handshake_timeout_ms == 0, "serial.handshake_timeout_ms", "must be positive"),
            (self.serial.poll_timeout_ms == 0, "serial.poll_timeout_ms", "must be positive"),
            (self.device.name.trim().is_empty(), "device.name", "must not be empty"),
            (self.device.supported_protocols.is_empty(), "device.supported_protocols", "must list at least one version"),
            (self.device.ready_attempts == 0, "device.ready_attempts", "must be positive"),
            (self.pipeline.tick_ms == 0, "pipeline.tick_ms", "must be positive"),
            (self.export.file_prefix.contains(['/', '\\']), "export.file_prefix", "must not contain path separators"),
        ];
        match checks.into_iter().find(|(bad, _, _)| *bad) {
            Some((_, key, reason)) => Err(ConfigError::Invalid { key, reason }),
            None => Ok(()),
        }
    }

    /// Discovery parameters
    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            device_name: self.device.name.clone(),
            supported_protocols: self.device.supported_protocols.clone(),
            settle_delay: Duration::from_millis(self.serial.settle_delay_ms),
            read_timeout: Duration::from_millis(self.serial.handshake_timeout_ms),
            ready_attempts: self.device.ready_attempts,
        }
    }

    /// Pipeline parameters
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            poll_timeout: Duration::from_millis(self.serial.poll_timeout_ms),
            noise_warn_threshold: self.pipeline.noise_warn_threshold,
        }
    }

    /// Serial port parameters
    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            baud_rate: self.serial.baud_rate,
        }
    }

    /// Driving loop tick
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.pipeline.tick_ms)
    }

    /// Exporter for the configured directory, prefix and format
    pub fn exporter(&self) -> Exporter {
        Exporter::new(&self.export.directory, &self.export.file_prefix, self.export.format)
    }

    /// Simulated bench answering to the configured device name
    pub fn simulator_config(&self) -> SimulatorConfig {
        SimulatorConfig {
            device_name: self.device.name.clone(),
            protocol_version: self.simulator.protocol_version,
            chatter_lines: self.simulator.chatter_lines,
            noise: self.simulator.noise,
            critical_load: self.simulator.critical_load,
            seed: self.simulator.seed,
            ..SimulatorConfig::default()
        }
    }
}
