//! # Bucklebench Core Library
//!
//! Host-side driver for the Euler buckling test bench:
//! - Discovery of the bench among the visible serial ports
//! - Versioned handshake (device name, protocol version, `ready`)
//! - Command/run-state protocol (`go`, `stop`, `reverse`, `tare`, `switchDir`)
//! - Telemetry parsing into (distance, force) samples
//! - Copy-on-write sample buffer with cheap snapshots
//! - Tick-driven driving loop and dataset export
//!
//! ## Example
//!
//! ```rust,no_run
//! use bucklebench_core::{AppConfig, Bench, BenchCommand, Driver, SerialPortFactory};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let bench = Bench::new(
//!         Box::new(SerialPortFactory::new(config.serial_config())),
//!         config.discovery_config(),
//!         config.pipeline_config(),
//!         config.exporter(),
//!     );
//!     let (driver, handle) = Driver::new(bench, config.tick());
//!     let task = tokio::spawn(driver.run());
//!
//!     handle.send_command(BenchCommand::Connect).await?;
//!     handle.send_command(BenchCommand::Start).await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!     handle.send_command(BenchCommand::Stop).await?;
//!     handle.send_command(BenchCommand::Save("column-a".into())).await?;
//!     handle.send_command(BenchCommand::Shutdown).await?;
//!     task.await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;
pub mod utils;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{AppConfig, ConfigError};
pub use crate::core::bench::{Bench, BenchCommand, BenchError, BenchView, CommandOutcome, Controls};
pub use crate::core::buffer::{SampleBuffer, SampleSnapshot};
pub use crate::core::discovery::{discover, DeviceIdentity, DiscoveryConfig, DiscoveryError, DiscoveryTask};
pub use crate::core::driver::{Driver, DriverError, DriverHandle};
pub use crate::core::export::{ExportError, ExportFormat, Exporter};
pub use crate::core::pipeline::{PipelineConfig, StepOutcome};
pub use crate::core::session::{Command, RunState, Session, SessionError, SessionState};
pub use crate::core::simulator::{SimulatedBench, SimulatedFactory, SimulatorConfig};
pub use crate::core::telemetry::{parse_line, NotASample, Sample};
pub use crate::core::transport::{
    LineTransport, SerialConfig, SerialPortFactory, SerialTransport, TransportError, TransportFactory,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
