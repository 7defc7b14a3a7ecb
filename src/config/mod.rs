//! Configuration module
//!
//! Handles application settings and the directories they live in

mod settings;

pub use settings::{
    AppConfig, ConfigError, DeviceSettings, ExportSettings, LoggingSettings, PipelineSettings,
    SerialSettings, SimulatorSettings,
};

use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "bucklebench", "Bucklebench")
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default location of the configuration file
pub fn config_file() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}
