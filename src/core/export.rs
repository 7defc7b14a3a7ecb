//! Dataset export
//!
//! Writes a two-column table ("Distance", "Load") with one row per sample.
//! Columns are validated before anything touches the disk: if the distance
//! and force columns differ in length, the export is refused and no file is
//! created.

use super::buffer::SampleSnapshot;
use super::discovery::DeviceIdentity;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Column headers
pub const HEADERS: [&str; 2] = ["Distance", "Load"];

/// Export format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Comma-separated values
    #[default]
    Csv,
    /// JSON document with metadata
    Json,
}

impl ExportFormat {
    /// File extension
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown export format: {other}")),
        }
    }
}

/// Export errors
#[derive(Error, Debug)]
pub enum ExportError {
    /// Distance and force columns differ in length
    #[error("column length mismatch: {distances} distances, {forces} forces")]
    LengthMismatch {
        /// Distance count
        distances: usize,
        /// Force count
        forces: usize,
    },

    /// Name unusable as a file name
    #[error("invalid export name: {0:?}")]
    InvalidName(String),

    /// Nothing to export
    #[error("no samples to export")]
    Empty,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Pair up two columns, refusing unequal lengths
pub fn pair_columns(distances: &[f64], forces: &[f64]) -> Result<Vec<(f64, f64)>, ExportError> {
    if distances.len() != forces.len() {
        return Err(ExportError::LengthMismatch {
            distances: distances.len(),
            forces: forces.len(),
        });
    }
    Ok(distances.iter().copied().zip(forces.iter().copied()).collect())
}

/// Write both columns as CSV with a header row. Returns the data row count.
pub fn write_csv<W: Write>(mut writer: W, distances: &[f64], forces: &[f64]) -> Result<usize, ExportError> {
    let rows = pair_columns(distances, forces)?;
    writeln!(writer, "{}", HEADERS.join(","))?;
    for (distance, load) in &rows {
        writeln!(writer, "{distance},{load}")?;
    }
    writer.flush()?;
    Ok(rows.len())
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonRow {
    distance: f64,
    load: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonExport {
    device: Option<String>,
    port: Option<String>,
    protocol_version: Option<u32>,
    exported_at: DateTime<Local>,
    columns: [String; 2],
    samples: Vec<JsonRow>,
}

/// Write both columns as a JSON document. Returns the data row count.
pub fn write_json<W: Write>(
    mut writer: W,
    distances: &[f64],
    forces: &[f64],
    identity: Option<&DeviceIdentity>,
) -> Result<usize, ExportError> {
    let rows = pair_columns(distances, forces)?;
    let count = rows.len();
    let doc = JsonExport {
        device: identity.map(|i| i.name.clone()),
        port: identity.map(|i| i.port.clone()),
        protocol_version: identity.map(|i| i.protocol_version),
        exported_at: Local::now(),
        columns: HEADERS.map(String::from),
        samples: rows
            .into_iter()
            .map(|(distance, load)| JsonRow { distance, load })
            .collect(),
    };
    serde_json::to_writer_pretty(&mut writer, &doc)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(count)
}

/// Writes snapshots to files named `<prefix><name>.<ext>`
#[derive(Debug, Clone)]
pub struct Exporter {
    directory: PathBuf,
    prefix: String,
    format: ExportFormat,
}

impl Exporter {
    /// Create an exporter
    pub fn new(directory: impl Into<PathBuf>, prefix: &str, format: ExportFormat) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.to_string(),
            format,
        }
    }

    /// Target path for a dataset name
    pub fn path_for(&self, name: &str) -> Result<PathBuf, ExportError> {
        let name = name.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(ExportError::InvalidName(name.to_string()));
        }
        Ok(self
            .directory
            .join(format!("{}{}.{}", self.prefix, name, self.format.extension())))
    }

    /// Export a snapshot under `name`; returns the written path
    pub fn export(
        &self,
        name: &str,
        snapshot: &SampleSnapshot,
        identity: Option<&DeviceIdentity>,
    ) -> Result<PathBuf, ExportError> {
        let path = self.path_for(name)?;
        self.export_to(&path, &snapshot.distances(), &snapshot.forces(), identity)?;
        Ok(path)
    }

    /// Export explicit columns to `path`
    pub fn export_to(
        &self,
        path: &Path,
        distances: &[f64],
        forces: &[f64],
        identity: Option<&DeviceIdentity>,
    ) -> Result<usize, ExportError> {
        // validate before the file exists
        pair_columns(distances, forces)?;
        if distances.is_empty() {
            return Err(ExportError::Empty);
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(path)?);
        let rows = match self.format {
            ExportFormat::Csv => write_csv(writer, distances, forces)?,
            ExportFormat::Json => write_json(writer, distances, forces, identity)?,
        };
        tracing::info!("Exported {} samples to {}", rows, path.display());
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::buffer::SampleBuffer;
    use crate::core::telemetry::Sample;

    #[test]
    fn test_csv_rows_in_order() {
        let mut out = Vec::new();
        let rows = write_csv(&mut out, &[1.0, 2.0], &[10.0, 20.0]).unwrap();
        assert_eq!(rows, 2);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Distance,Load");
        let parsed: Vec<(f64, f64)> = lines[1..]
            .iter()
            .map(|l| {
                let (d, f) = l.split_once(',').unwrap();
                (d.parse().unwrap(), f.parse().unwrap())
            })
            .collect();
        assert_eq!(parsed, vec![(1.0, 10.0), (2.0, 20.0)]);
    }

    #[test]
    fn test_mismatch_writes_nothing() {
        let mut out = Vec::new();
        let err = write_csv(&mut out, &[1.0, 2.0], &[10.0]).unwrap_err();
        assert!(matches!(err, ExportError::LengthMismatch { distances: 2, forces: 1 }));
        assert!(out.is_empty());
    }

    #[test]
    fn test_mismatch_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(dir.path(), "result_", ExportFormat::Csv);
        let path = dir.path().join("bad.csv");
        let err = exporter.export_to(&path, &[1.0], &[], None).unwrap_err();
        assert!(matches!(err, ExportError::LengthMismatch { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_export_snapshot_json() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(dir.path(), "result_", ExportFormat::Json);
        let mut buffer = SampleBuffer::new();
        buffer.append(Sample::new(0.5, 12.0));
        buffer.append(Sample::new(1.0, 24.0));

        let path = exporter.export("column-a", &buffer.snapshot(), None).unwrap();
        assert_eq!(path.file_name().unwrap(), "result_column-a.json");

        let doc: JsonExport = serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(doc.samples.len(), 2);
        assert_eq!(doc.samples[1].load, 24.0);
        assert_eq!(doc.columns, ["Distance".to_string(), "Load".to_string()]);
    }

    #[test]
    fn test_invalid_names() {
        let exporter = Exporter::new(".", "result_", ExportFormat::Csv);
        assert!(exporter.path_for("").is_err());
        assert!(exporter.path_for("../etc").is_err());
        assert!(exporter.path_for("run 1").is_ok());
    }

    #[test]
    fn test_empty_snapshot_refused() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(dir.path(), "", ExportFormat::Csv);
        let err = exporter.export("x", &SampleBuffer::new().snapshot(), None).unwrap_err();
        assert!(matches!(err, ExportError::Empty));
        assert!(!dir.path().join("x.csv").exists());
    }
}
