//! Output formatting for CLI reports

use crate::core::bench::BenchView;
use crate::core::discovery::DeviceIdentity;
use clap::ValueEnum;
use serde::Serialize;

/// CLI output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON for scripting
    Json,
}

/// Render any serializable value as pretty JSON
pub fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
}

/// One-line or JSON description of a device identity
pub fn format_identity(identity: &DeviceIdentity, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => to_json(identity),
        OutputFormat::Text => format!(
            "{} on {} (protocol version {})",
            identity.name, identity.port, identity.protocol_version
        ),
    }
}

/// Status report for a bench view
pub fn format_view(view: &BenchView, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => to_json(view),
        OutputFormat::Text => {
            let mut out = format!("{:<12} {}\n", view.state.to_string(), view.status);
            if let Some(identity) = &view.identity {
                out.push_str(&format!("device       {}\n", format_identity(identity, format)));
            }
            out.push_str(&format!("samples      {}", view.sample_count));
            if let Some(last) = view.last_sample {
                out.push_str(&format!(
                    " (last: {:.3} mm, {:.2} N)",
                    last.distance, last.force
                ));
            }
            if let Some(peak) = view.peak_sample {
                out.push_str(&format!("\npeak load    {:.2} N at {:.3} mm", peak.force, peak.distance));
            }
            out
        }
    }
}
