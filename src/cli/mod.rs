//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Exit codes for automation
//! - Console command parsing
//! - Text / JSON report formatting

pub mod console;
pub mod exit_codes;
pub mod output;

pub use console::{parse_command, ConsoleCommand};
pub use exit_codes::{exit_code_description, print_exit_codes, CliResult, ExitCodes};
pub use output::{format_identity, format_view, OutputFormat};
