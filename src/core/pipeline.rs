//! One telemetry step: read a line, parse it, store the sample
//!
//! The step is driven once per tick by [`crate::core::driver::Driver`]; it
//! never loops, and it waits at most `poll_timeout` for a line.

use super::buffer::SampleBuffer;
use super::session::Session;
use super::telemetry::{describe_line, parse_line, NotASample, Sample};
use super::transport::TransportError;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Pipeline parameters
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Longest wait for a telemetry line per step
    pub poll_timeout: Duration,
    /// Warn once this many consecutive lines failed to parse
    pub noise_warn_threshold: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(20),
            noise_warn_threshold: 50,
        }
    }
}

/// Result of a single step
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// A sample was appended
    Sample(Sample),
    /// A line arrived but was not telemetry
    Unparsed(NotASample),
    /// Nothing arrived, or no test is running
    Quiet,
}

/// Run one step. Transport failures other than a timeout are returned.
pub fn step(
    session: &mut Session,
    buffer: &mut SampleBuffer,
    config: &PipelineConfig,
) -> Result<StepOutcome, TransportError> {
    if !session.is_running() {
        return Ok(StepOutcome::Quiet);
    }

    let line = match session.read_line(config.poll_timeout) {
        Ok(line) => line,
        Err(e) if e.is_timeout() => return Ok(StepOutcome::Quiet),
        Err(e) => return Err(e),
    };

    match parse_line(&line) {
        Ok(sample) => {
            trace!("{} {}", sample.distance, sample.force);
            buffer.append(sample);
            session.note_sample();
            Ok(StepOutcome::Sample(sample))
        }
        Err(reason) => {
            debug!("Ignoring line {:?}: {}", describe_line(&line), reason);
            let streak = session.note_unparsed();
            if streak == config.noise_warn_threshold {
                warn!("{} consecutive lines without a sample", streak);
            }
            Ok(StepOutcome::Unparsed(reason))
        }
    }
}
