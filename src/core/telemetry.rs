//! Telemetry line parsing
//!
//! While a test runs the bench prints one line per measurement:
//!
//! ```text
//! 1234 dist:12.50 force:301.2
//! ```
//!
//! Three whitespace-separated tokens; the second and third are `key:value`
//! pairs read by position (distance, then force). The first token and the
//! key names are ignored. Anything else on the line is firmware chatter and
//! yields [`NotASample`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Single distance/force measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Crosshead travel
    pub distance: f64,
    /// Measured load
    pub force: f64,
}

impl Sample {
    /// Create a sample
    pub fn new(distance: f64, force: f64) -> Self {
        Self { distance, force }
    }
}

/// Why a line was not a telemetry sample
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotASample {
    /// Line is not valid UTF-8
    #[error("line is not valid UTF-8")]
    NotUtf8,

    /// Line does not have exactly three tokens
    #[error("expected 3 tokens, found {0}")]
    TokenCount(usize),

    /// A value token has no `key:value` separator
    #[error("token {0:?} has no ':' separator")]
    MissingSeparator(String),

    /// A value is not a finite number
    #[error("value {0:?} is not a finite number")]
    InvalidNumber(String),
}

/// Decode one line of device output
pub fn parse_line(line: &[u8]) -> Result<Sample, NotASample> {
    let text = std::str::from_utf8(line).map_err(|_| NotASample::NotUtf8)?;
    let tokens: Vec<&str> = text.split_ascii_whitespace().collect();
    if tokens.len() != 3 {
        return Err(NotASample::TokenCount(tokens.len()));
    }

    let distance = field_value(tokens[1])?;
    let force = field_value(tokens[2])?;
    Ok(Sample { distance, force })
}

fn field_value(token: &str) -> Result<f64, NotASample> {
    let (_, value) = token
        .split_once(':')
        .ok_or_else(|| NotASample::MissingSeparator(token.to_string()))?;
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(NotASample::InvalidNumber(value.to_string())),
    }
}

/// Printable form of a raw line for log output
pub fn describe_line(line: &[u8]) -> String {
    match std::str::from_utf8(line) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<hex {}>", hex::encode(line)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_well_formed() {
        let sample = parse_line(b"X dist:1.5 force:-20.25").unwrap();
        assert_eq!(sample, Sample::new(1.5, -20.25));
    }

    #[test]
    fn test_parse_is_positional() {
        // keys are not looked at, only position
        let sample = parse_line(b"t force:3 dist:4").unwrap();
        assert_eq!(sample.distance, 3.0);
        assert_eq!(sample.force, 4.0);
    }

    #[test]
    fn test_parse_extra_whitespace() {
        let sample = parse_line(b"  7\tdist:0.1   force:2e3 ").unwrap();
        assert_eq!(sample, Sample::new(0.1, 2000.0));
    }

    #[test]
    fn test_wrong_token_count() {
        assert_eq!(parse_line(b"ready"), Err(NotASample::TokenCount(1)));
        assert_eq!(parse_line(b""), Err(NotASample::TokenCount(0)));
        assert_eq!(
            parse_line(b"X dist:1 force:2 extra:3"),
            Err(NotASample::TokenCount(4))
        );
    }

    #[test]
    fn test_missing_colon() {
        assert_eq!(
            parse_line(b"X dist=1 force:2"),
            Err(NotASample::MissingSeparator("dist=1".into()))
        );
    }

    #[test]
    fn test_non_numeric() {
        assert_eq!(
            parse_line(b"X dist:abc force:2"),
            Err(NotASample::InvalidNumber("abc".into()))
        );
        assert_eq!(
            parse_line(b"X dist:1 force:"),
            Err(NotASample::InvalidNumber(String::new()))
        );
        assert_eq!(
            parse_line(b"X dist:NaN force:1"),
            Err(NotASample::InvalidNumber("NaN".into()))
        );
    }

    #[test]
    fn test_not_utf8() {
        assert_eq!(parse_line(&[0xff, b' ', b'a']), Err(NotASample::NotUtf8));
        assert_eq!(describe_line(&[0xff, 0x00]), "<hex ff00>");
    }

    #[test]
    fn test_random_garbage_never_panics() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..2000 {
            let len = rng.gen_range(0..40);
            let line: Vec<u8> = (0..len)
                .map(|_| *b"0123456789 :.-eXdistforce\xff".get(rng.gen_range(0..26)).unwrap())
                .collect();
            let _ = parse_line(&line);
        }
    }
}
