//! Core of the bench host
//!
//! This module provides:
//! - Line-framed transports (serial port, scripted mock, simulated bench)
//! - Device discovery with versioned handshake
//! - Session protocol and run-state machine
//! - Telemetry parsing into samples
//! - Copy-on-write sample buffer
//! - Pipeline step and the tick-driven driving loop
//! - Bench controller tying it together
//! - Dataset export

pub mod bench;
pub mod buffer;
pub mod discovery;
pub mod driver;
pub mod export;
pub mod pipeline;
pub mod session;
pub mod simulator;
pub mod telemetry;
pub mod transport;
