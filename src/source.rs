//! Signal source abstraction over the vehicle diagnostic bus.
//!
//! Two variants share one contract: a live ELM327 serial session and a
//! deterministic simulator. The variant is selected once per connect cycle
//! by [`probe`], an availability check rather than explicit configuration:
//! if the live adapter cannot be opened the loop runs simulated instead of
//! failing startup.

pub mod elm327;
pub mod sim;

use core::fmt;
use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::config::AcquireConfig;

/// Raw per-PID values as reported by the bus, before unit normalization.
///
/// Each field is independently absent when the vehicle does not support the
/// PID or the query returned no data.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawFrame {
    /// Engine speed, revolutions per minute.
    pub rpm: Option<f64>,
    /// Vehicle speed, km/h (PID 0x0D native unit).
    pub speed_kmh: Option<f64>,
    /// Coolant temperature, degrees Celsius.
    pub coolant_c: Option<f64>,
    /// Throttle position, percent.
    pub throttle_pct: Option<f64>,
    /// Calculated engine load, percent.
    pub load_pct: Option<f64>,
    /// Mass air flow, grams per second.
    pub maf_gps: Option<f64>,
}

/// Connecting to a signal source failed. Triggers simulated fallback, never
/// fatal.
#[derive(Debug)]
pub enum ConnectError {
    /// The serial device path does not exist.
    DeviceMissing(String),
    /// The device exists but could not be opened.
    Open(String),
    /// The adapter did not answer the AT init sequence.
    Handshake(String),
}

impl Display for ConnectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::DeviceMissing(path) => write!(f, "device not found: {}", path),
            ConnectError::Open(msg) => write!(f, "failed to open device: {}", msg),
            ConnectError::Handshake(msg) => write!(f, "adapter handshake failed: {}", msg),
        }
    }
}

impl Error for ConnectError {}

/// A single poll failed. Counted by the acquisition loop and absorbed;
/// crossing the failure threshold forces a reconnect cycle.
#[derive(Debug)]
pub enum ReadError {
    /// Transport-level failure (serial I/O error, timeout).
    Io(std::io::Error),
    /// The source handle was already closed.
    Closed,
}

impl Display for ReadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::Io(e) => write!(f, "read failed: {}", e),
            ReadError::Closed => write!(f, "source is closed"),
        }
    }
}

impl Error for ReadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReadError::Io(e) => Some(e),
            ReadError::Closed => None,
        }
    }
}

impl From<std::io::Error> for ReadError {
    fn from(value: std::io::Error) -> Self {
        ReadError::Io(value)
    }
}

/// Common contract of the live and simulated sources.
///
/// Connection lifecycle only: construction is the `connect` step (each
/// variant exposes its own constructor), `poll` produces one raw frame, and
/// `close` releases the underlying handle. `poll` after `close` reports
/// [`ReadError::Closed`].
pub trait SignalSource {
    /// Short variant name for status logging ("elm327" / "simulated").
    fn name(&self) -> &'static str;

    fn poll(&mut self) -> Result<RawFrame, ReadError>;

    fn close(&mut self);
}

/// Result of an availability probe: the selected source, plus the connect
/// error when the live adapter lost and the simulator was substituted.
pub struct ProbeOutcome {
    pub source: Box<dyn SignalSource>,
    pub fallback: Option<ConnectError>,
}

/// Select a signal source by availability. Pure selection, no logging.
pub fn select(cfg: &AcquireConfig) -> ProbeOutcome {
    match elm327::Elm327Source::connect(&cfg.device_path, cfg.baud_rate) {
        Ok(source) => ProbeOutcome {
            source: Box::new(source),
            fallback: None,
        },
        Err(e) => ProbeOutcome {
            source: Box::new(sim::SimulatedSource::new()),
            fallback: Some(e),
        },
    }
}

/// Select a signal source and log the outcome. The fallback warning fires
/// exactly once per probe, at the point of substitution.
pub fn probe(cfg: &AcquireConfig) -> Box<dyn SignalSource> {
    let outcome = select(cfg);
    match &outcome.fallback {
        None => log::info!("Connected to OBD-II adapter at {}", cfg.device_path),
        Some(e) => log::warn!("OBD adapter unavailable ({}), using simulation mode", e),
    }
    outcome.source
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn missing_device_falls_back_to_simulator_with_one_fallback_reason() {
        let cfg = AcquireConfig {
            device_path: "/nonexistent/obd-probe-device".to_string(),
            baud_rate: 38400,
            tick_interval: Duration::from_secs(1),
            failure_threshold: 5,
            ingest_url: None,
        };

        let outcome = select(&cfg);
        assert_eq!(outcome.source.name(), "simulated");
        assert!(matches!(outcome.fallback, Some(ConnectError::DeviceMissing(_))));

        let source = probe(&cfg);
        assert_eq!(source.name(), "simulated");
    }
}
