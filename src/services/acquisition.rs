//! Acquisition loop: one reading per cadence tick, with reconnect recovery.
//!
//! Tick policy: a failed poll still emits a reading (all fields null) so the
//! 1 Hz data stream never silently drops a tick. Transient failures are
//! absorbed here and never escalate to process termination; once the
//! consecutive-failure threshold is crossed the loop closes the source and
//! re-probes, resetting the counter regardless of the reconnect outcome so
//! a dead adapter retries once per cycle instead of storming.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::client::IngestClient;
use crate::config::AcquireConfig;
use crate::models::telemetry::Reading;
use crate::source::{self, RawFrame, SignalSource};

const KMH_TO_MPH: f64 = 0.621371;

/// How long the cadence sleep waits between shutdown-flag checks.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Connection lifecycle of the acquisition loop. Owned here exclusively;
/// never shared with the ingestion service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

/// Explicit finite-state machine over poll outcomes.
///
/// `disconnected → connecting → connected ⇄ degraded`; entering `Degraded`
/// signals exactly one reconnect cycle per threshold crossing.
#[derive(Debug)]
pub struct ConnectionMonitor {
    state: ConnectionState,
    consecutive_failures: u32,
    threshold: u32,
}

impl ConnectionMonitor {
    pub fn new(threshold: u32) -> Self {
        ConnectionMonitor {
            state: ConnectionState::Disconnected,
            consecutive_failures: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// A connect attempt is underway (startup or reconnect).
    pub fn begin_connect(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// A poll succeeded: any failure streak ends here.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = ConnectionState::Connected;
    }

    /// A poll failed. Returns `true` exactly when this failure crosses the
    /// threshold and the caller must run one reconnect cycle.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.threshold && self.state != ConnectionState::Degraded {
            self.state = ConnectionState::Degraded;
            return true;
        }
        false
    }

    /// The reconnect cycle ran (successfully or not): reset the counter so
    /// every future cycle needs a full streak again.
    pub fn reconnected(&mut self) {
        self.consecutive_failures = 0;
        self.state = ConnectionState::Connecting;
    }
}

/// Map a raw bus frame to the wire reading, normalizing units.
///
/// RPM becomes a non-negative integer (0 means "no rotation detected", not
/// an error); km/h → mph; °C → °F; everything else passes through rounded.
pub fn map_frame(frame: &RawFrame, timestamp: DateTime<Utc>) -> Reading {
    Reading {
        timestamp,
        rpm: frame.rpm.map(|r| r.round().max(0.0) as i32),
        speed_mph: frame.speed_kmh.map(|kmh| round1(kmh * KMH_TO_MPH)),
        coolant_temp_f: frame.coolant_c.map(|c| round1(c * 9.0 / 5.0 + 32.0)),
        throttle_pct: frame.throttle_pct.map(round1),
        load_pct: frame.load_pct.map(round1),
        maf_gps: frame.maf_gps.map(round2),
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Single-threaded cooperative acquisition: one tick completes (including
/// reconnect handling) before the next begins.
pub struct Acquisition {
    cfg: AcquireConfig,
    source: Box<dyn SignalSource>,
    monitor: ConnectionMonitor,
}

impl Acquisition {
    pub fn new(cfg: AcquireConfig, source: Box<dyn SignalSource>) -> Self {
        let mut monitor = ConnectionMonitor::new(cfg.failure_threshold);
        monitor.begin_connect();
        Acquisition { cfg, source, monitor }
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Produce the reading for one tick. Never fails: a poll error yields
    /// an all-null reading and feeds the reconnect state machine.
    pub fn tick(&mut self) -> Reading {
        let now = Utc::now();
        match self.source.poll() {
            Ok(frame) => {
                self.monitor.record_success();
                map_frame(&frame, now)
            }
            Err(e) => {
                warn!("Poll failed ({}): {}", self.source.name(), e);
                if self.monitor.record_failure() {
                    warn!(
                        "{} consecutive poll failures, closing source and reconnecting",
                        self.monitor.consecutive_failures()
                    );
                    self.source.close();
                    self.source = source::probe(&self.cfg);
                    self.monitor.reconnected();
                    info!("Reconnect cycle complete (source={})", self.source.name());
                }
                Reading::empty(now)
            }
        }
    }

    pub fn close(&mut self) {
        self.source.close();
        self.monitor.state = ConnectionState::Disconnected;
    }
}

/// Drive the acquisition on a steady cadence until `shutdown` is raised.
///
/// Each tick writes one JSON line to `out` (the machine-readable data
/// stream; status lines go to the logger on stderr) and, when a client is
/// configured, POSTs the reading to the ingestion API. A failed POST is
/// logged and absorbed: the loop never crashes because the service is down,
/// and the next tick simply tries again (at-least-once delivery).
pub fn run_loop(
    acquisition: &mut Acquisition,
    client: Option<&IngestClient>,
    out: &mut impl Write,
    interval: Duration,
    shutdown: &AtomicBool,
) -> Result<(), String> {
    while !shutdown.load(Ordering::SeqCst) {
        let tick_start = Instant::now();

        let reading = acquisition.tick();
        let line = serde_json::to_string(&reading).map_err(|e| format!("serialize reading failed: {}", e))?;
        writeln!(out, "{}", line).map_err(|e| format!("data stream write failed: {}", e))?;
        out.flush().map_err(|e| format!("data stream flush failed: {}", e))?;

        if let Some(client) = client {
            if let Err(e) = client.post_reading(&reading) {
                warn!("Failed to send reading to API: {}", e);
            }
        }

        // Maintain steady cadence, but stay responsive to shutdown.
        while tick_start.elapsed() < interval {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            let remaining = interval.saturating_sub(tick_start.elapsed());
            thread::sleep(remaining.min(SHUTDOWN_POLL));
        }
    }

    acquisition.close();
    Ok(())
}
