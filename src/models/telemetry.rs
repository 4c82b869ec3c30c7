//! Wire-level telemetry types shared by the acquisition loop and the API.
//!
//! Scope: types only — no client/server code.
//!
//! Notes
//! - Every sensor field is independently nullable. A reading with all
//!   sensors null is still a valid reading: absence of data is itself a
//!   signal (engine off, adapter fault).
//! - Timestamps use `chrono` (`DateTime<Utc>`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripId(pub i32);

/// One sampled instant of vehicle telemetry.
///
/// This is the exact JSON shape the acquisition loop prints to stdout and
/// POSTs to `POST /readings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    /// Engine speed in revolutions per minute. 0 means "no rotation
    /// detected", not necessarily an error.
    #[serde(default)]
    pub rpm: Option<i32>,
    /// Vehicle speed in miles per hour.
    #[serde(default)]
    pub speed_mph: Option<f64>,
    /// Coolant temperature in degrees Fahrenheit.
    #[serde(default)]
    pub coolant_temp_f: Option<f64>,
    /// Throttle position, percent (0-100).
    #[serde(default)]
    pub throttle_pct: Option<f64>,
    /// Calculated engine load, percent (0-100).
    #[serde(default)]
    pub load_pct: Option<f64>,
    /// Mass air flow in grams per second.
    #[serde(default)]
    pub maf_gps: Option<f64>,
}

impl Reading {
    /// An all-null reading for a tick whose poll failed.
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Reading {
            timestamp,
            rpm: None,
            speed_mph: None,
            coolant_temp_f: None,
            throttle_pct: None,
            load_pct: None,
            maf_gps: None,
        }
    }
}

/// Aggregates derived from readings in a trip's time window.
///
/// Computed at query time, never stored. Field names follow the public
/// trip-summary JSON contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripAggregates {
    pub duration_seconds: i64,
    pub total_samples: i64,
    pub total_distance_miles: f64,
    pub average_speed_mph: Option<f64>,
    pub max_speed_mph: Option<f64>,
    pub max_rpm: Option<i32>,
    pub max_coolant_temp_f: Option<f64>,
    pub average_throttle_pct: Option<f64>,
    pub fuel_used_gallons: Option<f64>,
    pub mpg_estimate: Option<f64>,
    /// Set when fuel consumption could not be estimated (no MAF data).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A trip together with its computed aggregates. `trip_end` is null while
/// the trip is still active (live status view).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripSummary {
    pub trip_id: TripId,
    pub trip_start: DateTime<Utc>,
    pub trip_end: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub aggregates: TripAggregates,
}
