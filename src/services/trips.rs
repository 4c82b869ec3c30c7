//! Trip aggregation: pure math over the readings inside a trip window.
//!
//! Fuel use is estimated from mass air flow assuming stoichiometric
//! gasoline combustion; when no MAF samples exist the fuel and economy
//! fields stay null and the summary carries an explanatory note.

use chrono::{DateTime, Utc};

use crate::db::models::StoredReading;
use crate::models::telemetry::TripAggregates;

/// Stoichiometric air/fuel ratio for gasoline.
const AIR_FUEL_RATIO: f64 = 14.7;
/// Gasoline density in grams per milliliter.
const FUEL_DENSITY_G_PER_ML: f64 = 0.74;
const ML_PER_GALLON: f64 = 3785.41;

/// Longest gap between samples still integrated at face value. Gaps beyond
/// this (service restarts, adapter dropouts) are clamped so a one-hour hole
/// does not fabricate an hour of driving.
const MAX_SAMPLE_GAP_SECS: f64 = 5.0;
/// Credit for the first sample, which has no predecessor to measure against.
const NOMINAL_TICK_SECS: f64 = 1.0;

/// Summarize the readings of one trip window.
///
/// `readings` must be ascending by timestamp (the storage range query
/// guarantees this). Distance and fuel integrate sample-by-sample, each
/// sample weighted by the gap to its predecessor.
pub fn summarize(readings: &[StoredReading], started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> TripAggregates {
    let duration_seconds = (ended_at - started_at).num_seconds().max(0);
    let total_samples = readings.len() as i64;

    let mut distance_miles = 0.0;
    let mut fuel_grams = 0.0;
    let mut saw_maf = false;

    let mut speed_sum = 0.0;
    let mut speed_count = 0u64;
    let mut max_speed: Option<f64> = None;

    let mut throttle_sum = 0.0;
    let mut throttle_count = 0u64;

    let mut max_rpm: Option<i32> = None;
    let mut max_coolant: Option<f64> = None;

    let mut prev_ts: Option<DateTime<Utc>> = None;
    for reading in readings {
        let dt = match prev_ts {
            Some(prev) => {
                let gap = (reading.timestamp - prev).num_milliseconds() as f64 / 1000.0;
                gap.clamp(0.0, MAX_SAMPLE_GAP_SECS)
            }
            None => NOMINAL_TICK_SECS,
        };
        prev_ts = Some(reading.timestamp);

        if let Some(mph) = reading.speed_mph {
            distance_miles += mph * dt / 3600.0;
            speed_sum += mph;
            speed_count += 1;
            max_speed = Some(max_speed.map_or(mph, |m: f64| m.max(mph)));
        }
        if let Some(gps) = reading.maf_gps {
            fuel_grams += gps / AIR_FUEL_RATIO * dt;
            saw_maf = true;
        }
        if let Some(pct) = reading.throttle_pct {
            throttle_sum += pct;
            throttle_count += 1;
        }
        if let Some(rpm) = reading.rpm {
            max_rpm = Some(max_rpm.map_or(rpm, |m| m.max(rpm)));
        }
        if let Some(temp) = reading.coolant_temp_f {
            max_coolant = Some(max_coolant.map_or(temp, |m: f64| m.max(temp)));
        }
    }

    let fuel_used_gallons = if saw_maf {
        Some(fuel_grams / FUEL_DENSITY_G_PER_ML / ML_PER_GALLON)
    } else {
        None
    };
    let mpg_estimate = match fuel_used_gallons {
        Some(gallons) if gallons > 0.0 && distance_miles > 0.0 => Some(distance_miles / gallons),
        _ => None,
    };

    TripAggregates {
        duration_seconds,
        total_samples,
        total_distance_miles: round2(distance_miles),
        average_speed_mph: if speed_count > 0 {
            Some(round1(speed_sum / speed_count as f64))
        } else {
            None
        },
        max_speed_mph: max_speed,
        max_rpm,
        max_coolant_temp_f: max_coolant,
        average_throttle_pct: if throttle_count > 0 {
            Some(round1(throttle_sum / throttle_count as f64))
        } else {
            None
        },
        fuel_used_gallons: fuel_used_gallons.map(round3),
        mpg_estimate: mpg_estimate.map(round1),
        note: if saw_maf {
            None
        } else {
            Some("fuel estimate unavailable: no mass air flow samples".to_string())
        },
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}
