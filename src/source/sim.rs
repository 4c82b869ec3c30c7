//! Simulated signal source.
//!
//! Synthesizes plausible idle-to-city driving values from time-based
//! periodic functions. Output is a pure function of the wall-clock second,
//! so a run is reproducible for a given start time. Converted bands:
//! RPM 750-1100, speed 0-45 mph, coolant 180-190 F, throttle 0-25 %,
//! load 5-25 %, MAF 2-8 g/s.

use chrono::Utc;

use super::{RawFrame, ReadError, SignalSource};

// Raw-unit carriers chosen so the normalized reading lands in the
// documented bands (speed is km/h, coolant is °C at this layer).
const SPEED_CENTER_KMH: f64 = 22.5 / 0.621371;
const COOLANT_CENTER_C: f64 = (185.0 - 32.0) * 5.0 / 9.0;
const COOLANT_SWING_C: f64 = 5.0 * 5.0 / 9.0;

pub struct SimulatedSource {
    closed: bool,
}

impl SimulatedSource {
    pub fn new() -> Self {
        SimulatedSource { closed: false }
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalSource for SimulatedSource {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn poll(&mut self) -> Result<RawFrame, ReadError> {
        if self.closed {
            return Err(ReadError::Closed);
        }
        Ok(frame_at(Utc::now().timestamp() as f64))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Raw frame for an absolute unix time `t` in seconds.
pub fn frame_at(t: f64) -> RawFrame {
    RawFrame {
        // Idle fluctuation between 750 and 1100 rpm.
        rpm: Some(925.0 + 175.0 * (t * 0.5).sin()),
        // Slow oscillation covering 0-45 mph once converted.
        speed_kmh: Some(SPEED_CENTER_KMH + SPEED_CENTER_KMH * (t * 0.2).sin()),
        // Warm engine with slight variation, 180-190 F converted.
        coolant_c: Some(COOLANT_CENTER_C + COOLANT_SWING_C * (t * 0.1).sin()),
        // Gentle throttle 0-25 %.
        throttle_pct: Some(12.5 + 12.5 * (t * 0.7).sin()),
        // Load correlates with throttle, 5-25 %.
        load_pct: Some(15.0 + 10.0 * (t * 0.7).sin()),
        // MAF correlates with rpm, 2-8 g/s.
        maf_gps: Some(5.0 + 3.0 * (t * 0.5).sin()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KMH_TO_MPH: f64 = 0.621371;

    #[test]
    fn frames_stay_within_documented_bands() {
        let mut t = 0.0f64;
        while t < 3600.0 {
            let frame = frame_at(t);
            let rpm = frame.rpm.unwrap();
            assert!((750.0..=1100.0).contains(&rpm), "rpm {} out of band at t={}", rpm, t);

            let mph = frame.speed_kmh.unwrap() * KMH_TO_MPH;
            assert!((-0.01..=45.01).contains(&mph), "speed {} mph out of band at t={}", mph, t);

            let coolant_f = frame.coolant_c.unwrap() * 9.0 / 5.0 + 32.0;
            assert!(
                (179.9..=190.1).contains(&coolant_f),
                "coolant {} F out of band at t={}",
                coolant_f,
                t
            );

            let throttle = frame.throttle_pct.unwrap();
            assert!((-0.01..=25.01).contains(&throttle), "throttle {} out of band", throttle);

            let load = frame.load_pct.unwrap();
            assert!((4.99..=25.01).contains(&load), "load {} out of band", load);

            let maf = frame.maf_gps.unwrap();
            assert!((1.99..=8.01).contains(&maf), "maf {} out of band", maf);

            t += 7.3;
        }
    }

    #[test]
    fn frames_are_deterministic_per_instant() {
        assert_eq!(frame_at(1234.0), frame_at(1234.0));
        assert_ne!(frame_at(1234.0), frame_at(1239.0));
    }

    #[test]
    fn poll_after_close_reports_closed() {
        let mut source = SimulatedSource::new();
        assert!(source.poll().is_ok());
        source.close();
        assert!(matches!(source.poll(), Err(ReadError::Closed)));
    }
}
