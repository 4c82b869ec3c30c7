//! Diesel model structs for persisted readings and trip sessions.
//!
//! Rows serialize straight to the public API JSON: a `StoredReading` is the
//! wire `Reading` plus its assigned row id.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::telemetry::Reading;
use crate::schema;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::readings)]
pub struct StoredReading {
    pub id: i32,
    pub timestamp: DateTime<Utc>,
    pub rpm: Option<i32>,
    pub speed_mph: Option<f64>,
    pub coolant_temp_f: Option<f64>,
    pub throttle_pct: Option<f64>,
    pub load_pct: Option<f64>,
    pub maf_gps: Option<f64>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::readings)]
pub struct NewReading {
    pub timestamp: DateTime<Utc>,
    pub rpm: Option<i32>,
    pub speed_mph: Option<f64>,
    pub coolant_temp_f: Option<f64>,
    pub throttle_pct: Option<f64>,
    pub load_pct: Option<f64>,
    pub maf_gps: Option<f64>,
}

impl From<&Reading> for NewReading {
    fn from(r: &Reading) -> Self {
        NewReading {
            timestamp: r.timestamp,
            rpm: r.rpm,
            speed_mph: r.speed_mph,
            coolant_temp_f: r.coolant_temp_f,
            throttle_pct: r.throttle_pct,
            load_pct: r.load_pct,
            maf_gps: r.maf_gps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::trips)]
pub struct Trip {
    pub id: i32,
    pub started_at: DateTime<Utc>,
    /// Null while the trip is active. At most one row is active at a time.
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::trips)]
pub struct NewTrip {
    pub started_at: DateTime<Utc>,
}
