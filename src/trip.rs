//! The canonical trip record and the providers it comes from.

use crate::table::TableRow;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// TLC zone ids run from 1 to 264; 265 is "unknown" and never part of a zone set.
pub const MAX_ZONE_ID: i32 = 264;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Yellow,
    Green,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Yellow, Provider::Green];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Yellow => "yellow",
            Provider::Green => "green",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yellow" => Ok(Provider::Yellow),
            "green" => Ok(Provider::Green),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// Column names of the canonical schema, in file order.
pub const CANONICAL_COLUMNS: &[&str] = &[
    "pickup_time",
    "dropoff_time",
    "pickup_loc",
    "dropoff_loc",
    "trip_distance",
    "fare",
    "total_amount",
    "congestion_surcharge",
];

/// One trip in the canonical schema shared by every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    pub pickup_time: NaiveDateTime,
    pub dropoff_time: NaiveDateTime,
    pub pickup_loc: i32,
    pub dropoff_loc: i32,
    pub trip_distance: Option<f64>,
    pub fare: Option<f64>,
    pub total_amount: Option<f64>,
    pub congestion_surcharge: Option<f64>,
}

impl TableRow for TripRecord {
    const COLUMNS: &'static [&'static str] = CANONICAL_COLUMNS;
}

impl TripRecord {
    /// Surcharge with null read as zero.
    pub fn surcharge_or_zero(&self) -> f64 {
        self.congestion_surcharge.unwrap_or(0.0)
    }

    pub fn has_surcharge(&self) -> bool {
        self.congestion_surcharge.is_some_and(|s| s > 0.0)
    }

    /// Null or exactly zero. Negative surcharges are neither charged nor uncharged.
    pub fn lacks_surcharge(&self) -> bool {
        self.congestion_surcharge.is_none_or(|s| s == 0.0)
    }
}
