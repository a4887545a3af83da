//! Ghost trip rules: an ordered predicate table over metrics derived once per trip.

use crate::config::DetectionThresholds;
use crate::trip::TripRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GhostFlag {
    Clean,
    ExcessiveSpeed,
    ShortTripHighFare,
    ZeroDistancePositiveFare,
    NegativeDuration,
    NegativeFare,
}

impl GhostFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            GhostFlag::Clean => "clean",
            GhostFlag::ExcessiveSpeed => "excessive_speed",
            GhostFlag::ShortTripHighFare => "short_trip_high_fare",
            GhostFlag::ZeroDistancePositiveFare => "zero_distance_positive_fare",
            GhostFlag::NegativeDuration => "negative_duration",
            GhostFlag::NegativeFare => "negative_fare",
        }
    }

    pub fn is_ghost(&self) -> bool {
        *self != GhostFlag::Clean
    }
}

impl fmt::Display for GhostFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Duration and speed of a trip, computed once and shared by every rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripMetrics {
    pub duration_seconds: f64,
    /// Zero when the duration is not positive; null when the distance is null.
    pub speed_mph: Option<f64>,
}

impl TripMetrics {
    pub fn of(trip: &TripRecord) -> Self {
        let duration_seconds =
            (trip.dropoff_time - trip.pickup_time).num_milliseconds() as f64 / 1000.0;

        let speed_mph = if duration_seconds > 0.0 {
            trip.trip_distance
                .map(|miles| miles / (duration_seconds / 3600.0))
        } else {
            Some(0.0)
        };

        Self {
            duration_seconds,
            speed_mph,
        }
    }
}

type Predicate = fn(&TripRecord, &TripMetrics, &DetectionThresholds) -> bool;

pub struct Rule {
    pub flag: GhostFlag,
    pub matches: Predicate,
}

/// Evaluated top to bottom; the first match labels the trip.
/// Comparisons against a null field never match.
pub const RULES: &[Rule] = &[
    Rule {
        flag: GhostFlag::ExcessiveSpeed,
        matches: |_, m, t| m.speed_mph.is_some_and(|s| s > t.max_speed_mph),
    },
    Rule {
        flag: GhostFlag::ShortTripHighFare,
        matches: |trip, m, t| {
            m.duration_seconds < t.min_duration_seconds
                && trip.fare.is_some_and(|f| f > t.high_fare_threshold)
        },
    },
    Rule {
        flag: GhostFlag::ZeroDistancePositiveFare,
        matches: |trip, _, t| {
            trip.trip_distance.is_some_and(|d| d <= t.min_distance_miles)
                && trip.fare.is_some_and(|f| f > 0.0)
        },
    },
    Rule {
        flag: GhostFlag::NegativeDuration,
        matches: |_, m, _| m.duration_seconds <= 0.0,
    },
    Rule {
        flag: GhostFlag::NegativeFare,
        matches: |trip, _, _| {
            trip.fare.is_some_and(|f| f < 0.0) || trip.total_amount.is_some_and(|a| a < 0.0)
        },
    },
];

pub fn classify(trip: &TripRecord, metrics: &TripMetrics, thresholds: &DetectionThresholds) -> GhostFlag {
    RULES
        .iter()
        .find(|rule| (rule.matches)(trip, metrics, thresholds))
        .map(|rule| rule.flag)
        .unwrap_or(GhostFlag::Clean)
}
