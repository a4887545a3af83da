//! Congestion zone membership and trip classification.
//!
//! Every clean trip falls into exactly one [`ZoneCategory`] based on whether
//! its pickup and dropoff zones are members of the congestion zone set, and
//! is tagged as before or after the policy start. The result is a daily fact
//! table plus a ranking of the pickup locations feeding the zone.

pub mod classify;
pub mod membership;
pub mod patterns;

pub use classify::{CategorySummary, FactRow, ZoneCategory, ZoneStats, classify_trips};
pub use membership::CongestionZones;
pub use patterns::{PickupLocationRow, analyze_zone_patterns};
