use crate::layout::{DataLayout, TOP_PICKUPS_TABLE};
use crate::stats::{Mean, pct, round2};
use crate::table::{TableRow, scan, write_table};
use crate::trip::TripRecord;
use crate::zones::classify::ZoneCategory;
use crate::zones::membership::CongestionZones;
use anyhow::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// Surcharge compliance for trips entering the zone from one pickup location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickupLocationRow {
    pub pickup_loc: i32,
    pub trip_count: u64,
    pub avg_fare: Option<f64>,
    pub trips_with_surcharge: u64,
    pub trips_without_surcharge: u64,
    pub compliance_pct: f64,
}

impl TableRow for PickupLocationRow {
    const COLUMNS: &'static [&'static str] = &[
        "pickup_loc",
        "trip_count",
        "avg_fare",
        "trips_with_surcharge",
        "trips_without_surcharge",
        "compliance_pct",
    ];
}

#[derive(Default)]
struct PickupAccumulator {
    count: u64,
    fare: Mean,
    with_surcharge: u64,
    without_surcharge: u64,
}

/// Ranks pickup locations of entering-zone trips on or after `effective_date`
/// by trip count (ties by zone id) and keeps the first `limit`.
#[tracing::instrument(skip(layout, zones))]
pub fn analyze_zone_patterns(
    layout: &DataLayout,
    zones: &CongestionZones,
    effective_date: NaiveDateTime,
    limit: usize,
) -> Result<Vec<PickupLocationRow>> {
    let mut by_pickup: HashMap<i32, PickupAccumulator> = HashMap::new();

    for (path, _) in layout.clean_files()? {
        scan(&path, |trip: TripRecord| {
            if trip.pickup_time < effective_date
                || ZoneCategory::of(&trip, zones) != ZoneCategory::EnteringZone
            {
                return Ok(());
            }
            let acc = by_pickup.entry(trip.pickup_loc).or_default();
            acc.count += 1;
            acc.fare.push(trip.fare);
            if trip.has_surcharge() {
                acc.with_surcharge += 1;
            } else if trip.lacks_surcharge() {
                acc.without_surcharge += 1;
            }
            Ok(())
        })?;
    }

    let mut rows: Vec<PickupLocationRow> = by_pickup
        .into_iter()
        .map(|(pickup_loc, acc)| PickupLocationRow {
            pickup_loc,
            trip_count: acc.count,
            avg_fare: acc.fare.value(),
            trips_with_surcharge: acc.with_surcharge,
            trips_without_surcharge: acc.without_surcharge,
            compliance_pct: round2(pct(acc.with_surcharge, acc.count)),
        })
        .collect();
    rows.sort_by(|a, b| {
        b.trip_count
            .cmp(&a.trip_count)
            .then(a.pickup_loc.cmp(&b.pickup_loc))
    });
    rows.truncate(limit);

    write_table(layout.aggregated_path(TOP_PICKUPS_TABLE), &rows)?;
    info!(locations = rows.len(), "Top entering pickup locations written");
    Ok(rows)
}
