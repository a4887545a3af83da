use crate::error::AuditError;
use crate::layout::{DataLayout, FACT_TABLE};
use crate::stats::Mean;
use crate::table::{TableRow, TableWriter, scan};
use crate::trip::TripRecord;
use crate::zones::membership::CongestionZones;
use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

/// Where a trip starts and ends relative to the congestion zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneCategory {
    InsideZone,
    EnteringZone,
    ExitingZone,
    OutsideZone,
}

impl ZoneCategory {
    pub const ALL: [ZoneCategory; 4] = [
        ZoneCategory::InsideZone,
        ZoneCategory::EnteringZone,
        ZoneCategory::ExitingZone,
        ZoneCategory::OutsideZone,
    ];

    pub fn from_membership(pickup_in_zone: bool, dropoff_in_zone: bool) -> Self {
        match (pickup_in_zone, dropoff_in_zone) {
            (true, true) => ZoneCategory::InsideZone,
            (false, true) => ZoneCategory::EnteringZone,
            (true, false) => ZoneCategory::ExitingZone,
            (false, false) => ZoneCategory::OutsideZone,
        }
    }

    pub fn of(trip: &TripRecord, zones: &CongestionZones) -> Self {
        Self::from_membership(zones.contains(trip.pickup_loc), zones.contains(trip.dropoff_loc))
    }

    /// Entering or exiting: the trips that should carry a surcharge.
    pub fn crosses_border(&self) -> bool {
        matches!(self, ZoneCategory::EnteringZone | ZoneCategory::ExitingZone)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneCategory::InsideZone => "inside_zone",
            ZoneCategory::EnteringZone => "entering_zone",
            ZoneCategory::ExitingZone => "exiting_zone",
            ZoneCategory::OutsideZone => "outside_zone",
        }
    }
}

impl fmt::Display for ZoneCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the zone fact table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    pub trip_date: NaiveDate,
    pub zone_category: ZoneCategory,
    pub after_policy_start: bool,
    pub trip_count: u64,
    pub avg_fare: Option<f64>,
    pub avg_total: Option<f64>,
    pub avg_distance: Option<f64>,
    pub total_surcharge_collected: f64,
    pub avg_surcharge: f64,
    pub trips_with_surcharge: u64,
    pub trips_without_surcharge: u64,
}

impl TableRow for FactRow {
    const COLUMNS: &'static [&'static str] = &[
        "trip_date",
        "zone_category",
        "after_policy_start",
        "trip_count",
        "avg_fare",
        "avg_total",
        "avg_distance",
        "total_surcharge_collected",
        "avg_surcharge",
        "trips_with_surcharge",
        "trips_without_surcharge",
    ];
}

type FactKey = (NaiveDate, ZoneCategory, bool);

#[derive(Default)]
struct FactAccumulator {
    count: u64,
    fare: Mean,
    total: Mean,
    distance: Mean,
    surcharge: Mean,
    with_surcharge: u64,
    without_surcharge: u64,
}

impl FactAccumulator {
    fn push(&mut self, trip: &TripRecord) {
        self.count += 1;
        self.fare.push(trip.fare);
        self.total.push(trip.total_amount);
        self.distance.push(trip.trip_distance);
        self.surcharge.push(Some(trip.surcharge_or_zero()));
        if trip.has_surcharge() {
            self.with_surcharge += 1;
        } else if trip.lacks_surcharge() {
            self.without_surcharge += 1;
        }
    }

    fn into_row(self, (trip_date, zone_category, after_policy_start): FactKey) -> FactRow {
        FactRow {
            trip_date,
            zone_category,
            after_policy_start,
            trip_count: self.count,
            avg_fare: self.fare.value(),
            avg_total: self.total.value(),
            avg_distance: self.distance.value(),
            total_surcharge_collected: self.surcharge.sum(),
            avg_surcharge: self.surcharge.value().unwrap_or(0.0),
            trips_with_surcharge: self.with_surcharge,
            trips_without_surcharge: self.without_surcharge,
        }
    }
}

/// Trip count and average surcharge for one category on one side of the policy date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySummary {
    pub zone_category: ZoneCategory,
    pub after_policy_start: bool,
    pub trip_count: u64,
    pub avg_surcharge: f64,
}

#[derive(Debug, Default, Serialize)]
pub struct ZoneStats {
    pub skipped: bool,
    pub files: usize,
    pub trips: u64,
    pub fact_rows: u64,
    pub summary: Vec<CategorySummary>,
}

/// Builds the fact table from every clean trip file.
///
/// Rows are keyed by pickup date, category and policy period and written in
/// key order, so identical inputs give an identical table.
#[tracing::instrument(skip(layout, zones), fields(zones = zones.len()))]
pub fn classify_trips(
    layout: &DataLayout,
    zones: &CongestionZones,
    effective_date: NaiveDateTime,
    force: bool,
) -> Result<ZoneStats> {
    let output = layout.aggregated_path(FACT_TABLE);
    if output.exists() && !force {
        info!(path = %output.display(), "Skipping, fact table already built");
        return Ok(ZoneStats {
            skipped: true,
            ..ZoneStats::default()
        });
    }

    let files = layout.clean_files()?;
    if files.is_empty() {
        return Err(AuditError::NoInputFiles(layout.unified_dir()).into());
    }

    let mut facts: BTreeMap<FactKey, FactAccumulator> = BTreeMap::new();
    let mut periods: BTreeMap<(ZoneCategory, bool), (u64, Mean)> = BTreeMap::new();
    let mut trips = 0;

    for (path, file) in &files {
        let rows = scan(path, |trip: TripRecord| {
            let category = ZoneCategory::of(&trip, zones);
            let after = trip.pickup_time >= effective_date;

            facts
                .entry((trip.pickup_time.date(), category, after))
                .or_default()
                .push(&trip);

            let (count, surcharge) = periods.entry((category, after)).or_default();
            *count += 1;
            surcharge.push(Some(trip.surcharge_or_zero()));
            Ok(())
        })?;
        info!(file = %file, trips = rows, "Classified");
        trips += rows;
    }

    let mut writer = TableWriter::<FactRow>::create(&output)?;
    for (key, acc) in facts {
        writer.write(&acc.into_row(key))?;
    }
    let fact_rows = writer.finish()?;

    let summary: Vec<CategorySummary> = periods
        .into_iter()
        .map(|((zone_category, after_policy_start), (trip_count, surcharge))| CategorySummary {
            zone_category,
            after_policy_start,
            trip_count,
            avg_surcharge: surcharge.value().unwrap_or(0.0),
        })
        .collect();

    for row in &summary {
        info!(
            category = %row.zone_category,
            period = if row.after_policy_start { "after" } else { "before" },
            trip_count = row.trip_count,
            avg_surcharge = %format!("{:.2}", row.avg_surcharge),
            "Trip classification"
        );
    }

    Ok(ZoneStats {
        skipped: false,
        files: files.len(),
        trips,
        fact_rows,
        summary,
    })
}
