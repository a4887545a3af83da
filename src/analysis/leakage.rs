use crate::error::AuditError;
use crate::layout::{DataLayout, FACT_TABLE, LEAKAGE_SUMMARY, TOP_PICKUPS_TABLE};
use crate::output::write_json;
use crate::stats::{pct, round2};
use crate::table::read_table;
use crate::zones::{FactRow, PickupLocationRow};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const TOP_LEAKAGE_LOCATIONS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakageLocation {
    pub pickup_loc: i32,
    pub trip_count: u64,
    pub trips_without_surcharge: u64,
    pub compliance_pct: f64,
}

/// Surcharge compliance of cross-border trips after the policy start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakageSummary {
    pub total_trips: u64,
    pub trips_with_surcharge: u64,
    pub trips_without_surcharge: u64,
    /// Percent of trips without a surcharge, rounded to 2 decimals.
    pub leakage_rate: f64,
    pub compliance_rate: f64,
    pub total_revenue_collected: f64,
    pub estimated_revenue_lost: f64,
    pub top_leakage_locations: Vec<LeakageLocation>,
}

/// Sums the fact rows that are after the policy start and cross the border.
pub fn summarize_leakage(rows: &[FactRow], assumed_surcharge: f64) -> LeakageSummary {
    let mut total_trips = 0;
    let mut with = 0;
    let mut without = 0;
    let mut collected = 0.0;

    for row in rows
        .iter()
        .filter(|r| r.after_policy_start && r.zone_category.crosses_border())
    {
        total_trips += row.trip_count;
        with += row.trips_with_surcharge;
        without += row.trips_without_surcharge;
        collected += row.total_surcharge_collected;
    }

    let leakage_rate = round2(pct(without, total_trips));
    LeakageSummary {
        total_trips,
        trips_with_surcharge: with,
        trips_without_surcharge: without,
        leakage_rate,
        compliance_rate: 100.0 - leakage_rate,
        total_revenue_collected: collected,
        estimated_revenue_lost: without as f64 * assumed_surcharge,
        top_leakage_locations: Vec::new(),
    }
}

/// The pickup locations with the most uncharged entering trips.
pub fn top_leakage_locations(pickups: &[PickupLocationRow], n: usize) -> Vec<LeakageLocation> {
    let mut ranked: Vec<&PickupLocationRow> = pickups.iter().collect();
    ranked.sort_by(|a, b| {
        b.trips_without_surcharge
            .cmp(&a.trips_without_surcharge)
            .then(a.pickup_loc.cmp(&b.pickup_loc))
    });
    ranked
        .into_iter()
        .take(n)
        .map(|p| LeakageLocation {
            pickup_loc: p.pickup_loc,
            trip_count: p.trip_count,
            trips_without_surcharge: p.trips_without_surcharge,
            compliance_pct: p.compliance_pct,
        })
        .collect()
}

/// Reads the fact table, computes the leakage summary and writes it as JSON.
///
/// The pickup ranking is optional input; without it the location list is empty.
#[tracing::instrument(skip(layout))]
pub fn analyze_leakage(layout: &DataLayout, assumed_surcharge: f64) -> Result<LeakageSummary> {
    let fact_path = layout.aggregated_path(FACT_TABLE);
    if !fact_path.exists() {
        return Err(AuditError::MissingArtifact(fact_path).into());
    }
    let facts: Vec<FactRow> = read_table(&fact_path)?;
    let mut summary = summarize_leakage(&facts, assumed_surcharge);

    if summary.total_trips == 0 {
        warn!("No cross-border trips after the policy start, leakage reported as 0");
    }

    let pickups_path = layout.aggregated_path(TOP_PICKUPS_TABLE);
    if pickups_path.exists() {
        let pickups: Vec<PickupLocationRow> = read_table(&pickups_path)?;
        summary.top_leakage_locations = top_leakage_locations(&pickups, TOP_LEAKAGE_LOCATIONS);
    } else {
        warn!(path = %pickups_path.display(), "Pickup ranking missing, no leakage locations");
    }

    info!(
        total_trips = summary.total_trips,
        trips_with_surcharge = summary.trips_with_surcharge,
        trips_without_surcharge = summary.trips_without_surcharge,
        leakage_rate = summary.leakage_rate,
        compliance_rate = summary.compliance_rate,
        revenue_collected = %format!("{:.2}", summary.total_revenue_collected),
        revenue_lost = %format!("{:.2}", summary.estimated_revenue_lost),
        "Leakage analysis"
    );
    for location in &summary.top_leakage_locations {
        info!(
            pickup_loc = location.pickup_loc,
            trips_without_surcharge = location.trips_without_surcharge,
            "Leakage hotspot"
        );
    }

    write_json(layout.aggregated_path(LEAKAGE_SUMMARY), &summary)?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::write_table;
    use crate::zones::ZoneCategory;
    use chrono::NaiveDate;

    fn fact(category: ZoneCategory, after: bool, count: u64, with: u64, without: u64) -> FactRow {
        FactRow {
            trip_date: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            zone_category: category,
            after_policy_start: after,
            trip_count: count,
            avg_fare: Some(15.0),
            avg_total: Some(20.0),
            avg_distance: Some(2.0),
            total_surcharge_collected: with as f64 * 2.5,
            avg_surcharge: 0.0,
            trips_with_surcharge: with,
            trips_without_surcharge: without,
        }
    }

    fn pickup(loc: i32, count: u64, without: u64) -> PickupLocationRow {
        PickupLocationRow {
            pickup_loc: loc,
            trip_count: count,
            avg_fare: Some(14.0),
            trips_with_surcharge: count - without,
            trips_without_surcharge: without,
            compliance_pct: round2(pct(count - without, count)),
        }
    }

    #[test]
    fn test_leakage_arithmetic() {
        let rows = vec![
            fact(ZoneCategory::EnteringZone, true, 600, 510, 90),
            fact(ZoneCategory::ExitingZone, true, 400, 340, 60),
            // Ignored: inside the zone, or before the policy.
            fact(ZoneCategory::InsideZone, true, 500, 0, 500),
            fact(ZoneCategory::EnteringZone, false, 300, 0, 300),
        ];

        let summary = summarize_leakage(&rows, 9.0);
        assert_eq!(summary.total_trips, 1000);
        assert_eq!(summary.trips_without_surcharge, 150);
        assert_eq!(summary.leakage_rate, 15.0);
        assert_eq!(summary.compliance_rate, 85.0);
        assert_eq!(summary.estimated_revenue_lost, 1350.0);
        assert_eq!(summary.total_revenue_collected, 850.0 * 2.5);
    }

    #[test]
    fn test_no_applicable_trips() {
        let rows = vec![fact(ZoneCategory::OutsideZone, true, 10, 0, 10)];
        let summary = summarize_leakage(&rows, 9.0);
        assert_eq!(summary.total_trips, 0);
        assert_eq!(summary.leakage_rate, 0.0);
        assert_eq!(summary.compliance_rate, 100.0);
    }

    #[test]
    fn test_top_locations_by_missing_surcharge() {
        let pickups = vec![
            pickup(7, 100, 5),
            pickup(3, 40, 30),
            pickup(9, 60, 30),
            pickup(12, 80, 10),
        ];
        let top: Vec<i32> = top_leakage_locations(&pickups, 3)
            .iter()
            .map(|l| l.pickup_loc)
            .collect();
        assert_eq!(top, vec![3, 9, 12]);
    }

    #[test]
    fn test_analyze_leakage_writes_summary() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());

        let err = analyze_leakage(&layout, 9.0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuditError>(),
            Some(AuditError::MissingArtifact(_))
        ));

        write_table(
            layout.aggregated_path(FACT_TABLE),
            &[fact(ZoneCategory::EnteringZone, true, 4, 3, 1)],
        )
        .unwrap();
        write_table(layout.aggregated_path(TOP_PICKUPS_TABLE), &[pickup(1, 4, 1)]).unwrap();

        let summary = analyze_leakage(&layout, 9.0).unwrap();
        assert_eq!(summary.leakage_rate, 25.0);
        assert_eq!(summary.top_leakage_locations.len(), 1);

        let on_disk: LeakageSummary = serde_json::from_str(
            &std::fs::read_to_string(layout.aggregated_path(LEAKAGE_SUMMARY)).unwrap(),
        )
        .unwrap();
        assert_eq!(on_disk, summary);
    }
}
