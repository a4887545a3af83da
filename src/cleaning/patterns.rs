use crate::cleaning::detector::GhostTripRecord;
use crate::cleaning::rules::GhostFlag;
use crate::layout::{DataLayout, GHOST_PATTERNS_TABLE};
use crate::stats::Mean;
use crate::table::{TableRow, scan, write_table};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// One line of the cross-file ghost trip report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostPatternRow {
    pub ghost_flag: GhostFlag,
    pub count: u64,
    pub avg_speed_mph: Option<f64>,
    pub avg_fare: Option<f64>,
    pub avg_distance: Option<f64>,
    pub avg_duration_seconds: Option<f64>,
}

impl TableRow for GhostPatternRow {
    const COLUMNS: &'static [&'static str] = &[
        "ghost_flag",
        "count",
        "avg_speed_mph",
        "avg_fare",
        "avg_distance",
        "avg_duration_seconds",
    ];
}

#[derive(Default)]
struct PatternAccumulator {
    count: u64,
    speed: Mean,
    fare: Mean,
    distance: Mean,
    duration: Mean,
}

/// Aggregates every ghost audit file by flag, most frequent first, and writes
/// the result to the aggregated directory. Without ghost files nothing is written.
#[tracing::instrument(skip_all)]
pub fn analyze_ghost_patterns(layout: &DataLayout) -> Result<Vec<GhostPatternRow>> {
    let files = layout.ghost_files()?;
    if files.is_empty() {
        warn!("No ghost trip files found");
        return Ok(Vec::new());
    }

    let mut by_flag: BTreeMap<GhostFlag, PatternAccumulator> = BTreeMap::new();
    for (path, _) in &files {
        scan(path, |ghost: GhostTripRecord| {
            let acc = by_flag.entry(ghost.ghost_flag).or_default();
            acc.count += 1;
            acc.speed.push(ghost.speed_mph);
            acc.fare.push(ghost.fare);
            acc.distance.push(ghost.trip_distance);
            acc.duration.push(Some(ghost.duration_seconds));
            Ok(())
        })?;
    }

    let mut rows: Vec<GhostPatternRow> = by_flag
        .into_iter()
        .map(|(flag, acc)| GhostPatternRow {
            ghost_flag: flag,
            count: acc.count,
            avg_speed_mph: acc.speed.value(),
            avg_fare: acc.fare.value(),
            avg_distance: acc.distance.value(),
            avg_duration_seconds: acc.duration.value(),
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then(a.ghost_flag.cmp(&b.ghost_flag)));

    for row in &rows {
        info!(
            flag = %row.ghost_flag,
            count = row.count,
            avg_speed_mph = row.avg_speed_mph.unwrap_or_default(),
            avg_fare = row.avg_fare.unwrap_or_default(),
            avg_distance = row.avg_distance.unwrap_or_default(),
            "Ghost pattern"
        );
    }

    write_table(layout.aggregated_path(GHOST_PATTERNS_TABLE), &rows)?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaning::detector::clean_all;
    use crate::config::DetectionThresholds;
    use crate::layout::TripFile;
    use crate::table::read_table;
    use crate::trip::{Provider, TripRecord};
    use chrono::{Duration, NaiveDateTime};

    fn trip(duration_secs: i64, distance: f64, fare: f64) -> TripRecord {
        let pickup: NaiveDateTime = "2024-03-01T07:00:00".parse().unwrap();
        TripRecord {
            pickup_time: pickup,
            dropoff_time: pickup + Duration::seconds(duration_secs),
            pickup_loc: 79,
            dropoff_loc: 234,
            trip_distance: Some(distance),
            fare: Some(fare),
            total_amount: Some(fare),
            congestion_surcharge: None,
        }
    }

    #[test]
    fn test_patterns_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.create_dirs().unwrap();

        write_table(
            layout.unified_path(&TripFile::new(Provider::Yellow, 2024, 3)),
            &[trip(600, 0.0, 8.0), trip(600, 0.0, 12.0), trip(-10, 1.0, 5.0)],
        )
        .unwrap();
        write_table(
            layout.unified_path(&TripFile::new(Provider::Green, 2024, 3)),
            &[trip(600, 0.0, 10.0), trip(900, 3.0, 14.0)],
        )
        .unwrap();
        clean_all(&layout, &DetectionThresholds::default(), false).unwrap();

        let rows = analyze_ghost_patterns(&layout).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ghost_flag, GhostFlag::ZeroDistancePositiveFare);
        assert_eq!(rows[0].count, 3);
        assert_eq!(rows[0].avg_fare, Some(10.0));
        assert_eq!(rows[0].avg_duration_seconds, Some(600.0));
        assert_eq!(rows[1].ghost_flag, GhostFlag::NegativeDuration);

        let written: Vec<GhostPatternRow> =
            read_table(layout.aggregated_path(GHOST_PATTERNS_TABLE)).unwrap();
        assert_eq!(written, rows);
    }

    #[test]
    fn test_no_ghost_files_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        assert!(analyze_ghost_patterns(&layout).unwrap().is_empty());
        assert!(!layout.aggregated_path(GHOST_PATTERNS_TABLE).exists());
    }
}
