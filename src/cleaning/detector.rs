use crate::cleaning::rules::{GhostFlag, TripMetrics, classify};
use crate::config::DetectionThresholds;
use crate::error::AuditError;
use crate::layout::DataLayout;
use crate::stats::{FileCounts, Mean, pct};
use crate::table::{TableRow, TableWriter, scan};
use crate::trip::TripRecord;
use anyhow::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info, warn};

/// A flagged trip as written to the audit stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostTripRecord {
    pub pickup_time: NaiveDateTime,
    pub dropoff_time: NaiveDateTime,
    pub pickup_loc: i32,
    pub dropoff_loc: i32,
    pub trip_distance: Option<f64>,
    pub fare: Option<f64>,
    pub total_amount: Option<f64>,
    pub congestion_surcharge: Option<f64>,
    pub duration_seconds: f64,
    pub speed_mph: Option<f64>,
    pub ghost_flag: GhostFlag,
    pub source_file: String,
}

impl TableRow for GhostTripRecord {
    const COLUMNS: &'static [&'static str] = &[
        "pickup_time",
        "dropoff_time",
        "pickup_loc",
        "dropoff_loc",
        "trip_distance",
        "fare",
        "total_amount",
        "congestion_surcharge",
        "duration_seconds",
        "speed_mph",
        "ghost_flag",
        "source_file",
    ];
}

impl GhostTripRecord {
    fn new(trip: TripRecord, metrics: TripMetrics, flag: GhostFlag, source_file: &str) -> Self {
        Self {
            pickup_time: trip.pickup_time,
            dropoff_time: trip.dropoff_time,
            pickup_loc: trip.pickup_loc,
            dropoff_loc: trip.dropoff_loc,
            trip_distance: trip.trip_distance,
            fare: trip.fare,
            total_amount: trip.total_amount,
            congestion_surcharge: trip.congestion_surcharge,
            duration_seconds: metrics.duration_seconds,
            speed_mph: metrics.speed_mph,
            ghost_flag: flag,
            source_file: source_file.to_string(),
        }
    }
}

/// Averages for the trips carrying one flag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FlagStats {
    pub count: u64,
    pub avg_speed_mph: Option<f64>,
    pub avg_fare: Option<f64>,
    pub avg_distance: Option<f64>,
}

#[derive(Debug, Default)]
struct FlagAccumulator {
    count: u64,
    speed: Mean,
    fare: Mean,
    distance: Mean,
}

impl FlagAccumulator {
    fn push(&mut self, trip: &TripRecord, metrics: &TripMetrics) {
        self.count += 1;
        self.speed.push(metrics.speed_mph);
        self.fare.push(trip.fare);
        self.distance.push(trip.trip_distance);
    }

    fn finish(&self) -> FlagStats {
        FlagStats {
            count: self.count,
            avg_speed_mph: self.speed.value(),
            avg_fare: self.fare.value(),
            avg_distance: self.distance.value(),
        }
    }
}

/// Per-flag statistics for one detected file.
#[derive(Debug, Default, Serialize)]
pub struct DetectionStats {
    pub flags: BTreeMap<GhostFlag, FlagStats>,
}

impl DetectionStats {
    pub fn total(&self) -> u64 {
        self.flags.values().map(|s| s.count).sum()
    }

    pub fn clean(&self) -> u64 {
        self.flags.get(&GhostFlag::Clean).map_or(0, |s| s.count)
    }

    pub fn ghost(&self) -> u64 {
        self.total() - self.clean()
    }
}

/// Splits a unified file into its clean stream and its ghost audit stream.
///
/// Every input row lands in exactly one of the two outputs. The ghost stream
/// is committed before the clean one, so an existing clean file implies its
/// audit file exists too.
#[tracing::instrument(skip_all, fields(input = %input.display()))]
pub fn detect_file(
    input: &Path,
    clean_out: &Path,
    ghost_out: &Path,
    thresholds: &DetectionThresholds,
) -> Result<DetectionStats> {
    let source_file = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut clean = TableWriter::<TripRecord>::create(clean_out)?;
    let mut ghost = TableWriter::<GhostTripRecord>::create(ghost_out)?;
    let mut accumulators: BTreeMap<GhostFlag, FlagAccumulator> = BTreeMap::new();

    scan(input, |trip: TripRecord| {
        let metrics = TripMetrics::of(&trip);
        let flag = classify(&trip, &metrics, thresholds);
        accumulators.entry(flag).or_default().push(&trip, &metrics);

        if flag.is_ghost() {
            ghost.write(&GhostTripRecord::new(trip, metrics, flag, &source_file))
        } else {
            clean.write(&trip)
        }
    })?;

    ghost.finish()?;
    clean.finish()?;

    let stats = DetectionStats {
        flags: accumulators
            .iter()
            .map(|(flag, acc)| (*flag, acc.finish()))
            .collect(),
    };

    let total = stats.total();
    info!(
        total,
        clean = stats.clean(),
        ghost = stats.ghost(),
        ghost_pct = %format!("{:.2}", pct(stats.ghost(), total)),
        "Ghost detection done"
    );
    for (flag, flag_stats) in stats.flags.iter().filter(|(f, _)| f.is_ghost()) {
        warn!(%flag, count = flag_stats.count, "Ghost trips flagged");
    }

    Ok(stats)
}

#[derive(Debug, Default, Serialize)]
pub struct CleanStats {
    pub files: FileCounts,
    pub total_trips: u64,
    pub clean_trips: u64,
    pub ghost_trips: u64,
    pub ghost_types: BTreeMap<GhostFlag, u64>,
}

impl CleanStats {
    pub fn ghost_rate(&self) -> f64 {
        pct(self.ghost_trips, self.total_trips)
    }
}

/// Runs ghost detection over every unified file.
///
/// Files whose clean output exists are skipped unless `force` is set. Trip
/// counts cover the files processed in this run only.
#[tracing::instrument(skip(layout, thresholds), fields(root = %layout.root().display()))]
pub fn clean_all(layout: &DataLayout, thresholds: &DetectionThresholds, force: bool) -> Result<CleanStats> {
    layout.create_dirs()?;
    let unified = layout.unified_files()?;
    if unified.is_empty() {
        return Err(AuditError::NoInputFiles(layout.unified_dir()).into());
    }

    let mut stats = CleanStats::default();

    for (input, file) in unified {
        let clean_out = layout.clean_path(&file);
        if clean_out.exists() && !force {
            info!(file = %file, "Skipping, already cleaned");
            stats.files.skipped += 1;
            continue;
        }

        match detect_file(&input, &clean_out, &layout.ghost_path(&file), thresholds) {
            Ok(file_stats) => {
                stats.files.processed += 1;
                for (flag, flag_stats) in &file_stats.flags {
                    stats.total_trips += flag_stats.count;
                    if flag.is_ghost() {
                        stats.ghost_trips += flag_stats.count;
                        *stats.ghost_types.entry(*flag).or_default() += flag_stats.count;
                    } else {
                        stats.clean_trips += flag_stats.count;
                    }
                }
            }
            Err(e) => {
                error!(file = %file, error = %e, "Failed to detect ghost trips");
                stats.files.failed += 1;
            }
        }
    }

    info!(
        processed = stats.files.processed,
        skipped = stats.files.skipped,
        failed = stats.files.failed,
        total_trips = stats.total_trips,
        clean_trips = stats.clean_trips,
        ghost_trips = stats.ghost_trips,
        ghost_rate = %format!("{:.2}", stats.ghost_rate()),
        "Ghost detection summary"
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TripFile;
    use crate::table::{read_table, write_table};
    use crate::trip::Provider;
    use chrono::Duration;

    fn trip(duration_secs: i64, distance: f64, fare: f64) -> TripRecord {
        let pickup: NaiveDateTime = "2024-01-10T12:00:00".parse().unwrap();
        TripRecord {
            pickup_time: pickup,
            dropoff_time: pickup + Duration::seconds(duration_secs),
            pickup_loc: 161,
            dropoff_loc: 236,
            trip_distance: Some(distance),
            fare: Some(fare),
            total_amount: Some(fare + 5.0),
            congestion_surcharge: Some(2.5),
        }
    }

    fn sample_trips() -> Vec<TripRecord> {
        vec![
            trip(900, 3.0, 15.0),  // clean
            trip(1800, 6.0, 18.0), // clean
            trip(60, 5.0, 30.0),   // 300 mph
            trip(30, 0.2, 25.0),   // short, expensive
            trip(600, 0.0, 9.0),   // zero distance
            trip(-5, 10.0, 15.0),  // negative duration
            trip(600, 2.0, -7.0),  // negative fare
        ]
    }

    #[test]
    fn test_partition_is_complete_and_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("yellow_unified_2024-01.csv.gz");
        let clean_out = dir.path().join("yellow_clean_2024-01.csv.gz");
        let ghost_out = dir.path().join("yellow_ghost_2024-01.csv.gz");
        let trips = sample_trips();
        write_table(&input, &trips).unwrap();

        let stats =
            detect_file(&input, &clean_out, &ghost_out, &DetectionThresholds::default()).unwrap();

        let clean: Vec<TripRecord> = read_table(&clean_out).unwrap();
        let ghosts: Vec<GhostTripRecord> = read_table(&ghost_out).unwrap();

        assert_eq!(clean.len() + ghosts.len(), trips.len());
        assert_eq!(stats.total(), trips.len() as u64);
        assert_eq!(stats.clean(), 2);
        assert_eq!(stats.ghost(), 5);
        assert!(clean.iter().all(|c| trips[..2].contains(c)));

        let flags: Vec<GhostFlag> = ghosts.iter().map(|g| g.ghost_flag).collect();
        assert_eq!(
            flags,
            vec![
                GhostFlag::ExcessiveSpeed,
                GhostFlag::ShortTripHighFare,
                GhostFlag::ZeroDistancePositiveFare,
                GhostFlag::NegativeDuration,
                GhostFlag::NegativeFare,
            ]
        );
        assert!(ghosts.iter().all(|g| g.source_file == "yellow_unified_2024-01.csv.gz"));
        assert_eq!(ghosts[0].duration_seconds, 60.0);
        assert!((ghosts[0].speed_mph.unwrap() - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_flag_averages() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.csv.gz");
        write_table(&input, &sample_trips()).unwrap();

        let stats = detect_file(
            &input,
            &dir.path().join("clean.csv.gz"),
            &dir.path().join("ghost.csv.gz"),
            &DetectionThresholds::default(),
        )
        .unwrap();

        let clean = stats.flags[&GhostFlag::Clean];
        assert_eq!(clean.count, 2);
        assert_eq!(clean.avg_fare, Some(16.5));
        assert_eq!(clean.avg_distance, Some(4.5));
        assert_eq!(clean.avg_speed_mph, Some(12.0));
    }

    #[test]
    fn test_clean_all_skips_cleaned_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.create_dirs().unwrap();
        let file = TripFile::new(Provider::Green, 2024, 2);
        write_table(layout.unified_path(&file), &sample_trips()).unwrap();

        let first = clean_all(&layout, &DetectionThresholds::default(), false).unwrap();
        assert_eq!(first.files.processed, 1);
        assert_eq!(first.total_trips, 7);
        assert_eq!(first.clean_trips + first.ghost_trips, first.total_trips);
        assert_eq!(first.ghost_types[&GhostFlag::NegativeDuration], 1);
        assert!(layout.ghost_path(&file).exists());

        let second = clean_all(&layout, &DetectionThresholds::default(), false).unwrap();
        assert_eq!(second.files.skipped, 1);
        assert_eq!(second.files.completed(), 1);

        let forced = clean_all(&layout, &DetectionThresholds::default(), true).unwrap();
        assert_eq!(forced.files.processed, 1);
    }

    #[test]
    fn test_clean_all_without_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let err = clean_all(&layout, &DetectionThresholds::default(), false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuditError>(),
            Some(AuditError::NoInputFiles(_))
        ));
    }
}
