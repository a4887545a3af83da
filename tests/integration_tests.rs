use congestion_audit::analysis::{ComparisonRow, LeakageSummary};
use congestion_audit::config::{AuditConfig, ZoneSource};
use congestion_audit::imputation::ImputedDailyStat;
use congestion_audit::layout::{
    COMPARISON_TABLE, DataLayout, FACT_TABLE, GHOST_PATTERNS_TABLE, LEAKAGE_SUMMARY,
    TOP_PICKUPS_TABLE,
};
use congestion_audit::pipeline::{Pipeline, Stage, StageStatus, all_succeeded};
use congestion_audit::publish::{DEFAULT_PREFIX, LocalPublisher, publish_artifacts};
use congestion_audit::table::read_table;
use congestion_audit::trip::Provider;
use congestion_audit::zones::{FactRow, ZoneCategory};
use std::fs;
use std::path::Path;

const YELLOW_HEADER: &str = "VendorID,tpep_pickup_datetime,tpep_dropoff_datetime,passenger_count,trip_distance,RatecodeID,PULocationID,DOLocationID,fare_amount,total_amount,congestion_surcharge";
const GREEN_HEADER: &str = "VendorID,lpep_pickup_datetime,lpep_dropoff_datetime,PULocationID,DOLocationID,trip_distance,fare_amount,total_amount,congestion_surcharge";

fn write_raw(layout: &DataLayout, provider: Provider, period: &str, header: &str, rows: &[&str]) {
    let dir = layout.raw_dir(provider);
    fs::create_dir_all(&dir).unwrap();
    let mut body = format!("{header}\n");
    for row in rows {
        body.push_str(row);
        body.push('\n');
    }
    fs::write(dir.join(format!("{provider}_tripdata_{period}.csv")), body).unwrap();
}

/// Yellow January 2025 holds the three-trip zone scenario plus one ghost trip.
fn seed(root: &Path) -> AuditConfig {
    let layout = DataLayout::new(root.join("data"));

    write_raw(
        &layout,
        Provider::Yellow,
        "2025-01",
        YELLOW_HEADER,
        &[
            "1,2025-01-06 08:00:00,2025-01-06 08:15:00,1,2.0,1,1,161,12.0,18.0,2.5",
            "1,2025-01-06 09:00:00,2025-01-06 09:15:00,1,2.0,1,1,161,12.0,15.5,0",
            "2,2025-01-06 10:00:00,2025-01-06 10:10:00,1,1.0,1,161,161,8.0,13.0,2.5",
            "2,2025-01-06 11:00:00,2025-01-06 11:10:00,1,0.0,1,48,50,8.0,10.0,",
        ],
    );
    write_raw(
        &layout,
        Provider::Yellow,
        "2024-01",
        YELLOW_HEADER,
        &["1,2024-01-08 08:00:00,2024-01-08 08:20:00,1,3.0,1,1,161,15.0,20.0,2.5"],
    );
    write_raw(
        &layout,
        Provider::Yellow,
        "2023-12",
        YELLOW_HEADER,
        &["1,2023-12-01 08:00:00,2023-12-01 08:20:00,1,3.0,1,7,161,10.0,14.0,2.5"],
    );
    write_raw(
        &layout,
        Provider::Yellow,
        "2024-12",
        YELLOW_HEADER,
        &["1,2024-12-01 08:00:00,2024-12-01 08:20:00,1,3.0,1,48,161,20.0,26.0,2.5"],
    );
    write_raw(
        &layout,
        Provider::Green,
        "2024-01",
        GREEN_HEADER,
        &["2,2024-01-09 12:00:00,2024-01-09 12:30:00,7,8,4.0,18.0,21.0,0"],
    );
    write_raw(
        &layout,
        Provider::Green,
        "2025-01",
        GREEN_HEADER,
        &["2,01/09/2025 12:00:00 PM,01/09/2025 12:30:00 PM,7,8,4.0,18.0,21.0,0"],
    );

    let zone_ids = root.join("congestion_zone_ids.txt");
    fs::write(&zone_ids, "161\n162\n").unwrap();

    let mut config = AuditConfig::default();
    config.data_dir = layout.root().to_path_buf();
    config.zones.source = ZoneSource::IdList { path: zone_ids };
    config
}

#[test]
fn test_full_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let config = seed(dir.path());
    let pipeline = Pipeline::new(&config, false);
    let layout = pipeline.layout().clone();

    let reports = pipeline.run_all();
    assert!(all_succeeded(&reports), "{reports:?}");
    assert_eq!(reports.len(), Stage::ALL.len());

    // Ghost detection split the zero-distance trip off.
    let patterns = layout.aggregated_path(GHOST_PATTERNS_TABLE);
    assert!(patterns.exists());

    // The three-trip scenario in the fact table.
    let facts: Vec<FactRow> = read_table(layout.aggregated_path(FACT_TABLE)).unwrap();
    let jan6: Vec<&FactRow> = facts
        .iter()
        .filter(|r| r.trip_date.to_string() == "2025-01-06")
        .collect();
    assert_eq!(jan6.len(), 2);
    assert_eq!(jan6[0].zone_category, ZoneCategory::InsideZone);
    assert_eq!(jan6[0].trip_count, 1);
    assert_eq!(jan6[1].zone_category, ZoneCategory::EnteringZone);
    assert_eq!(jan6[1].trip_count, 2);
    assert_eq!(jan6[1].trips_with_surcharge, 1);
    assert_eq!(jan6[1].trips_without_surcharge, 1);

    let leakage: LeakageSummary = serde_json::from_str(
        &fs::read_to_string(layout.aggregated_path(LEAKAGE_SUMMARY)).unwrap(),
    )
    .unwrap();
    assert_eq!(leakage.total_trips, 2);
    assert_eq!(leakage.leakage_rate, 50.0);
    assert_eq!(leakage.compliance_rate, 50.0);
    assert_eq!(leakage.estimated_revenue_lost, 9.0);
    assert_eq!(leakage.top_leakage_locations[0].pickup_loc, 1);
    assert!(layout.aggregated_path(TOP_PICKUPS_TABLE).exists());

    let comparison: Vec<ComparisonRow> =
        read_table(layout.aggregated_path(COMPARISON_TABLE)).unwrap();
    assert_eq!(comparison.len(), 2);
    assert_eq!(comparison[0].provider, Provider::Yellow);
    assert_eq!(comparison[0].earlier_trips, 1);
    assert_eq!(comparison[0].later_trips, 3);
    assert_eq!(comparison[1].provider, Provider::Green);

    // Yellow December 2025 is imputed from 2023 and 2024; green has no references.
    let imputed: Vec<ImputedDailyStat> =
        read_table(layout.imputed_path(Provider::Yellow, 2025, 12)).unwrap();
    assert_eq!(imputed.len(), 1);
    assert_eq!(imputed[0].day_of_month, 1);
    assert_eq!(imputed[0].data_source, "IMPUTED");
    assert_eq!(imputed[0].typical_pickup_zone, Some(48));
    assert!(!layout.imputed_path(Provider::Green, 2025, 12).exists());
}

#[test]
fn test_rerun_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let config = seed(dir.path());

    let first = Pipeline::new(&config, false);
    assert!(all_succeeded(&first.run_all()));
    let fact_path = first.layout().aggregated_path(FACT_TABLE);
    let before = fs::read(&fact_path).unwrap();

    let forced = Pipeline::new(&config, true);
    assert!(all_succeeded(&forced.run_all()));
    assert_eq!(fs::read(&fact_path).unwrap(), before);
}

#[test]
fn test_bad_zone_list_fails_zone_stage() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = seed(dir.path());
    let bad = dir.path().join("bad_ids.txt");
    fs::write(&bad, "0\n161\n").unwrap();
    config.zones.source = ZoneSource::IdList { path: bad };

    let reports = Pipeline::new(&config, false).run_all();
    let zones = reports.iter().find(|r| r.stage == Stage::Zones).unwrap();
    assert!(matches!(zones.status, StageStatus::Failed(_)));
    let analyze = reports.iter().find(|r| r.stage == Stage::Analyze).unwrap();
    assert_eq!(analyze.status, StageStatus::Skipped);
    assert!(!DataLayout::new(&config.data_dir)
        .aggregated_path(FACT_TABLE)
        .exists());
}

#[tokio::test]
async fn test_publish_after_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = seed(dir.path());
    let pipeline = Pipeline::new(&config, false);
    assert!(all_succeeded(&pipeline.run_all()));

    let target = dir.path().join("published");
    let index = publish_artifacts(pipeline.layout(), &LocalPublisher::new(&target), DEFAULT_PREFIX)
        .await
        .unwrap();

    assert!(
        index
            .artifacts
            .iter()
            .any(|a| a.key == "aggregates/aggregated/leakage_summary.json")
    );
    assert!(target.join("aggregates/index.json").exists());
}
