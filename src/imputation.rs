//! Synthesizes daily statistics for a month with no trip data.
//!
//! A provider missing the target month gets one row per day of month, blended
//! from the same month in the two preceding years: the older year weighted by
//! `weight_older`, the newer by `weight_newer`. Typical pickup and dropoff
//! zones come from the newer year. The result lives in its own directory and
//! is never mixed into a trip stream.

use crate::config::ImputationConfig;
use crate::error::AuditError;
use crate::layout::{DataLayout, TripFile};
use crate::schema::unify::unified_file_for;
use crate::stats::{Mean, Mode};
use crate::table::{TableRow, scan, write_table};
use crate::trip::{Provider, TripRecord};
use anyhow::Result;
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const IMPUTED_TAG: &str = "IMPUTED";

/// Per-day aggregate of one reference month.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyProfile {
    pub trip_count: u64,
    pub avg_fare: Option<f64>,
    pub avg_total: Option<f64>,
    pub avg_distance: Option<f64>,
    pub avg_congestion: Option<f64>,
    pub typical_pickup_zone: Option<i32>,
    pub typical_dropoff_zone: Option<i32>,
}

#[derive(Default)]
struct DayAccumulator {
    count: u64,
    fare: Mean,
    total: Mean,
    distance: Mean,
    congestion: Mean,
    pickup: Mode<i32>,
    dropoff: Mode<i32>,
}

impl DayAccumulator {
    fn push(&mut self, trip: &TripRecord) {
        self.count += 1;
        self.fare.push(trip.fare);
        self.total.push(trip.total_amount);
        self.distance.push(trip.trip_distance);
        self.congestion.push(Some(trip.surcharge_or_zero()));
        self.pickup.push(trip.pickup_loc);
        self.dropoff.push(trip.dropoff_loc);
    }

    fn finish(&self) -> DailyProfile {
        DailyProfile {
            trip_count: self.count,
            avg_fare: self.fare.value(),
            avg_total: self.total.value(),
            avg_distance: self.distance.value(),
            avg_congestion: self.congestion.value(),
            typical_pickup_zone: self.pickup.value(),
            typical_dropoff_zone: self.dropoff.value(),
        }
    }
}

/// Groups the trips in `path` by pickup day of month.
pub fn daily_profiles(path: &Path) -> Result<BTreeMap<u32, DailyProfile>> {
    let mut days: BTreeMap<u32, DayAccumulator> = BTreeMap::new();
    scan(path, |trip: TripRecord| {
        days.entry(trip.pickup_time.day()).or_default().push(&trip);
        Ok(())
    })?;
    Ok(days.iter().map(|(day, acc)| (*day, acc.finish())).collect())
}

/// One synthesized day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputedDailyStat {
    pub day_of_month: u32,
    pub imputed_trip_count: u64,
    pub imputed_avg_fare: Option<f64>,
    pub imputed_avg_total: Option<f64>,
    pub imputed_avg_distance: Option<f64>,
    pub imputed_avg_congestion: Option<f64>,
    pub typical_pickup_zone: Option<i32>,
    pub typical_dropoff_zone: Option<i32>,
    pub weight_older: f64,
    pub weight_newer: f64,
    pub data_source: String,
}

impl TableRow for ImputedDailyStat {
    const COLUMNS: &'static [&'static str] = &[
        "day_of_month",
        "imputed_trip_count",
        "imputed_avg_fare",
        "imputed_avg_total",
        "imputed_avg_distance",
        "imputed_avg_congestion",
        "typical_pickup_zone",
        "typical_dropoff_zone",
        "weight_older",
        "weight_newer",
        "data_source",
    ];
}

fn weighted(older: Option<f64>, newer: Option<f64>, config: &ImputationConfig) -> Option<f64> {
    Some(config.weight_older * older? + config.weight_newer * newer?)
}

/// Inner join on day of month, then a weighted blend of every metric.
/// Days present in only one reference year produce no row.
pub fn blend(
    older: &BTreeMap<u32, DailyProfile>,
    newer: &BTreeMap<u32, DailyProfile>,
    config: &ImputationConfig,
) -> Vec<ImputedDailyStat> {
    older
        .iter()
        .filter_map(|(day, old)| newer.get(day).map(|new| (*day, old, new)))
        .map(|(day, old, new)| {
            let count = config.weight_older * old.trip_count as f64
                + config.weight_newer * new.trip_count as f64;
            ImputedDailyStat {
                day_of_month: day,
                imputed_trip_count: count.max(0.0).trunc() as u64,
                imputed_avg_fare: weighted(old.avg_fare, new.avg_fare, config),
                imputed_avg_total: weighted(old.avg_total, new.avg_total, config),
                imputed_avg_distance: weighted(old.avg_distance, new.avg_distance, config),
                imputed_avg_congestion: weighted(old.avg_congestion, new.avg_congestion, config),
                typical_pickup_zone: new.typical_pickup_zone,
                typical_dropoff_zone: new.typical_dropoff_zone,
                weight_older: config.weight_older,
                weight_newer: config.weight_newer,
                data_source: IMPUTED_TAG.to_string(),
            }
        })
        .collect()
}

/// What happened to one provider during imputation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum ImputationOutcome {
    /// Real data exists for the target month.
    Present,
    Imputed { days: usize },
    AlreadyImputed,
    Failed(String),
}

#[derive(Debug, Serialize)]
pub struct ImputationStats {
    pub target: String,
    pub providers: BTreeMap<Provider, ImputationOutcome>,
}

impl ImputationStats {
    pub fn failed(&self) -> usize {
        self.providers
            .values()
            .filter(|o| matches!(o, ImputationOutcome::Failed(_)))
            .count()
    }
}

/// Trips of a reference month: the clean stream when ghost detection has run,
/// the unified stream otherwise.
fn reference_trips(layout: &DataLayout, file: &TripFile) -> Result<PathBuf> {
    let clean = layout.clean_path(file);
    if clean.exists() {
        return Ok(clean);
    }
    let unified = layout.unified_path(file);
    if unified.exists() {
        return Ok(unified);
    }
    Err(AuditError::MissingArtifact(unified).into())
}

fn impute_provider(
    layout: &DataLayout,
    provider: Provider,
    config: &ImputationConfig,
) -> Result<usize> {
    let year = config.target_year;
    let month = config.target_month;
    let older_file = TripFile::new(provider, year - 2, month);
    let newer_file = TripFile::new(provider, year - 1, month);

    let older = daily_profiles(&reference_trips(layout, &older_file)?)?;
    let newer = daily_profiles(&reference_trips(layout, &newer_file)?)?;
    info!(
        %provider,
        older_days = older.len(),
        newer_days = newer.len(),
        "Reference months loaded"
    );

    let rows = blend(&older, &newer, config);
    if rows.is_empty() {
        warn!(%provider, "Reference months share no day of month");
    }
    write_table(layout.imputed_path(provider, year, month), &rows)?;
    Ok(rows.len())
}

/// Imputes the target month for every provider that lacks it.
///
/// A provider whose reference data is missing is reported as failed while the
/// others continue.
#[tracing::instrument(skip(layout, config), fields(target = %format!("{}-{:02}", config.target_year, config.target_month)))]
pub fn impute_missing(
    layout: &DataLayout,
    config: &ImputationConfig,
    force: bool,
) -> Result<ImputationStats> {
    layout.create_dirs()?;
    let year = config.target_year;
    let month = config.target_month;
    let mut stats = ImputationStats {
        target: format!("{year}-{month:02}"),
        providers: BTreeMap::new(),
    };

    for provider in Provider::ALL {
        let outcome = if unified_file_for(layout, provider, year, month).is_some() {
            info!(%provider, "Target month present, no imputation needed");
            ImputationOutcome::Present
        } else if layout.imputed_path(provider, year, month).exists() && !force {
            info!(%provider, "Skipping, already imputed");
            ImputationOutcome::AlreadyImputed
        } else {
            match impute_provider(layout, provider, config) {
                Ok(days) => {
                    info!(%provider, days, "Imputed daily statistics");
                    ImputationOutcome::Imputed { days }
                }
                Err(e) => {
                    error!(%provider, error = %e, "Imputation failed");
                    ImputationOutcome::Failed(e.to_string())
                }
            }
        };
        stats.providers.insert(provider, outcome);
    }

    Ok(stats)
}
