use crate::config::{ComparisonConfig, Window};
use crate::layout::{COMPARISON_TABLE, DataLayout};
use crate::stats::{Mean, pct_change};
use crate::table::{TableRow, scan, write_table};
use crate::trip::{Provider, TripRecord};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Volume and revenue of one provider within one window.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct WindowTotals {
    pub trip_count: u64,
    pub avg_fare: Option<f64>,
    pub avg_total: Option<f64>,
    pub total_revenue: f64,
}

#[derive(Default)]
struct WindowAccumulator {
    count: u64,
    fare: Mean,
    total: Mean,
}

impl WindowAccumulator {
    fn push(&mut self, trip: &TripRecord) {
        self.count += 1;
        self.fare.push(trip.fare);
        self.total.push(trip.total_amount);
    }

    fn finish(&self) -> WindowTotals {
        WindowTotals {
            trip_count: self.count,
            avg_fare: self.fare.value(),
            avg_total: self.total.value(),
            total_revenue: self.total.sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub provider: Provider,
    pub earlier_window: String,
    pub later_window: String,
    pub earlier_trips: u64,
    pub later_trips: u64,
    pub trip_change_pct: f64,
    pub earlier_avg_fare: Option<f64>,
    pub later_avg_fare: Option<f64>,
    pub fare_change_pct: f64,
    pub earlier_avg_total: Option<f64>,
    pub later_avg_total: Option<f64>,
    pub total_change_pct: f64,
    pub earlier_revenue: f64,
    pub later_revenue: f64,
    pub revenue_change_pct: f64,
}

impl TableRow for ComparisonRow {
    const COLUMNS: &'static [&'static str] = &[
        "provider",
        "earlier_window",
        "later_window",
        "earlier_trips",
        "later_trips",
        "trip_change_pct",
        "earlier_avg_fare",
        "later_avg_fare",
        "fare_change_pct",
        "earlier_avg_total",
        "later_avg_total",
        "total_change_pct",
        "earlier_revenue",
        "later_revenue",
        "revenue_change_pct",
    ];
}

impl ComparisonRow {
    fn new(provider: Provider, config: &ComparisonConfig, a: WindowTotals, b: WindowTotals) -> Self {
        let change = |x: Option<f64>, y: Option<f64>| pct_change(x.unwrap_or(0.0), y.unwrap_or(0.0));
        Self {
            provider,
            earlier_window: config.earlier.label(),
            later_window: config.later.label(),
            earlier_trips: a.trip_count,
            later_trips: b.trip_count,
            trip_change_pct: pct_change(a.trip_count as f64, b.trip_count as f64),
            earlier_avg_fare: a.avg_fare,
            later_avg_fare: b.avg_fare,
            fare_change_pct: change(a.avg_fare, b.avg_fare),
            earlier_avg_total: a.avg_total,
            later_avg_total: b.avg_total,
            total_change_pct: change(a.avg_total, b.avg_total),
            earlier_revenue: a.total_revenue,
            later_revenue: b.total_revenue,
            revenue_change_pct: pct_change(a.total_revenue, b.total_revenue),
        }
    }
}

/// Totals per provider over the clean files whose month falls in `window`.
/// The provider comes from the file name, not from the rows. Providers whose
/// files hold no trips are left out.
pub fn window_totals(layout: &DataLayout, window: &Window) -> Result<BTreeMap<Provider, WindowTotals>> {
    let mut by_provider: BTreeMap<Provider, WindowAccumulator> = BTreeMap::new();
    for (path, file) in layout.clean_files()? {
        if !window.contains(file.year, file.month) {
            continue;
        }
        let acc = by_provider.entry(file.provider).or_default();
        scan(&path, |trip: TripRecord| {
            acc.push(&trip);
            Ok(())
        })?;
    }
    Ok(by_provider
        .iter()
        .filter(|(_, acc)| acc.count > 0)
        .map(|(provider, acc)| (*provider, acc.finish()))
        .collect())
}

/// Compares each provider between the earlier and later window.
///
/// Only providers with data in both windows get a row.
#[tracing::instrument(skip_all, fields(earlier = %config.earlier.label(), later = %config.later.label()))]
pub fn compare_providers(layout: &DataLayout, config: &ComparisonConfig) -> Result<Vec<ComparisonRow>> {
    let earlier = window_totals(layout, &config.earlier)?;
    let later = window_totals(layout, &config.later)?;

    let mut rows = Vec::new();
    for (provider, before) in &earlier {
        let Some(after) = later.get(provider) else {
            warn!(%provider, "No trips in the later window, omitted from comparison");
            continue;
        };
        let row = ComparisonRow::new(*provider, config, *before, *after);
        info!(
            %provider,
            earlier_trips = row.earlier_trips,
            later_trips = row.later_trips,
            trip_change_pct = %format!("{:.1}", row.trip_change_pct),
            fare_change_pct = %format!("{:.1}", row.fare_change_pct),
            revenue_change_pct = %format!("{:.1}", row.revenue_change_pct),
            "Provider comparison"
        );
        rows.push(row);
    }
    for provider in later.keys().filter(|p| !earlier.contains_key(p)) {
        warn!(%provider, "No trips in the earlier window, omitted from comparison");
    }

    write_table(layout.aggregated_path(COMPARISON_TABLE), &rows)?;
    Ok(rows)
}
