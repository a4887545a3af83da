//! Audit configuration.
//!
//! Every knob the stages read lives in [`AuditConfig`], which is passed into
//! each stage entry point. It is stored as a JSON object on disk; any field
//! left out takes its default:
//! ```json
//! {
//!   "data_dir": "data",
//!   "detection": { "max_speed_mph": 65.0 },
//!   "policy": { "effective_date": "2025-01-05T00:00:00", "assumed_surcharge": 9.0 },
//!   "zones": { "source": { "id_list": { "path": "data/raw/zones/ids.txt" } } }
//! }
//! ```

use crate::error::AuditError;
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub data_dir: PathBuf,
    pub detection: DetectionThresholds,
    pub imputation: ImputationConfig,
    pub policy: PolicyConfig,
    pub zones: ZoneConfig,
    pub comparison: ComparisonConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            detection: DetectionThresholds::default(),
            imputation: ImputationConfig::default(),
            policy: PolicyConfig::default(),
            zones: ZoneConfig::default(),
            comparison: ComparisonConfig::default(),
        }
    }
}

/// Thresholds for the ghost trip rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionThresholds {
    pub max_speed_mph: f64,
    pub min_duration_seconds: f64,
    pub high_fare_threshold: f64,
    pub min_distance_miles: f64,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            max_speed_mph: 65.0,
            min_duration_seconds: 60.0,
            high_fare_threshold: 20.0,
            min_distance_miles: 0.01,
        }
    }
}

/// Which month to synthesize and how to blend the two reference years.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImputationConfig {
    pub target_year: i32,
    pub target_month: u32,
    pub weight_older: f64,
    pub weight_newer: f64,
}

impl Default for ImputationConfig {
    fn default() -> Self {
        Self {
            target_year: 2025,
            target_month: 12,
            weight_older: 0.3,
            weight_newer: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub effective_date: NaiveDateTime,
    /// Toll assumed to be lost for every cross-border trip without a surcharge.
    pub assumed_surcharge: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            effective_date: NaiveDate::from_ymd_opt(2025, 1, 5)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default(),
            assumed_surcharge: 9.0,
        }
    }
}

/// Where the congestion zone membership comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneSource {
    /// A text file of zone ids, separated by newlines, commas or whitespace.
    IdList { path: PathBuf },
    /// The TLC `taxi_zone_lookup.csv`, filtered by borough and zone-name keywords.
    Lookup {
        path: PathBuf,
        borough: String,
        keywords: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    pub source: ZoneSource,
    pub top_pickup_limit: usize,
}

/// Manhattan neighbourhoods south of 60th Street.
pub const MANHATTAN_CORE_KEYWORDS: &[&str] = &[
    "Financial",
    "Battery",
    "Tribeca",
    "SoHo",
    "Chinatown",
    "Lower East Side",
    "East Village",
    "West Village",
    "Greenwich",
    "Chelsea",
    "Gramercy",
    "Murray Hill",
    "Midtown",
    "Clinton",
    "Garment",
    "Times Sq",
    "Penn Station",
    "Flatiron",
];

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            source: ZoneSource::Lookup {
                path: PathBuf::from("data/raw/zones/taxi_zone_lookup.csv"),
                borough: "Manhattan".to_string(),
                keywords: MANHATTAN_CORE_KEYWORDS
                    .iter()
                    .map(|k| k.to_string())
                    .collect(),
            },
            top_pickup_limit: 100,
        }
    }
}

/// A set of months within one calendar year.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Window {
    pub year: i32,
    pub months: Vec<u32>,
}

impl Window {
    pub fn contains(&self, year: i32, month: u32) -> bool {
        self.year == year && self.months.contains(&month)
    }

    pub fn label(&self) -> String {
        let months: Vec<String> = self.months.iter().map(|m| format!("{m:02}")).collect();
        format!("{} [{}]", self.year, months.join(","))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonConfig {
    pub earlier: Window,
    pub later: Window,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            earlier: Window {
                year: 2024,
                months: vec![1, 2, 3],
            },
            later: Window {
                year: 2025,
                months: vec![1, 2, 3],
            },
        }
    }
}

impl AuditConfig {
    /// Loads the config from a JSON file at `path` and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config '{}'", path.display()))?;
        let config: AuditConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads from `path` when given, otherwise falls back to the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), AuditError> {
        let d = &self.detection;
        for (name, value) in [
            ("max_speed_mph", d.max_speed_mph),
            ("min_duration_seconds", d.min_duration_seconds),
            ("high_fare_threshold", d.high_fare_threshold),
            ("min_distance_miles", d.min_distance_miles),
            ("weight_older", self.imputation.weight_older),
            ("weight_newer", self.imputation.weight_newer),
            ("assumed_surcharge", self.policy.assumed_surcharge),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AuditError::Config(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }

        if !(1..=12).contains(&self.imputation.target_month) {
            return Err(AuditError::Config(format!(
                "imputation target_month {} is not a calendar month",
                self.imputation.target_month
            )));
        }

        for (name, window) in [
            ("earlier", &self.comparison.earlier),
            ("later", &self.comparison.later),
        ] {
            if window.months.is_empty() || window.months.iter().any(|m| !(1..=12).contains(m)) {
                return Err(AuditError::Config(format!(
                    "comparison window '{name}' needs months in 1..=12"
                )));
            }
        }

        Ok(())
    }
}
