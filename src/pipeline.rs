//! Stage driver.
//!
//! Stages run strictly in order. Within a stage, work is best effort per
//! file; between stages the driver is fail-fast: once a stage does not
//! succeed, every later stage is skipped. The driver always ends with a
//! per-stage summary rather than a single pass/fail signal.

use crate::analysis::{analyze_leakage, compare_providers};
use crate::cleaning::{analyze_ghost_patterns, clean_all};
use crate::config::AuditConfig;
use crate::imputation::impute_missing;
use crate::layout::{DataLayout, TOP_PICKUPS_TABLE};
use crate::output::{print_json, print_pretty};
use crate::schema::{unify_all, verify_all};
use crate::zones::{CongestionZones, analyze_zone_patterns, classify_trips};
use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Unify,
    Clean,
    Impute,
    Zones,
    Analyze,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Unify,
        Stage::Clean,
        Stage::Impute,
        Stage::Zones,
        Stage::Analyze,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Unify => "unify",
            Stage::Clean => "clean",
            Stage::Impute => "impute",
            Stage::Zones => "zones",
            Stage::Analyze => "analyze",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum StageStatus {
    Succeeded,
    Failed(String),
    /// Not run because an earlier stage did not succeed.
    Skipped,
}

impl StageStatus {
    pub fn succeeded(&self) -> bool {
        *self == StageStatus::Succeeded
    }

    fn label(&self) -> &'static str {
        match self {
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed(_) => "failed",
            StageStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    #[serde(flatten)]
    pub status: StageStatus,
}

pub fn all_succeeded(reports: &[StageReport]) -> bool {
    reports.iter().all(|r| r.status.succeeded())
}

pub struct Pipeline<'a> {
    config: &'a AuditConfig,
    layout: DataLayout,
    force: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a AuditConfig, force: bool) -> Self {
        Self {
            config,
            layout: DataLayout::new(&config.data_dir),
            force,
        }
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Runs every stage in order, skipping the rest after the first one that
    /// does not succeed.
    pub fn run_all(&self) -> Vec<StageReport> {
        let mut reports = Vec::with_capacity(Stage::ALL.len());
        let mut blocked = false;

        for stage in Stage::ALL {
            let status = if blocked {
                error!(%stage, "Skipping stage, an earlier stage did not succeed");
                StageStatus::Skipped
            } else {
                self.run_stage(stage)
            };
            blocked = !status.succeeded();
            reports.push(StageReport { stage, status });
        }

        log_summary(&reports);
        reports
    }

    /// Runs one stage, converting any error into a failed status.
    pub fn run_stage(&self, stage: Stage) -> StageStatus {
        info!(%stage, "Starting stage");
        let result = match stage {
            Stage::Unify => self.unify(),
            Stage::Clean => self.clean(),
            Stage::Impute => self.impute(),
            Stage::Zones => self.zones(),
            Stage::Analyze => self.analyze(),
        };

        let status = result.unwrap_or_else(|e| StageStatus::Failed(format!("{e:#}")));
        match &status {
            StageStatus::Failed(reason) => error!(%stage, %reason, "Stage failed"),
            _ => info!(%stage, "Stage succeeded"),
        }
        status
    }

    fn unify(&self) -> Result<StageStatus> {
        let stats = unify_all(&self.layout, self.force)?;
        print_json(&stats)?;
        let verify = verify_all(&self.layout)?;
        print_json(&verify)?;

        let failed = stats.files().failed;
        if failed > 0 {
            return Ok(StageStatus::Failed(format!("{failed} raw files failed to unify")));
        }
        if !verify.failed.is_empty() {
            return Ok(StageStatus::Failed(format!(
                "schema check failed for {}",
                verify.failed.join(", ")
            )));
        }
        Ok(StageStatus::Succeeded)
    }

    fn clean(&self) -> Result<StageStatus> {
        let stats = clean_all(&self.layout, &self.config.detection, self.force)?;
        print_json(&stats)?;

        if stats.files.completed() == 0 {
            return Ok(StageStatus::Failed("no unified files were cleaned".to_string()));
        }
        if stats.files.failed > 0 {
            return Ok(StageStatus::Failed(format!(
                "{} unified files failed ghost detection",
                stats.files.failed
            )));
        }

        let patterns = analyze_ghost_patterns(&self.layout)?;
        print_json(&patterns)?;
        Ok(StageStatus::Succeeded)
    }

    /// Imputation problems are reported but never block later stages.
    fn impute(&self) -> Result<StageStatus> {
        let stats = impute_missing(&self.layout, &self.config.imputation, self.force)?;
        print_json(&stats)?;
        if stats.failed() > 0 {
            warn!(failed = stats.failed(), "Imputation incomplete for some providers");
        }
        Ok(StageStatus::Succeeded)
    }

    fn zones(&self) -> Result<StageStatus> {
        let zones = CongestionZones::load(&self.config.zones.source)?;
        print_pretty(&zones);
        let effective_date = self.config.policy.effective_date;

        let stats = classify_trips(&self.layout, &zones, effective_date, self.force)?;
        print_json(&stats)?;

        let pickups_path = self.layout.aggregated_path(TOP_PICKUPS_TABLE);
        if stats.skipped && pickups_path.exists() {
            info!("Skipping, pickup ranking already built");
        } else {
            let pickups = analyze_zone_patterns(
                &self.layout,
                &zones,
                effective_date,
                self.config.zones.top_pickup_limit,
            )?;
            print_json(&pickups)?;
        }
        Ok(StageStatus::Succeeded)
    }

    fn analyze(&self) -> Result<StageStatus> {
        let leakage = analyze_leakage(&self.layout, self.config.policy.assumed_surcharge)?;
        print_json(&leakage)?;
        let comparison = compare_providers(&self.layout, &self.config.comparison)?;
        print_json(&comparison)?;
        Ok(StageStatus::Succeeded)
    }
}

fn log_summary(reports: &[StageReport]) {
    for report in reports {
        let reason = match &report.status {
            StageStatus::Failed(reason) => reason.as_str(),
            _ => "",
        };
        info!(
            stage = %report.stage,
            status = report.status.label(),
            reason,
            "Pipeline summary"
        );
    }
    let succeeded = reports.iter().filter(|r| r.status.succeeded()).count();
    if succeeded == reports.len() {
        info!(stages = succeeded, "Pipeline completed");
    } else {
        warn!(
            succeeded,
            total = reports.len(),
            "Pipeline finished with stages that did not succeed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config_in(dir: &std::path::Path) -> AuditConfig {
        let mut config = AuditConfig::default();
        config.data_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn test_stage_parse() {
        assert_eq!("Zones".parse::<Stage>().unwrap(), Stage::Zones);
        assert!("download".parse::<Stage>().is_err());
    }

    #[test]
    fn test_failed_stage_blocks_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        // No raw files: unify succeeds with nothing to do, clean has no input.
        let reports = Pipeline::new(&config, false).run_all();
        let statuses: Vec<&str> = reports.iter().map(|r| r.status.label()).collect();
        assert_eq!(
            statuses,
            vec!["succeeded", "failed", "skipped", "skipped", "skipped"]
        );
        assert!(!all_succeeded(&reports));
    }

    #[test]
    fn test_unify_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let pipeline = Pipeline::new(&config, false);
        let raw = pipeline.layout().raw_dir(crate::trip::Provider::Yellow);
        fs::create_dir_all(&raw).unwrap();
        fs::write(raw.join("yellow_tripdata_2024-01.csv.gz"), b"garbage").unwrap();

        assert!(matches!(
            pipeline.run_stage(Stage::Unify),
            StageStatus::Failed(_)
        ));
    }

    #[test]
    fn test_report_serializes_flat() {
        let report = StageReport {
            stage: Stage::Zones,
            status: StageStatus::Failed("no zones".to_string()),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["stage"], "zones");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["reason"], "no zones");
    }
}
