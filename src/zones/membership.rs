use crate::config::ZoneSource;
use crate::error::AuditError;
use crate::table::open_reader;
use crate::trip::MAX_ZONE_ID;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// The set of taxi zone ids inside the congestion relief zone.
///
/// Membership is all-or-nothing: a set is only built when every id is valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CongestionZones {
    ids: BTreeSet<i32>,
}

impl CongestionZones {
    pub fn new(ids: impl IntoIterator<Item = i32>) -> Result<Self, AuditError> {
        let ids: BTreeSet<i32> = ids.into_iter().collect();
        if ids.is_empty() {
            return Err(AuditError::InvalidZones("zone set is empty".to_string()));
        }
        if let Some(bad) = ids.iter().find(|id| !(1..=MAX_ZONE_ID).contains(*id)) {
            return Err(AuditError::InvalidZones(format!(
                "zone id {bad} outside 1..={MAX_ZONE_ID}"
            )));
        }
        Ok(Self { ids })
    }

    pub fn contains(&self, zone: i32) -> bool {
        self.ids.contains(&zone)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = i32> + '_ {
        self.ids.iter().copied()
    }

    /// Builds the set from whichever source the config names.
    pub fn load(source: &ZoneSource) -> Result<Self> {
        let zones = match source {
            ZoneSource::IdList { path } => Self::from_id_list(path)?,
            ZoneSource::Lookup {
                path,
                borough,
                keywords,
            } => Self::from_lookup(path, borough, keywords)?,
        };
        info!(zones = zones.len(), "Congestion zone membership loaded");
        debug!(ids = ?zones.ids().collect::<Vec<_>>(), "Congestion zone ids");
        Ok(zones)
    }

    /// Reads ids separated by newlines, commas or whitespace. Lines starting
    /// with `#` are comments.
    pub fn from_id_list(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read zone list {}", path.display()))?;

        let mut ids = Vec::new();
        for line in content.lines().map(str::trim) {
            if line.starts_with('#') {
                continue;
            }
            for token in line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|t| !t.is_empty())
            {
                let id: i32 = token.parse().map_err(|_| {
                    AuditError::InvalidZones(format!("'{token}' is not a zone id"))
                })?;
                ids.push(id);
            }
        }
        Ok(Self::new(ids)?)
    }

    /// Selects lookup rows in `borough` whose zone name contains any of
    /// `keywords`, both compared case-insensitively.
    pub fn from_lookup(path: &Path, borough: &str, keywords: &[String]) -> Result<Self> {
        let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        let mut reader = open_reader(path)?;
        let mut ids = Vec::new();

        for result in reader.deserialize() {
            let row: LookupRow =
                result.with_context(|| format!("bad zone lookup row in {}", path.display()))?;
            let Some(zone) = row.zone.as_deref() else {
                continue;
            };
            let zone = zone.to_lowercase();
            if row.borough.eq_ignore_ascii_case(borough)
                && keywords.iter().any(|k| zone.contains(k.as_str()))
            {
                debug!(location_id = row.location_id, zone = %zone, "Zone selected");
                ids.push(row.location_id);
            }
        }
        Ok(Self::new(ids)?)
    }
}

#[derive(Debug, Deserialize)]
struct LookupRow {
    #[serde(rename = "LocationID")]
    location_id: i32,
    #[serde(rename = "Borough")]
    borough: String,
    #[serde(rename = "Zone")]
    zone: Option<String>,
}
