use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thermostat_core::{WeeklySchedule, ZoneSnapshot};

/// Zone snapshots on disk, keyed by zone name. Saved through a tmp file
/// and rename so a crash mid-write cannot corrupt the previous state.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: PathBuf) -> StateStore {
        StateStore { path }
    }

    /// Missing or unreadable state is a fresh start, never an error.
    pub fn load(&self) -> BTreeMap<String, ZoneSnapshot> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return BTreeMap::new(),
        };
        match serde_json::from_str(&raw) {
            Ok(snapshots) => snapshots,
            Err(err) => {
                warn!("state file {} unreadable: {}", self.path.display(), err);
                BTreeMap::new()
            }
        }
    }

    pub fn save(&self, snapshots: &BTreeMap<String, ZoneSnapshot>) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        let raw = serde_json::to_string_pretty(snapshots)?;
        fs::write(&tmp, raw).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

/// One named grid in the shared schedule file: 7 rows (Monday first) of
/// 48 half-hour preset names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleStoreEntry {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub zones: Vec<String>,
    pub grid: Vec<Vec<String>>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleStore {
    #[serde(default)]
    pub schedules: Vec<ScheduleStoreEntry>,
}

pub fn load_schedules(path: &Path) -> Result<ScheduleStore> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading schedule store {}", path.display()))?;
    let store = serde_json::from_str(&raw)
        .with_context(|| format!("parsing schedule store {}", path.display()))?;
    Ok(store)
}

impl ScheduleStore {
    /// First enabled grid naming the zone wins. A malformed grid is
    /// reported and skipped so the zone keeps its current schedule.
    pub fn resolve(&self, zone: &str) -> Option<WeeklySchedule> {
        let entry = self
            .schedules
            .iter()
            .find(|entry| entry.enabled && entry.zones.iter().any(|z| z == zone))?;
        match WeeklySchedule::from_grid(&entry.grid) {
            Ok(schedule) => Some(schedule),
            Err(err) => {
                warn!("schedule {} unusable: {:#}", entry.name, err);
                None
            }
        }
    }
}
