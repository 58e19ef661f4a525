use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use thermostat_core::ZoneConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_telemetry_bind")]
    pub telemetry_bind: String,
    #[serde(default = "default_http_bind")]
    pub http_bind: String,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Weekly grids shared with other tooling; zones opt in with
    /// `external_schedule`.
    #[serde(default)]
    pub schedule_file: Option<PathBuf>,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    pub zones: Vec<ZoneEntry>,
}

/// One zone: which stations belong to it, plus the control tuning. The
/// tuning fields sit directly on the zone object in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneEntry {
    pub name: String,
    /// Relay station hostname; also the id the station reports with.
    pub relay_addr: String,
    pub indoor_sensor: String,
    pub outdoor_sensor: String,
    /// Window contact; open requests a heating pause.
    #[serde(default)]
    pub window_switch: Option<String>,
    /// Take the weekly grid from `schedule_file` instead of the inline
    /// schedule entries.
    #[serde(default)]
    pub external_schedule: bool,
    #[serde(flatten)]
    pub control: ZoneConfig,
}

fn default_telemetry_bind() -> String {
    "0.0.0.0:4000".to_string()
}

fn default_http_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_state_file() -> PathBuf {
    PathBuf::from("thermostat-state.json")
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("apps/server/static")
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<ServerConfig> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: ServerConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.zones.is_empty() {
            bail!("no zones configured");
        }
        let mut names = HashSet::new();
        for entry in &self.zones {
            if !names.insert(entry.name.as_str()) {
                bail!("duplicate zone name {}", entry.name);
            }
            entry
                .control
                .validate()
                .with_context(|| format!("zone {}", entry.name))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thermostat_core::HvacMode;

    #[test]
    fn minimal_config_fills_defaults() {
        let raw = r#"{ "zones": [
            { "name": "living", "relay_addr": "relay-living.local",
              "indoor_sensor": "living", "outdoor_sensor": "garden" }
        ] }"#;
        let config: ServerConfig = serde_json::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.telemetry_bind, "0.0.0.0:4000");
        assert_eq!(config.http_bind, "0.0.0.0:8080");
        let zone = &config.zones[0];
        assert_eq!(zone.control.target_temp, 20.0);
        assert_eq!(zone.control.period_minutes, 30);
        assert_eq!(zone.control.initial_mode, HvacMode::Off);
        assert_eq!(zone.external_schedule, false);
        assert_eq!(zone.window_switch, None);
    }

    #[test]
    fn control_fields_sit_directly_on_the_zone_object() {
        let raw = r#"{ "zones": [ {
            "name": "living",
            "relay_addr": "relay-living.local",
            "indoor_sensor": "living",
            "outdoor_sensor": "garden",
            "window_switch": "living-window",
            "target_temp": 21.5,
            "period_minutes": 20,
            "preheat": true,
            "initial_mode": "auto",
            "schedule": [ { "days": "1-5", "start": "06:30", "mode": "comfort" } ]
        } ] }"#;
        let config: ServerConfig = serde_json::from_str(raw).unwrap();
        config.validate().unwrap();
        let zone = &config.zones[0];
        assert_eq!(zone.control.target_temp, 21.5);
        assert_eq!(zone.control.period_minutes, 20);
        assert_eq!(zone.control.preheat, true);
        assert_eq!(zone.control.initial_mode, HvacMode::Auto);
        assert_eq!(zone.control.schedule.len(), 1);
        assert_eq!(zone.window_switch.as_deref(), Some("living-window"));
    }

    #[test]
    fn duplicate_zone_names_are_rejected() {
        let raw = r#"{ "zones": [
            { "name": "living", "relay_addr": "a", "indoor_sensor": "s1", "outdoor_sensor": "o" },
            { "name": "living", "relay_addr": "b", "indoor_sensor": "s2", "outdoor_sensor": "o" }
        ] }"#;
        let config: ServerConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.validate().is_err(), true);
    }

    #[test]
    fn bad_control_ranges_are_rejected() {
        let raw = r#"{ "zones": [
            { "name": "living", "relay_addr": "a", "indoor_sensor": "s1", "outdoor_sensor": "o",
              "min_temp": 30.0, "max_temp": 10.0 }
        ] }"#;
        let config: ServerConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.validate().is_err(), true);
    }
}
