use anyhow::{bail, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::preset::PresetTable;
use crate::schedule::ScheduleEntry;
use crate::zone::HvacMode;

/// Control tuning for one zone. Deployment details (sensor ids, relay
/// address) live with the daemon; this struct carries what the control
/// loop itself consumes. Every field has a default so a minimal config
/// file can stay minimal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    #[serde(default = "default_target_temp")]
    pub target_temp: f64,
    #[serde(default = "default_min_temp")]
    pub min_temp: f64,
    #[serde(default = "default_max_temp")]
    pub max_temp: f64,
    #[serde(default = "default_tolerance")]
    pub hot_tolerance: f64,
    #[serde(default = "default_tolerance")]
    pub cold_tolerance: f64,
    /// Computed powers in (0, min_cycle_power] are raised to this floor
    /// so the heater never runs uselessly short bursts.
    #[serde(default = "default_min_cycle_power")]
    pub min_cycle_power: f64,
    #[serde(default = "default_period_minutes")]
    pub period_minutes: u32,
    #[serde(default = "default_forced_minutes")]
    pub forced_minutes: u32,
    /// How far below target the room must trend before a failing heater
    /// is suspected.
    #[serde(default = "default_failure_offset")]
    pub failure_offset: f64,
    #[serde(default = "default_pause_on_delay_secs")]
    pub pause_on_delay_secs: u32,
    #[serde(default = "default_pause_off_delay_secs")]
    pub pause_off_delay_secs: u32,
    /// Cooling zone: the control loop runs on sign-inverted temperatures.
    #[serde(default)]
    pub ac_mode: bool,
    /// When false the coefficients stay pinned and cycle memory is never
    /// overwritten.
    #[serde(default = "default_true")]
    pub learning: bool,
    /// Start heating ahead of a scheduled setpoint raise once the model
    /// is trained enough to estimate the lead time.
    #[serde(default)]
    pub preheat: bool,
    #[serde(default)]
    pub initial_mode: HvacMode,
    #[serde(default)]
    pub presets: PresetTable,
    #[serde(default)]
    pub schedule: Vec<ScheduleEntry>,
}

fn default_target_temp() -> f64 {
    20.0
}

fn default_min_temp() -> f64 {
    7.0
}

fn default_max_temp() -> f64 {
    35.0
}

fn default_tolerance() -> f64 {
    0.5
}

fn default_min_cycle_power() -> f64 {
    10.0
}

fn default_period_minutes() -> u32 {
    30
}

fn default_forced_minutes() -> u32 {
    60
}

fn default_failure_offset() -> f64 {
    2.0
}

fn default_pause_on_delay_secs() -> u32 {
    120
}

fn default_pause_off_delay_secs() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

impl ZoneConfig {
    /// Range checks. Violations here are the only fatal config class;
    /// schedule entries are validated leniently elsewhere.
    pub fn validate(&self) -> Result<()> {
        if self.min_temp >= self.max_temp {
            bail!(
                "min_temp {} must be below max_temp {}",
                self.min_temp,
                self.max_temp
            );
        }
        if self.target_temp < self.min_temp || self.target_temp > self.max_temp {
            bail!(
                "target_temp {} outside [{}, {}]",
                self.target_temp,
                self.min_temp,
                self.max_temp
            );
        }
        if !(5.0..=100.0).contains(&self.min_cycle_power) {
            bail!(
                "min_cycle_power {} outside [5, 100]",
                self.min_cycle_power
            );
        }
        if self.period_minutes == 0 {
            bail!("period_minutes must be at least 1");
        }
        if self.hot_tolerance < 0.0 || self.cold_tolerance < 0.0 {
            bail!("tolerances must not be negative");
        }
        if self.failure_offset < 0.0 {
            bail!("failure_offset must not be negative");
        }
        Ok(())
    }

    pub fn period(&self) -> Duration {
        Duration::minutes(i64::from(self.period_minutes))
    }

    pub fn forced_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.forced_minutes))
    }

    pub fn pause_on_delay(&self) -> Duration {
        Duration::seconds(i64::from(self.pause_on_delay_secs))
    }

    pub fn pause_off_delay(&self) -> Duration {
        Duration::seconds(i64::from(self.pause_off_delay_secs))
    }
}

impl Default for ZoneConfig {
    fn default() -> ZoneConfig {
        ZoneConfig {
            target_temp: default_target_temp(),
            min_temp: default_min_temp(),
            max_temp: default_max_temp(),
            hot_tolerance: default_tolerance(),
            cold_tolerance: default_tolerance(),
            min_cycle_power: default_min_cycle_power(),
            period_minutes: default_period_minutes(),
            forced_minutes: default_forced_minutes(),
            failure_offset: default_failure_offset(),
            pause_on_delay_secs: default_pause_on_delay_secs(),
            pause_off_delay_secs: default_pause_off_delay_secs(),
            ac_mode: false,
            learning: true,
            preheat: false,
            initial_mode: HvacMode::default(),
            presets: PresetTable::default(),
            schedule: Vec::new(),
        }
    }
}
