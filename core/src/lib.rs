//! Adaptive heating control: a linear thermal model drives a duty-cycle
//! state machine and is re-calibrated from the outcome of every cycle.

pub mod calibration;
pub mod config;
pub mod failure;
pub mod model;
pub mod preset;
pub mod schedule;
pub mod zone;

pub use calibration::{CycleMemory, LearningStatus};
pub use config::ZoneConfig;
pub use model::ThermalCoefficients;
pub use preset::{Preset, PresetTable};
pub use schedule::{ScheduleEntry, WeeklySchedule};
pub use zone::{HvacAction, HvacMode, Notification, TickEffects, Zone, ZoneSnapshot, ZoneStatus};
