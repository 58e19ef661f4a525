use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::model::{round1, ThermalCoefficients};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LearningStatus {
    /// No cycle observed yet; the next cycle only records, never learns.
    Uninitialized,
    Initialized,
    /// Learning switched off in config; memory observations stay frozen.
    Disabled,
}

/// Outcome of the previous automatic cycle, the raw material for the next
/// calibration step. Temperatures are stored as measured; cooling zones
/// orient them on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleMemory {
    pub power_pct: f64,
    pub indoor_temp: f64,
    pub outdoor_temp: Option<f64>,
    pub setpoint: f64,
    pub learning_status: LearningStatus,
    pub last_calc_time: DateTime<Local>,
}

impl CycleMemory {
    pub fn new(now: DateTime<Local>) -> CycleMemory {
        CycleMemory {
            power_pct: 0.0,
            indoor_temp: 0.0,
            outdoor_temp: None,
            setpoint: 20.0,
            learning_status: LearningStatus::Uninitialized,
            last_calc_time: now,
        }
    }
}

/// Weighted average with a growing sample count: early samples move the
/// coefficient a lot, later ones barely. Floored at zero.
fn weighted_update(current: f64, count: u32, sample: f64) -> f64 {
    let count = f64::from(count);
    round1((current * count + sample) / (count + 1.0)).max(0.0)
}

/// One calibration step from the previous cycle's outcome.
///
/// Only an `Initialized` memory carries a usable observation. The guard
/// clauses drop cycles whose outcome cannot isolate one coefficient: an
/// idle heater says nothing, a saturated one that still missed the
/// setpoint says nothing about the gain. A rising room attributes the
/// outcome to `const_c`; otherwise, with a cold outdoors, the shortfall
/// is attributed to `const_t`. No matching rule leaves the coefficients
/// untouched.
pub fn calibrate(
    coeffs: &ThermalCoefficients,
    memory: &CycleMemory,
    now: DateTime<Local>,
    indoor: f64,
    outdoor: Option<f64>,
    period_minutes: u32,
) -> ThermalCoefficients {
    if memory.learning_status != LearningStatus::Initialized {
        return *coeffs;
    }
    if memory.power_pct == 0.0 {
        return *coeffs;
    }
    if memory.power_pct == 100.0 && indoor < memory.setpoint {
        return *coeffs;
    }

    let elapsed = (now - memory.last_calc_time).num_seconds() as f64;
    let period = f64::from(period_minutes) * 60.0;

    if indoor > memory.indoor_temp && memory.setpoint > memory.indoor_temp {
        let sample = coeffs.const_c * (memory.setpoint - memory.indoor_temp)
            / (indoor - memory.indoor_temp)
            * (elapsed / period);
        let mut next = *coeffs;
        next.const_c = weighted_update(coeffs.const_c, coeffs.learn_count_c, sample);
        next.learn_count_c = (coeffs.learn_count_c + 1).min(50);
        return next;
    }

    if let Some(outdoor) = outdoor {
        if outdoor < memory.setpoint {
            let sample = coeffs.const_t
                + (memory.setpoint - indoor) / (memory.setpoint - outdoor)
                    * coeffs.const_c
                    * (elapsed / period);
            let mut next = *coeffs;
            next.const_t = weighted_update(coeffs.const_t, coeffs.learn_count_t, sample);
            next.learn_count_t = (coeffs.learn_count_t + 1).min(50);
            return next;
        }
    }

    *coeffs
}
