use serde::{Deserialize, Serialize};

/// Linear model gains relating temperature deltas to duty-cycle power.
///
/// `const_c` scales the indoor deficit (target - indoor), `const_t` the
/// loss towards outdoors (target - outdoor). Both are kept non-negative
/// and only move through [`calibration`](crate::calibration); the learn
/// counters weigh how much a new sample can still shift them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalCoefficients {
    pub const_c: f64,
    pub const_t: f64,
    pub learn_count_c: u32,
    pub learn_count_t: u32,
}

impl Default for ThermalCoefficients {
    fn default() -> ThermalCoefficients {
        ThermalCoefficients {
            const_c: 60.0,
            const_t: 1.0,
            learn_count_c: 0,
            learn_count_t: 0,
        }
    }
}

/// Rounds to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Duty-cycle power in percent needed to reach `target` over one cycle.
/// Negative means the room is already past the target; the caller clamps
/// the result into [0, 100].
pub fn required_power(
    coeffs: &ThermalCoefficients,
    target: f64,
    indoor: f64,
    outdoor: Option<f64>,
) -> f64 {
    match outdoor {
        None => round1((target - indoor) * coeffs.const_c),
        Some(out) => {
            round1((target - indoor) * coeffs.const_c + (target - out) * coeffs.const_t)
        }
    }
}
