use serde::{Deserialize, Serialize};

/// Comfort profile selecting a target temperature.
///
/// `None` is the manual profile: the zone runs on whatever target the
/// user last dialled in, remembered across preset switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    None,
    Away,
    Eco,
    Comfort,
}

impl Preset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::None => "none",
            Preset::Away => "away",
            Preset::Eco => "eco",
            Preset::Comfort => "comfort",
        }
    }

    pub fn from_name(name: &str) -> Option<Preset> {
        match name {
            "none" => Some(Preset::None),
            "away" => Some(Preset::Away),
            "eco" => Some(Preset::Eco),
            "comfort" => Some(Preset::Comfort),
            _ => None,
        }
    }
}

/// Per-zone preset temperatures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PresetTable {
    #[serde(default = "PresetTable::default_away")]
    pub away: f64,
    #[serde(default = "PresetTable::default_eco")]
    pub eco: f64,
    #[serde(default = "PresetTable::default_comfort")]
    pub comfort: f64,
}

impl PresetTable {
    fn default_away() -> f64 {
        15.0
    }

    fn default_eco() -> f64 {
        17.0
    }

    fn default_comfort() -> f64 {
        19.5
    }

    /// Target for a preset, `None` for the manual profile which keeps
    /// the saved target instead.
    pub fn target_for(&self, preset: Preset) -> Option<f64> {
        match preset {
            Preset::None => None,
            Preset::Away => Some(self.away),
            Preset::Eco => Some(self.eco),
            Preset::Comfort => Some(self.comfort),
        }
    }
}

impl Default for PresetTable {
    fn default() -> PresetTable {
        PresetTable {
            away: PresetTable::default_away(),
            eco: PresetTable::default_eco(),
            comfort: PresetTable::default_comfort(),
        }
    }
}
