//! Property area figures as they appear in the cadastre attribute table.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AreaSummary {
    pub area_m2: f64,
    pub area_ha: f64,
    pub area_km2: f64,
    pub fiscal_modules: f64,
    pub fiscal_module_ha: f64,
}

impl AreaSummary {
    pub fn from_m2(area_m2: f64, fiscal_module_ha: f64) -> Self {
        let area_ha = area_m2 / 10_000.0;
        let fiscal_modules = if fiscal_module_ha > 0.0 {
            area_ha / fiscal_module_ha
        } else {
            0.0
        };
        Self {
            area_m2: round_to(area_m2, 2),
            area_ha: round_to(area_ha, 4),
            area_km2: round_to(area_m2 / 1_000_000.0, 4),
            fiscal_modules: round_to(fiscal_modules, 2),
            fiscal_module_ha,
        }
    }

    /// Small properties (up to four fiscal modules) have a softer regime for
    /// APP recovery; reported for the reviewer only.
    pub fn is_small_property(&self) -> bool {
        self.fiscal_modules <= 4.0
    }
}

/// Hectares with the four decimals SICAR stores.
pub fn hectares(area_m2: f64) -> f64 {
    round_to(area_m2 / 10_000.0, 4)
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
