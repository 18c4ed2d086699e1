use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Realized energy flows for one hour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyStats {
    pub ts_hour_start: DateTime<Utc>,
    pub min_battery_soc: f64,
    pub max_battery_soc: f64,

    pub solar_kwh: f64,
    pub home_kwh: f64,
    pub battery_used_kwh: f64,
    pub battery_charged_kwh: f64,
    pub grid_import_kwh: f64,
    pub grid_export_kwh: f64,

    pub solar_to_home_kwh: f64,
    pub solar_to_battery_kwh: f64,
    pub solar_to_grid_kwh: f64,
    pub battery_to_home_kwh: f64,
    pub battery_to_grid_kwh: f64,
    pub grid_to_home_kwh: f64,
    pub grid_to_battery_kwh: f64,
}

impl EnergyStats {
    /// Energy the battery took from the grid rather than from solar.
    pub fn grid_charged_kwh(&self) -> f64 {
        (self.battery_charged_kwh - self.solar_to_battery_kwh).max(0.0)
    }
}
