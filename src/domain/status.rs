use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alarm raised by the storage system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemAlarm {
    pub code: String,
    pub name: String,
    pub description: String,
    pub time: DateTime<Utc>,
}

/// Severe-weather window during which the vendor holds the battery full.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormWindow {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub description: String,
}

impl StormWindow {
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        at >= self.starts_at && at < self.ends_at
    }
}

/// Point-in-time hardware snapshot, fetched fresh every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub timestamp: DateTime<Utc>,

    /// Aggregate state of charge (%).
    pub battery_soc: f64,
    /// Usable capacity (kWh). Zero when no battery is installed.
    pub battery_capacity_kwh: f64,
    /// State of charge per battery unit (%).
    pub each_battery_soc: Vec<f64>,

    /// Live flows (kW); battery positive while discharging, grid positive
    /// while importing.
    pub solar_kw: f64,
    pub home_kw: f64,
    pub grid_kw: f64,
    pub battery_kw: f64,

    pub max_charge_kw: f64,
    pub max_discharge_kw: f64,

    pub alarms: Vec<SystemAlarm>,
    pub storms: Vec<StormWindow>,
    /// Grid outage / backup operation.
    pub emergency_mode: bool,

    pub can_export_solar: bool,
    pub can_export_battery: bool,
    pub can_import_battery: bool,
}

impl SystemStatus {
    pub fn has_battery(&self) -> bool {
        self.battery_capacity_kwh > 0.0
    }

    pub fn battery_kwh(&self) -> f64 {
        self.battery_capacity_kwh * self.battery_soc.clamp(0.0, 100.0) / 100.0
    }

    pub fn active_storm(&self, at: DateTime<Utc>) -> Option<&StormWindow> {
        self.storms.iter().find(|s| s.covers(at))
    }
}
