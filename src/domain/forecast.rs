use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BatteryMode, Reason};

/// One predicted hour of the preview trajectory. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastHour {
    pub ts: DateTime<Utc>,
    /// Local hour of day (0-23).
    pub hour: u32,
    /// Solar minus load for the hour (kWh); negative means a shortfall.
    #[serde(rename = "netLoadSolarKWH")]
    pub net_load_solar_kwh: f64,
    #[serde(rename = "gridChargeDollarsPerKWH")]
    pub grid_charge_dollars_per_kwh: f64,
    /// What a kWh of solar could earn by export this hour.
    #[serde(rename = "solarOppDollarsPerKWH")]
    pub solar_opp_dollars_per_kwh: f64,
    #[serde(rename = "avgHomeLoadKWH")]
    pub avg_home_load_kwh: f64,
    #[serde(rename = "predictedSolarKWH")]
    pub predicted_solar_kwh: f64,
    #[serde(rename = "batteryKWH")]
    pub battery_kwh: f64,
    #[serde(rename = "batteryCapacityKWH")]
    pub battery_capacity_kwh: f64,
    #[serde(rename = "batteryReserveKWH")]
    pub battery_reserve_kwh: f64,
    pub today_solar_trend: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_mode: Option<BatteryMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}
