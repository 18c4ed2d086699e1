use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Settings, SystemStatus};
use crate::forecast::HourlyEstimate;

const SOC_EPSILON: f64 = 1e-6;

/// Battery parameters the forward simulation runs on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryModel {
    pub soc_percent: f64,
    pub capacity_kwh: f64,
    /// Zero or negative means the hardware did not report a limit.
    pub max_charge_kw: f64,
    pub max_discharge_kw: f64,
    pub min_reserve_percent: f64,
}

impl BatteryModel {
    pub fn from_status(status: &SystemStatus, settings: &Settings) -> Self {
        Self {
            soc_percent: status.battery_soc.clamp(0.0, 100.0),
            capacity_kwh: status.battery_capacity_kwh,
            max_charge_kw: status.max_charge_kw,
            max_discharge_kw: status.max_discharge_kw,
            min_reserve_percent: settings.min_battery_soc.clamp(0.0, 100.0),
        }
    }

    pub fn energy_kwh(&self) -> f64 {
        self.capacity_kwh * self.soc_percent / 100.0
    }

    pub fn reserve_kwh(&self) -> f64 {
        self.capacity_kwh * self.min_reserve_percent / 100.0
    }

    /// Largest charge over one hour (kWh).
    pub fn charge_limit_kwh(&self) -> f64 {
        if self.max_charge_kw > 0.0 {
            self.max_charge_kw
        } else {
            self.capacity_kwh
        }
    }

    /// Largest discharge over one hour (kWh).
    pub fn discharge_limit_kwh(&self) -> f64 {
        if self.max_discharge_kw > 0.0 {
            self.max_discharge_kw
        } else {
            self.capacity_kwh
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedHour {
    pub ts: DateTime<Utc>,
    /// Energy stored at the end of the hour.
    pub battery_kwh: f64,
    pub soc_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// First hour the battery would sit at or below its reserve.
    pub deficit_at: Option<DateTime<Utc>>,
    /// First hour the battery would be full.
    pub capacity_at: Option<DateTime<Utc>>,
    pub trajectory: Vec<ProjectedHour>,
}

impl Prediction {
    /// Whether the battery fills up strictly before it runs low.
    pub fn capacity_before_deficit(&self) -> bool {
        match (self.capacity_at, self.deficit_at) {
            (Some(capacity), Some(deficit)) => capacity < deficit,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

/// Hour-by-hour forward simulation of the battery under the forecast.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeficitCapacityPredictor;

impl DeficitCapacityPredictor {
    pub fn predict(&self, battery: &BatteryModel, hours: &[HourlyEstimate]) -> Prediction {
        let mut prediction = Prediction::default();
        if battery.capacity_kwh <= 0.0 {
            return prediction;
        }

        let mut energy = battery.energy_kwh();
        for hour in hours {
            let net = hour
                .net_kwh()
                .clamp(-battery.discharge_limit_kwh(), battery.charge_limit_kwh());
            energy = (energy + net).clamp(0.0, battery.capacity_kwh);
            let soc = energy / battery.capacity_kwh * 100.0;

            if prediction.deficit_at.is_none() && soc <= battery.min_reserve_percent + SOC_EPSILON {
                prediction.deficit_at = Some(hour.ts);
            }
            if prediction.capacity_at.is_none() && soc >= 100.0 - SOC_EPSILON {
                prediction.capacity_at = Some(hour.ts);
            }
            prediction.trajectory.push(ProjectedHour {
                ts: hour.ts,
                battery_kwh: energy,
                soc_percent: soc,
            });
        }
        prediction
    }
}
