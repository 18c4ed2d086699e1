use serde::{Deserialize, Serialize};

use crate::domain::BatteryMode;
use crate::policy::BatteryModel;

/// Energy flows of one simulated hour (kWh).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HourFlows {
    pub solar_to_home: f64,
    pub solar_to_battery: f64,
    pub solar_to_grid: f64,
    pub battery_to_home: f64,
    pub grid_to_home: f64,
    pub grid_to_battery: f64,
}

impl HourFlows {
    pub fn grid_import(&self) -> f64 {
        self.grid_to_home + self.grid_to_battery
    }

    pub fn battery_charged(&self) -> f64 {
        self.solar_to_battery + self.grid_to_battery
    }
}

/// Simplified one-hour physical battery model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualBattery {
    pub model: BatteryModel,
    pub energy_kwh: f64,
}

impl VirtualBattery {
    pub fn new(model: BatteryModel) -> Self {
        Self {
            energy_kwh: model.energy_kwh().clamp(0.0, model.capacity_kwh.max(0.0)),
            model,
        }
    }

    pub fn soc_percent(&self) -> f64 {
        if self.model.capacity_kwh <= 0.0 {
            0.0
        } else {
            self.energy_kwh / self.model.capacity_kwh * 100.0
        }
    }

    /// Model with the current virtual state of charge.
    pub fn snapshot(&self) -> BatteryModel {
        BatteryModel {
            soc_percent: self.soc_percent(),
            ..self.model
        }
    }

    /// Advance one hour. Solar serves load first and its surplus charges the
    /// battery; a shortfall is drawn from the battery down to the reserve
    /// unless the mode holds or charges, then from the grid. `ChargeAny`
    /// tops up from the grid with whatever rate is left.
    pub fn step(&mut self, mode: BatteryMode, solar_kwh: f64, load_kwh: f64) -> HourFlows {
        let solar = solar_kwh.max(0.0);
        let load = load_kwh.max(0.0);
        let capacity = self.model.capacity_kwh.max(0.0);
        let mut flows = HourFlows::default();

        flows.solar_to_home = solar.min(load);
        let surplus = solar - flows.solar_to_home;
        let shortfall = load - flows.solar_to_home;

        let charge_limit = self.model.charge_limit_kwh();
        flows.solar_to_battery = surplus.min(charge_limit).min(capacity - self.energy_kwh).max(0.0);
        self.energy_kwh += flows.solar_to_battery;
        flows.solar_to_grid = surplus - flows.solar_to_battery;

        let discharges = !(mode == BatteryMode::Standby || mode.is_charging());
        if discharges {
            let available = (self.energy_kwh - self.model.reserve_kwh()).max(0.0);
            flows.battery_to_home = shortfall.min(self.model.discharge_limit_kwh()).min(available);
            self.energy_kwh -= flows.battery_to_home;
        }
        flows.grid_to_home = shortfall - flows.battery_to_home;

        if mode == BatteryMode::ChargeAny {
            let rate_left = (charge_limit - flows.solar_to_battery).max(0.0);
            flows.grid_to_battery = rate_left.min(capacity - self.energy_kwh).max(0.0);
            self.energy_kwh += flows.grid_to_battery;
        }

        self.energy_kwh = self.energy_kwh.clamp(0.0, capacity);
        flows
    }
}
