use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::{Authenticator, EnergyStorageSystem, TokenSession};
use crate::domain::{
    hour_start, BatteryMode, EnergyStats, Settings, SolarMode, StormWindow, SystemAlarm, SystemStatus,
};
use crate::error::{ControlError, ControlResult};
use crate::policy::BatteryModel;
use crate::simulation::VirtualBattery;

const SERVICE: &str = "simulated storage";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedStorageConfig {
    pub capacity_kwh: f64,
    pub initial_soc: f64,
    pub max_charge_kw: f64,
    pub max_discharge_kw: f64,
    /// Peak solar output at noon (UTC).
    pub solar_peak_kw: f64,
    pub base_load_kw: f64,
    pub can_export_solar: bool,
    pub can_import_battery: bool,
}

impl Default for SimulatedStorageConfig {
    fn default() -> Self {
        Self {
            capacity_kwh: 13.5,
            initial_soc: 50.0,
            max_charge_kw: 5.0,
            max_discharge_kw: 5.0,
            solar_peak_kw: 4.0,
            base_load_kw: 0.8,
            can_export_solar: true,
            can_import_battery: true,
        }
    }
}

#[derive(Debug)]
struct SimState {
    now: DateTime<Utc>,
    battery: VirtualBattery,
    battery_mode: BatteryMode,
    solar_mode: SolarMode,
    reserve_percent: f64,
    export_allowed: bool,
    alarms: Vec<SystemAlarm>,
    storms: Vec<StormWindow>,
    emergency_mode: bool,
    offline: bool,
    history: Vec<EnergyStats>,
    valid_token: Option<String>,
    last_flows: (f64, f64, f64, f64),
}

/// Token issuer of the simulated vendor API.
pub struct SimulatedAuth {
    issued: AtomicUsize,
    state: Arc<RwLock<SimState>>,
}

#[async_trait]
impl Authenticator for SimulatedAuth {
    async fn login(&self) -> ControlResult<String> {
        let token = format!("sim-{}", self.issued.fetch_add(1, Ordering::SeqCst));
        self.state.write().await.valid_token = Some(token.clone());
        Ok(token)
    }
}

/// In-process storage system driven by a synthetic load/solar profile.
///
/// Time only moves through [`SimulatedStorage::advance_to`]; each elapsed
/// hour is stepped with the battery mode last set and recorded as history.
pub struct SimulatedStorage {
    config: SimulatedStorageConfig,
    state: Arc<RwLock<SimState>>,
    session: TokenSession<SimulatedAuth>,
    set_modes_calls: AtomicUsize,
}

impl SimulatedStorage {
    pub fn new(config: SimulatedStorageConfig, now: DateTime<Utc>) -> Self {
        let model = BatteryModel {
            soc_percent: config.initial_soc,
            capacity_kwh: config.capacity_kwh,
            max_charge_kw: config.max_charge_kw,
            max_discharge_kw: config.max_discharge_kw,
            min_reserve_percent: 0.0,
        };
        let state = Arc::new(RwLock::new(SimState {
            now,
            battery: VirtualBattery::new(model),
            battery_mode: BatteryMode::Load,
            solar_mode: SolarMode::Any,
            reserve_percent: 0.0,
            export_allowed: config.can_export_solar,
            alarms: vec![],
            storms: vec![],
            emergency_mode: false,
            offline: false,
            history: vec![],
            valid_token: None,
            last_flows: (0.0, config.base_load_kw, 0.0, 0.0),
        }));
        let session = TokenSession::new(SimulatedAuth {
            issued: AtomicUsize::new(0),
            state: state.clone(),
        });
        Self {
            config,
            state,
            session,
            set_modes_calls: AtomicUsize::new(0),
        }
    }

    fn solar_kwh(&self, hour: u32) -> f64 {
        let mid = hour as f64 + 0.5;
        if !(6.0..18.0).contains(&mid) {
            return 0.0;
        }
        (PI * (mid - 6.0) / 12.0).sin() * self.config.solar_peak_kw
    }

    fn load_kwh(&self, hour: u32) -> f64 {
        let evening = if (17..21).contains(&hour) { 1.5 } else { 1.0 };
        self.config.base_load_kw * evening
    }

    /// Step every whole hour between the simulation clock and `until`.
    pub async fn advance_to(&self, until: DateTime<Utc>) {
        let mut st = self.state.write().await;
        let mut hour = hour_start(st.now);
        while hour + Duration::hours(1) <= until {
            let h = hour.hour();
            let (solar, load) = (self.solar_kwh(h), self.load_kwh(h));
            let mode = match st.battery_mode {
                BatteryMode::NoChange => BatteryMode::Load,
                mode => mode,
            };
            st.battery.model.min_reserve_percent = st.reserve_percent;
            let soc_before = st.battery.soc_percent();
            let flows = st.battery.step(mode, solar, load);
            let soc_after = st.battery.soc_percent();

            let exported = if st.export_allowed && st.solar_mode != SolarMode::NoExport {
                flows.solar_to_grid
            } else {
                0.0
            };
            st.history.push(EnergyStats {
                ts_hour_start: hour,
                min_battery_soc: soc_before.min(soc_after),
                max_battery_soc: soc_before.max(soc_after),
                solar_kwh: flows.solar_to_home + flows.solar_to_battery + exported,
                home_kwh: load,
                battery_used_kwh: flows.battery_to_home,
                battery_charged_kwh: flows.battery_charged(),
                grid_import_kwh: flows.grid_import(),
                grid_export_kwh: exported,
                solar_to_home_kwh: flows.solar_to_home,
                solar_to_battery_kwh: flows.solar_to_battery,
                solar_to_grid_kwh: exported,
                battery_to_home_kwh: flows.battery_to_home,
                battery_to_grid_kwh: 0.0,
                grid_to_home_kwh: flows.grid_to_home,
                grid_to_battery_kwh: flows.grid_to_battery,
            });
            st.last_flows = (
                solar,
                load,
                flows.grid_import() - exported,
                flows.battery_to_home - flows.battery_charged(),
            );
            hour += Duration::hours(1);
        }
        if until > st.now {
            st.now = until;
        }
        debug!(now = %st.now, soc = st.battery.soc_percent(), "simulated storage advanced");
    }

    pub fn set_modes_calls(&self) -> usize {
        self.set_modes_calls.load(Ordering::SeqCst)
    }

    pub async fn modes(&self) -> (BatteryMode, SolarMode) {
        let st = self.state.read().await;
        (st.battery_mode, st.solar_mode)
    }

    pub async fn set_emergency_mode(&self, on: bool) {
        self.state.write().await.emergency_mode = on;
    }

    pub async fn raise_alarm(&self, alarm: SystemAlarm) {
        self.state.write().await.alarms.push(alarm);
    }

    pub async fn clear_alarms(&self) {
        self.state.write().await.alarms.clear();
    }

    pub async fn add_storm(&self, storm: StormWindow) {
        self.state.write().await.storms.push(storm);
    }

    /// While offline every call fails as a transient upstream error.
    pub async fn set_offline(&self, offline: bool) {
        self.state.write().await.offline = offline;
    }

    /// Invalidate the issued token, as a vendor API does on expiry.
    pub async fn expire_token(&self) {
        self.state.write().await.valid_token = None;
    }

    pub fn login_count(&self) -> usize {
        self.session.login_count()
    }

    async fn authorize(&self, token: &str) -> ControlResult<()> {
        let st = self.state.read().await;
        if st.offline {
            return Err(ControlError::transient(SERVICE, "connection refused"));
        }
        if st.valid_token.as_deref() != Some(token) {
            return Err(ControlError::AuthExpired("token no longer valid".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl EnergyStorageSystem for SimulatedStorage {
    async fn get_status(&self) -> ControlResult<SystemStatus> {
        self.session
            .call(|token| async move {
                self.authorize(&token).await?;
                let st = self.state.read().await;
                let soc = st.battery.soc_percent();
                let (solar, home, grid, battery) = st.last_flows;
                Ok(SystemStatus {
                    timestamp: st.now,
                    battery_soc: soc,
                    battery_capacity_kwh: self.config.capacity_kwh,
                    each_battery_soc: vec![soc],
                    solar_kw: solar,
                    home_kw: home,
                    grid_kw: grid,
                    battery_kw: battery,
                    max_charge_kw: self.config.max_charge_kw,
                    max_discharge_kw: self.config.max_discharge_kw,
                    alarms: st.alarms.clone(),
                    storms: st.storms.clone(),
                    emergency_mode: st.emergency_mode,
                    can_export_solar: self.config.can_export_solar,
                    can_export_battery: false,
                    can_import_battery: self.config.can_import_battery,
                })
            })
            .await
    }

    async fn set_modes(&self, battery_mode: BatteryMode, solar_mode: SolarMode) -> ControlResult<()> {
        self.session
            .call(|token| async move {
                self.authorize(&token).await?;
                self.set_modes_calls.fetch_add(1, Ordering::SeqCst);
                let mut st = self.state.write().await;
                if battery_mode != BatteryMode::NoChange {
                    st.battery_mode = battery_mode;
                }
                if solar_mode != SolarMode::NoChange {
                    st.solar_mode = solar_mode;
                }
                debug!(%battery_mode, %solar_mode, "simulated storage modes set");
                Ok(())
            })
            .await
    }

    async fn apply_settings(&self, settings: &Settings) -> ControlResult<()> {
        let reserve = settings.min_battery_soc;
        let export = settings.grid_export_solar && self.config.can_export_solar;
        self.session
            .call(|token| async move {
                self.authorize(&token).await?;
                let mut st = self.state.write().await;
                st.reserve_percent = reserve;
                st.export_allowed = export;
                Ok(())
            })
            .await
    }

    async fn get_energy_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ControlResult<Vec<EnergyStats>> {
        self.session
            .call(|token| async move {
                self.authorize(&token).await?;
                let st = self.state.read().await;
                Ok(st
                    .history
                    .iter()
                    .filter(|s| s.ts_hour_start >= start && s.ts_hour_start < end)
                    .cloned()
                    .collect())
            })
            .await
    }
}
