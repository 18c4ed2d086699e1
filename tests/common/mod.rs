//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use mockall::mock;

use energy_arbitrage::controller::{Site, SiteController};
use energy_arbitrage::domain::{
    hourly_steps, BatteryMode, EnergyStats, Price, Settings, SolarMode, SystemStatus,
};
use energy_arbitrage::forecast::{
    ForecastInput, HourlyEstimate, LoadSolarForecast, LoadSolarForecaster,
};
use energy_arbitrage::hardware::EnergyStorageSystem;
use energy_arbitrage::prices::{Clock, ManualClock, PriceProvider};
use energy_arbitrage::repo::Repositories;
use energy_arbitrage::ControlResult;

mock! {
    pub Storage {}

    #[async_trait]
    impl EnergyStorageSystem for Storage {
        async fn get_status(&self) -> ControlResult<SystemStatus>;
        async fn set_modes(&self, battery_mode: BatteryMode, solar_mode: SolarMode) -> ControlResult<()>;
        async fn apply_settings(&self, settings: &Settings) -> ControlResult<()>;
        async fn get_energy_history(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> ControlResult<Vec<EnergyStats>>;
    }
}

mock! {
    pub Prices {}

    #[async_trait]
    impl PriceProvider for Prices {
        async fn current_price(&self) -> ControlResult<Price>;
        async fn future_prices(&self) -> ControlResult<Vec<Price>>;
        async fn confirmed_prices(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ControlResult<Vec<Price>>;
    }
}

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn status(soc: f64) -> SystemStatus {
    SystemStatus {
        timestamp: now(),
        battery_soc: soc,
        battery_capacity_kwh: 10.0,
        each_battery_soc: vec![soc],
        solar_kw: 0.0,
        home_kw: 1.0,
        grid_kw: 0.0,
        battery_kw: 1.0,
        max_charge_kw: 5.0,
        max_discharge_kw: 5.0,
        alarms: vec![],
        storms: vec![],
        emergency_mode: false,
        can_export_solar: true,
        can_export_battery: false,
        can_import_battery: true,
    }
}

/// Price table starting at the current hour.
pub fn prices(totals: &[f64]) -> Vec<Price> {
    hourly_steps(now(), totals.len())
        .zip(totals)
        .map(|(ts, p)| Price::hourly(ts, *p))
        .collect()
}

/// Forecaster returning the same net load every hour.
#[derive(Debug, Clone, Copy)]
pub struct FlatForecaster {
    pub home_kwh: f64,
    pub solar_kwh: f64,
}

impl LoadSolarForecaster for FlatForecaster {
    fn forecast(&self, input: &ForecastInput<'_>) -> LoadSolarForecast {
        let hours = hourly_steps(input.now, input.horizon_hours)
            .map(|ts| HourlyEstimate {
                ts,
                local_hour: 0,
                home_kwh: self.home_kwh,
                solar_kwh: self.solar_kwh,
                solar_trend: 1.0,
            })
            .collect();
        LoadSolarForecast {
            generated_at: input.now,
            hours,
            trend_ratio: 1.0,
            days_of_history: 3,
            low_confidence: false,
        }
    }
}

pub fn site(id: &str) -> Site {
    Site {
        id: id.to_string(),
        tz: chrono_tz::UTC,
        price_provider: "utility-a".to_string(),
    }
}

pub fn controller(
    id: &str,
    storage: Arc<dyn EnergyStorageSystem>,
    prices: Arc<dyn PriceProvider>,
    repos: &Repositories,
    forecaster: FlatForecaster,
) -> SiteController {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(now()));
    SiteController::new(site(id), storage, prices, repos.clone(), clock)
        .with_forecaster(Arc::new(forecaster))
}

pub async fn store_settings(repos: &Repositories, site_id: &str, settings: &Settings) {
    let current = repos.settings.get(site_id).await.unwrap();
    repos
        .settings
        .put(site_id, settings, current.revision)
        .await
        .unwrap();
}

/// Storage whose status call takes `delay`; counts mode changes.
pub struct SlowStorage {
    pub delay: StdDuration,
    pub set_modes_calls: AtomicUsize,
}

impl SlowStorage {
    pub fn new(delay: StdDuration) -> Self {
        Self {
            delay,
            set_modes_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EnergyStorageSystem for SlowStorage {
    async fn get_status(&self) -> ControlResult<SystemStatus> {
        tokio::time::sleep(self.delay).await;
        Ok(status(50.0))
    }

    async fn set_modes(&self, _battery_mode: BatteryMode, _solar_mode: SolarMode) -> ControlResult<()> {
        self.set_modes_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn apply_settings(&self, _settings: &Settings) -> ControlResult<()> {
        Ok(())
    }

    async fn get_energy_history(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> ControlResult<Vec<EnergyStats>> {
        Ok(vec![])
    }
}

/// One settled hour where the battery covered `battery_kwh` of load.
pub fn settled_hour(h: i64, battery_kwh: f64, grid_charge_kwh: f64) -> EnergyStats {
    EnergyStats {
        ts_hour_start: now() - Duration::hours(48) + Duration::hours(h),
        home_kwh: 1.0 + battery_kwh,
        grid_import_kwh: 1.0 + grid_charge_kwh,
        grid_to_home_kwh: 1.0,
        grid_to_battery_kwh: grid_charge_kwh,
        battery_charged_kwh: grid_charge_kwh,
        battery_used_kwh: battery_kwh,
        battery_to_home_kwh: battery_kwh,
        ..Default::default()
    }
}
