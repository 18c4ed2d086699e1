pub mod safety;
pub mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use tracing::{error, info, warn, Instrument, Span};
use uuid::Uuid;

pub use safety::{SafetyGate, SafetyOverride, SafetyState};
pub use scheduler::{BatchReport, BatchRunner};

use crate::api::{ForecastResponse, SavingsResponse, SettingsDocument, UpdateResponse};
use crate::config::{Config, ControllerConfig};
use crate::domain::{hour_start, Action, BatteryMode, EnergyStats, Price, Settings, SolarMode, SystemStatus};
use crate::error::{ControlError, ControlResult};
use crate::forecast::{ForecastInput, HourlyProfileForecaster, LoadSolarForecaster};
use crate::hardware::{EnergyStorageSystem, SimulatedStorage};
use crate::policy::{ArbitragePolicy, BatteryModel, DeficitCapacityPredictor, PolicyInput};
use crate::prices::{CachedPriceProvider, Clock, HttpPriceProvider, PriceCache, PriceProvider, SystemClock};
use crate::repo::Repositories;
use crate::savings::SavingsAccountant;
use crate::simulation::{PreviewInput, Simulator};
use crate::telemetry;

/// Identity of one controlled site.
#[derive(Debug, Clone)]
pub struct Site {
    pub id: String,
    pub tz: Tz,
    /// Key of the shared price feed this site buys from.
    pub price_provider: String,
}

/// How many hours a backfill touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub energy_hours: usize,
    pub price_hours: usize,
}

/// Last stage a cycle entered, read back when the deadline fires.
struct StageTracker {
    stage: Mutex<&'static str>,
}

impl StageTracker {
    fn new() -> Self {
        Self {
            stage: Mutex::new("start"),
        }
    }

    fn enter(&self, stage: &'static str) {
        *self.stage.lock() = stage;
        Span::current().record("stage", stage);
    }

    fn current(&self) -> &'static str {
        *self.stage.lock()
    }
}

/// Runs decision cycles and the per-site operations around them.
pub struct SiteController {
    site: Site,
    storage: Arc<dyn EnergyStorageSystem>,
    prices: Arc<dyn PriceProvider>,
    repos: Repositories,
    clock: Arc<dyn Clock>,
    forecaster: Arc<dyn LoadSolarForecaster>,
    predictor: DeficitCapacityPredictor,
    policy: ArbitragePolicy,
    gate: SafetyGate,
    horizon_hours: usize,
    deadline: Duration,
}

impl SiteController {
    pub fn new(
        site: Site,
        storage: Arc<dyn EnergyStorageSystem>,
        prices: Arc<dyn PriceProvider>,
        repos: Repositories,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let defaults = ControllerConfig::default();
        Self {
            site,
            storage,
            prices,
            repos,
            clock,
            forecaster: Arc::new(HourlyProfileForecaster),
            predictor: DeficitCapacityPredictor,
            policy: ArbitragePolicy,
            gate: SafetyGate,
            horizon_hours: defaults.horizon_hours,
            deadline: defaults.cycle_deadline(),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_horizon(mut self, hours: usize) -> Self {
        self.horizon_hours = hours.max(1);
        self
    }

    pub fn with_forecaster(mut self, forecaster: Arc<dyn LoadSolarForecaster>) -> Self {
        self.forecaster = forecaster;
        self
    }

    pub fn site_id(&self) -> &str {
        &self.site.id
    }

    /// One decision cycle under the cycle deadline. Writes at most one action
    /// and calls `set_modes` at most once.
    pub async fn run_cycle(&self) -> ControlResult<UpdateResponse> {
        let stages = StageTracker::new();
        let span = telemetry::cycle_span(&self.site.id);
        let result = tokio::time::timeout(self.deadline, self.cycle(&stages).instrument(span)).await;
        let result = match result {
            Ok(r) => r,
            Err(_) => Err(ControlError::DeadlineExceeded {
                stage: stages.current().to_string(),
                seconds: self.deadline.as_secs(),
            }),
        };
        if let Err(e) = &result {
            error!(
                site_id = %self.site.id,
                stage = stages.current(),
                kind = e.kind(),
                retryable = e.is_retryable(),
                error = %e,
                "cycle failed"
            );
        }
        result
    }

    async fn cycle(&self, stages: &StageTracker) -> ControlResult<UpdateResponse> {
        stages.enter("settings");
        let settings = self.repos.settings.get(&self.site.id).await?.value;
        settings.check()?;

        stages.enter("status");
        let status = self.storage.get_status().await?;

        stages.enter("current_price");
        let price = self.prices.current_price().await;

        let now = self.clock.now();
        let safety = self.gate.evaluate(&settings, &status, now);
        if let Some(gated) = safety.override_action() {
            // The override is recorded even when the price feed is down.
            let price = price
                .map_err(|e| warn!(site_id = %self.site.id, error = %e, "current price unavailable"))
                .ok();
            stages.enter("record");
            let action = Action {
                id: Uuid::new_v4(),
                site_id: self.site.id.clone(),
                timestamp: now,
                battery_mode: BatteryMode::NoChange,
                solar_mode: SolarMode::NoChange,
                reason: gated.reason,
                description: gated.description,
                current_price: price.as_ref().map(Price::total),
                future_price: None,
                deficit_at: None,
                capacity_at: None,
                fault: gated.fault,
                paused: gated.paused,
                dry_run: settings.dry_run,
                system_status: status,
            };
            self.repos.actions.append(&action).await?;
            info!(reason = %action.reason, fault = action.fault, "policy overridden");
            return Ok(UpdateResponse::new(action, price));
        }
        let price = price?;

        stages.enter("future_prices");
        let future = self.future_prices_or_empty().await;

        stages.enter("history");
        let history = self.sync_history(&settings, now).await?;

        stages.enter("decide");
        let forecast = self.forecaster.forecast(&ForecastInput {
            history: &history,
            settings: &settings,
            tz: self.site.tz,
            now,
            horizon_hours: self.horizon_hours,
        });
        let prediction = self
            .predictor
            .predict(&BatteryModel::from_status(&status, &settings), &forecast.hours);
        let decision = self.policy.decide(&PolicyInput {
            settings: &settings,
            status: &status,
            now,
            current_price: &price,
            future_prices: &future,
            prediction: &prediction,
        });
        info!(
            reason = %decision.reason,
            battery_mode = %decision.battery_mode,
            solar_mode = %decision.solar_mode,
            low_confidence = forecast.low_confidence,
            dry_run = settings.dry_run,
            "decision"
        );

        let action = Action {
            id: Uuid::new_v4(),
            site_id: self.site.id.clone(),
            timestamp: now,
            battery_mode: decision.battery_mode,
            solar_mode: decision.solar_mode,
            reason: decision.reason,
            description: decision.description,
            current_price: decision.current_price,
            future_price: decision.future_price,
            deficit_at: decision.deficit_at,
            capacity_at: decision.capacity_at,
            fault: false,
            paused: false,
            dry_run: settings.dry_run,
            system_status: status,
        };

        if action.changes_hardware() {
            stages.enter("set_modes");
            self.storage.set_modes(action.battery_mode, action.solar_mode).await?;
        }

        stages.enter("record");
        self.repos.actions.append(&action).await?;
        Ok(UpdateResponse::new(action, Some(price)))
    }

    async fn future_prices_or_empty(&self) -> Vec<Price> {
        match self.prices.future_prices().await {
            Ok(prices) => prices,
            Err(e) => {
                warn!(site_id = %self.site.id, error = %e, "future prices unavailable, continuing without");
                Vec::new()
            }
        }
    }

    /// Pull recent hourly history from the device into the store and read
    /// the window back. Device failures fall back to what is stored.
    async fn sync_history(&self, settings: &Settings, now: DateTime<Utc>) -> ControlResult<Vec<EnergyStats>> {
        let end = hour_start(now) + ChronoDuration::hours(1);
        let start = hour_start(now) - ChronoDuration::days(settings.history_days as i64 + 1);
        match self.storage.get_energy_history(start, end).await {
            Ok(fetched) => {
                self.repos.energy.upsert(&self.site.id, &fetched).await?;
            }
            Err(e) if e.is_retryable() => {
                warn!(site_id = %self.site.id, error = %e, "energy history unavailable, using stored history");
            }
            Err(e) => return Err(e),
        }
        let stored = self.repos.energy.range(&self.site.id, start, end).await?;
        Ok(stored.into_iter().map(|v| v.value).collect())
    }

    pub async fn get_settings(&self) -> ControlResult<SettingsDocument> {
        let stored = self.repos.settings.get(&self.site.id).await?;
        Ok(SettingsDocument {
            settings: stored.value,
            revision: stored.revision,
        })
    }

    /// Validate, push to the hardware, then store if nobody wrote in between.
    pub async fn update_settings(&self, settings: Settings, expected_revision: u64) -> ControlResult<SettingsDocument> {
        settings.check()?;
        let current = self.repos.settings.get(&self.site.id).await?;
        if current.revision != expected_revision {
            return Err(ControlError::Conflict(format!(
                "settings for {} are at revision {}, not {}",
                self.site.id, current.revision, expected_revision
            )));
        }
        self.storage.apply_settings(&settings).await?;
        let revision = self
            .repos
            .settings
            .put(&self.site.id, &settings, expected_revision)
            .await?;
        info!(site_id = %self.site.id, revision, pause = settings.pause, "settings updated");
        Ok(SettingsDocument { settings, revision })
    }

    /// Import settled energy and prices for `[start, end)`.
    pub async fn backfill(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ControlResult<BackfillReport> {
        let stats = self.storage.get_energy_history(start, end).await?;
        let energy_hours = self.repos.energy.upsert(&self.site.id, &stats).await?;
        let prices = self.prices.confirmed_prices(start, end).await?;
        let price_hours = self
            .repos
            .prices
            .upsert(&self.site.price_provider, &prices)
            .await?;
        info!(site_id = %self.site.id, energy_hours, price_hours, "backfill complete");
        Ok(BackfillReport {
            energy_hours,
            price_hours,
        })
    }

    /// Savings over `[start, end)` from stored energy and prices.
    pub async fn savings(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ControlResult<SavingsResponse> {
        let stats: Vec<EnergyStats> = self
            .repos
            .energy
            .range(&self.site.id, start, end)
            .await?
            .into_iter()
            .map(|v| v.value)
            .collect();
        let prices: Vec<Price> = self
            .repos
            .prices
            .range(&self.site.price_provider, start, end)
            .await?
            .into_iter()
            .map(|v| v.value)
            .collect();
        let accountant = SavingsAccountant;
        let report = accountant.reconcile(start, end, &stats, &prices);
        let max_age = accountant.cache_max_age(end, self.clock.now(), self.site.tz);
        Ok(SavingsResponse::new(report, max_age))
    }

    /// Policy-only preview of the next 24 hours. Ignores the safety gate and
    /// never touches hardware modes.
    pub async fn preview(&self) -> ControlResult<ForecastResponse> {
        let settings = self.repos.settings.get(&self.site.id).await?.value;
        settings.check()?;
        let status: SystemStatus = self.storage.get_status().await?;
        let price = self.prices.current_price().await?;
        let future = self.future_prices_or_empty().await;
        let now = self.clock.now();
        let start = hour_start(now) - ChronoDuration::days(settings.history_days as i64 + 1);
        let history: Vec<EnergyStats> = self
            .repos
            .energy
            .range(&self.site.id, start, now)
            .await?
            .into_iter()
            .map(|v| v.value)
            .collect();

        Ok(Simulator::new(self.forecaster.clone()).preview(&PreviewInput {
            settings: &settings,
            status: &status,
            history: &history,
            tz: self.site.tz,
            now,
            current_price: &price,
            future_prices: &future,
        }))
    }
}

/// Everything the binary runs: one controller per configured site.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub repos: Repositories,
    pub price_cache: Arc<PriceCache>,
    pub sites: Vec<Arc<SiteController>>,
    simulators: Vec<Arc<SimulatedStorage>>,
}

impl AppState {
    /// Wire simulated storage and cached HTTP price feeds for every site.
    pub fn new(cfg: Config) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let repos = Repositories::in_memory();
        let price_cache = Arc::new(PriceCache::with_ttls(
            clock.clone(),
            ChronoDuration::seconds(cfg.prices.current_ttl_seconds),
            ChronoDuration::seconds(cfg.prices.future_ttl_seconds),
        ));
        let http: Arc<dyn PriceProvider> = Arc::new(HttpPriceProvider::new(
            cfg.prices.base_url.clone(),
            Duration::from_secs(cfg.prices.http_timeout_seconds),
            cfg.prices.max_retries,
        )?);

        let mut sites = Vec::with_capacity(cfg.sites.len());
        let mut simulators = Vec::with_capacity(cfg.sites.len());
        for site_cfg in &cfg.sites {
            let site = Site {
                id: site_cfg.id.clone(),
                tz: site_cfg.tz()?,
                price_provider: site_cfg.price_provider.clone(),
            };
            let storage = Arc::new(SimulatedStorage::new(site_cfg.battery.clone(), clock.now()));
            simulators.push(storage.clone());
            let prices = Arc::new(CachedPriceProvider::new(
                site_cfg.price_provider.clone(),
                http.clone(),
                price_cache.clone(),
            ));
            let controller = SiteController::new(site, storage, prices, repos.clone(), clock.clone())
                .with_deadline(cfg.controller.cycle_deadline())
                .with_horizon(cfg.controller.horizon_hours);
            sites.push(Arc::new(controller));
        }

        Ok(Self {
            cfg,
            repos,
            price_cache,
            sites,
            simulators,
        })
    }

    /// Move every simulated storage system forward to `now`.
    pub async fn advance_simulations(&self, now: DateTime<Utc>) {
        for sim in &self.simulators {
            sim.advance_to(now).await;
        }
    }

    pub fn batch(&self) -> BatchRunner {
        BatchRunner::new(self.sites.clone())
    }
}
