use std::collections::HashSet;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use crate::hardware::SimulatedStorageConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub controller: ControllerConfig,
    pub prices: PricesConfig,
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    pub cycle_interval_minutes: u64,
    pub cycle_deadline_seconds: u64,
    pub horizon_hours: usize,
}

impl ControllerConfig {
    pub fn cycle_deadline(&self) -> Duration {
        Duration::from_secs(self.cycle_deadline_seconds)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_minutes.max(1) * 60)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cycle_interval_minutes: 15,
            cycle_deadline_seconds: 60,
            horizon_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricesConfig {
    pub base_url: String,
    pub http_timeout_seconds: u64,
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    #[serde(default = "default_current_ttl")]
    pub current_ttl_seconds: i64,
    #[serde(default = "default_future_ttl")]
    pub future_ttl_seconds: i64,
}

fn default_retries() -> u32 {
    2
}

fn default_current_ttl() -> i64 {
    crate::prices::cache::CURRENT_PRICE_TTL_SECONDS
}

fn default_future_ttl() -> i64 {
    crate::prices::cache::FUTURE_PRICES_TTL_SECONDS
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    pub id: String,
    /// IANA zone name, e.g. `America/Chicago`.
    pub timezone: String,
    /// Sites sharing a provider key share cached prices.
    pub price_provider: String,
    #[serde(default)]
    pub battery: SimulatedStorageConfig,
}

impl SiteConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("site {}: invalid timezone {:?}: {e}", self.id, self.timezone))
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("EAC__").split("__"));
        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let cfg: Config = figment.extract().context("loading configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.controller.cycle_deadline_seconds == 0 {
            bail!("controller.cycle_deadline_seconds must be positive");
        }
        if self.controller.horizon_hours == 0 {
            bail!("controller.horizon_hours must be positive");
        }
        let mut seen = HashSet::new();
        for site in &self.sites {
            if !seen.insert(site.id.as_str()) {
                bail!("duplicate site id {:?}", site.id);
            }
            site.tz()?;
        }
        Ok(())
    }
}
