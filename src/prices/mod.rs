//! Price sources and the shared single-flight price cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::Price;
use crate::error::ControlResult;

pub mod cache;
pub mod clock;
pub mod http;

pub use cache::{CachedPriceProvider, PriceCache, TtlCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use http::HttpPriceProvider;

/// Utility price feed for one tariff.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Price of the hour in progress.
    async fn current_price(&self) -> ControlResult<Price>;

    /// Published prices for upcoming hours. May be empty.
    async fn future_prices(&self) -> ControlResult<Vec<Price>>;

    /// Settled hourly prices in `[start, end)`.
    async fn confirmed_prices(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ControlResult<Vec<Price>>;
}

/// Fixed prices, for simulation and tests.
#[derive(Debug, Clone)]
pub struct StaticPriceProvider {
    pub current: Price,
    pub future: Vec<Price>,
    pub history: Vec<Price>,
}

#[async_trait]
impl PriceProvider for StaticPriceProvider {
    async fn current_price(&self) -> ControlResult<Price> {
        Ok(self.current.clone())
    }

    async fn future_prices(&self) -> ControlResult<Vec<Price>> {
        Ok(self.future.clone())
    }

    async fn confirmed_prices(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ControlResult<Vec<Price>> {
        Ok(self
            .history
            .iter()
            .filter(|p| p.ts_start >= start && p.ts_start < end && p.is_confirmed())
            .cloned()
            .collect())
    }
}
