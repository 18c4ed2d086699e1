use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::types::hour_start;

/// Five-minute samples in a fully settled hour.
pub const FULL_HOUR_SAMPLES: u32 = 12;

/// Hourly grid price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub ts_start: DateTime<Utc>,
    pub ts_end: DateTime<Utc>,
    /// Energy price ($/kWh). May be negative.
    pub dollars_per_kwh: f64,
    /// Sum of additional per-kWh fee components (delivery, taxes).
    #[serde(default)]
    pub grid_addl_dollars_per_kwh: f64,
    /// Number of samples averaged into this price; less than a full hour
    /// means the price is still provisional.
    #[serde(default)]
    pub sample_count: u32,
}

impl Price {
    pub fn hourly(ts_start: DateTime<Utc>, dollars_per_kwh: f64) -> Self {
        let start = hour_start(ts_start);
        Self {
            ts_start: start,
            ts_end: start + Duration::hours(1),
            dollars_per_kwh,
            grid_addl_dollars_per_kwh: 0.0,
            sample_count: FULL_HOUR_SAMPLES,
        }
    }

    pub fn with_fee(mut self, fee: f64) -> Self {
        self.grid_addl_dollars_per_kwh = fee;
        self
    }

    /// Price paid per imported kWh, fees included.
    pub fn total(&self) -> f64 {
        self.dollars_per_kwh + self.grid_addl_dollars_per_kwh
    }

    pub fn is_confirmed(&self) -> bool {
        self.sample_count >= FULL_HOUR_SAMPLES
    }

    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        at >= self.ts_start && at < self.ts_end
    }
}
