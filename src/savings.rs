//! Reconciles realized hourly energy flows against hourly prices.
//!
//! Savings are measured against a counterfactual home without a battery:
//! every kWh the battery served would otherwise have been imported, and
//! every kWh it took from the grid was paid for.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{hour_start, EnergyStats, Price};

/// Cache lifetime for ranges that ended before today.
pub const SETTLED_MAX_AGE: StdDuration = StdDuration::from_secs(24 * 60 * 60);
/// Cache lifetime for ranges still accumulating data.
pub const LIVE_MAX_AGE: StdDuration = StdDuration::from_secs(5 * 60);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavingsHour {
    pub ts: DateTime<Utc>,
    pub price_dollars_per_kwh: f64,
    pub fee_dollars_per_kwh: f64,
    pub price_known: bool,
    pub cost: f64,
    pub credit: f64,
    pub avoided_cost: f64,
    pub charging_cost: f64,
    pub solar_savings: f64,
}

impl SavingsHour {
    pub fn battery_savings(&self) -> f64 {
        self.avoided_cost - self.charging_cost
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub cost: f64,
    pub credit: f64,
    pub avoided_cost: f64,
    pub charging_cost: f64,
    pub solar_savings: f64,
    pub battery_savings: f64,
    /// Hours counted without a price.
    pub missing_price_hours: usize,
    pub hours: Vec<SavingsHour>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SavingsAccountant;

impl SavingsAccountant {
    /// Totals over `[start, end)`. Hours without a price count at zero.
    pub fn reconcile(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        stats: &[EnergyStats],
        prices: &[Price],
    ) -> SavingsReport {
        let by_hour: HashMap<DateTime<Utc>, &Price> =
            prices.iter().map(|p| (hour_start(p.ts_start), p)).collect();

        let mut in_range: Vec<&EnergyStats> = stats
            .iter()
            .filter(|s| s.ts_hour_start >= start && s.ts_hour_start < end)
            .collect();
        in_range.sort_by_key(|s| s.ts_hour_start);

        let hours: Vec<SavingsHour> = in_range
            .into_iter()
            .map(|s| price_hour(s, by_hour.get(&hour_start(s.ts_hour_start)).copied()))
            .collect();

        let mut report = SavingsReport {
            start,
            end,
            cost: 0.0,
            credit: 0.0,
            avoided_cost: 0.0,
            charging_cost: 0.0,
            solar_savings: 0.0,
            battery_savings: 0.0,
            missing_price_hours: 0,
            hours: Vec::new(),
        };
        for hour in &hours {
            report.cost += hour.cost;
            report.credit += hour.credit;
            report.avoided_cost += hour.avoided_cost;
            report.charging_cost += hour.charging_cost;
            report.solar_savings += hour.solar_savings;
            if !hour.price_known {
                report.missing_price_hours += 1;
            }
        }
        report.battery_savings = report.avoided_cost - report.charging_cost;
        report.hours = hours;

        if report.missing_price_hours > 0 {
            debug!(
                missing = report.missing_price_hours,
                %start,
                %end,
                "savings computed with missing hourly prices"
            );
        }
        report
    }

    /// How long a savings result for a range ending at `end` may be cached.
    pub fn cache_max_age(&self, end: DateTime<Utc>, now: DateTime<Utc>, tz: Tz) -> StdDuration {
        let today_start = now
            .with_timezone(&tz)
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| midnight.and_local_timezone(tz).earliest())
            .map(|local| local.with_timezone(&Utc));
        match today_start {
            Some(midnight) if end <= midnight => SETTLED_MAX_AGE,
            _ => LIVE_MAX_AGE,
        }
    }
}

fn price_hour(stats: &EnergyStats, price: Option<&Price>) -> SavingsHour {
    let (energy, fee) = price.map_or((0.0, 0.0), |p| (p.dollars_per_kwh, p.grid_addl_dollars_per_kwh));
    let all_in = energy + fee;
    SavingsHour {
        ts: stats.ts_hour_start,
        price_dollars_per_kwh: energy,
        fee_dollars_per_kwh: fee,
        price_known: price.is_some(),
        cost: stats.grid_import_kwh * all_in,
        credit: stats.grid_export_kwh * energy,
        avoided_cost: stats.battery_to_home_kwh * all_in,
        charging_cost: stats.grid_charged_kwh() * all_in,
        solar_savings: stats.solar_to_home_kwh * all_in,
    }
}
