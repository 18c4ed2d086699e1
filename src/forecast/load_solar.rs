use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::BellCurve;
use crate::domain::{hour_start, EnergyStats, Settings};

/// Load assumed for every hour when history is too short.
pub const DEFAULT_HOME_LOAD_KWH: f64 = 1.0;
/// Completed days of history needed for a history-based forecast.
pub const MIN_HISTORY_DAYS: usize = 2;
/// Below this much expected solar so far the trend ratio stays neutral.
const MIN_EXPECTED_SOLAR_KWH: f64 = 0.05;

/// Everything the forecaster looks at.
#[derive(Debug, Clone, Copy)]
pub struct ForecastInput<'a> {
    pub history: &'a [EnergyStats],
    pub settings: &'a Settings,
    pub tz: Tz,
    pub now: DateTime<Utc>,
    pub horizon_hours: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyEstimate {
    pub ts: DateTime<Utc>,
    pub local_hour: u32,
    pub home_kwh: f64,
    pub solar_kwh: f64,
    /// Trend factor applied to this hour's solar (1.0 when none).
    pub solar_trend: f64,
}

impl HourlyEstimate {
    pub fn net_kwh(&self) -> f64 {
        self.solar_kwh - self.home_kwh
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSolarForecast {
    pub generated_at: DateTime<Utc>,
    pub hours: Vec<HourlyEstimate>,
    pub trend_ratio: f64,
    pub days_of_history: usize,
    pub low_confidence: bool,
}

pub trait LoadSolarForecaster: Send + Sync {
    fn forecast(&self, input: &ForecastInput<'_>) -> LoadSolarForecast;
}

impl<T: LoadSolarForecaster + ?Sized> LoadSolarForecaster for std::sync::Arc<T> {
    fn forecast(&self, input: &ForecastInput<'_>) -> LoadSolarForecast {
        (**self).forecast(input)
    }
}

/// Per-hour-of-day averages of recent history, with today's solar trend and
/// optional bell-curve smoothing applied to the rest of today.
#[derive(Debug, Default, Clone, Copy)]
pub struct HourlyProfileForecaster;

impl LoadSolarForecaster for HourlyProfileForecaster {
    fn forecast(&self, input: &ForecastInput<'_>) -> LoadSolarForecast {
        let local_now = input.now.with_timezone(&input.tz);
        let today = local_now.date_naive();
        let start = hour_start(input.now);

        let oldest = today - Duration::days(input.settings.history_days.max(1) as i64);
        let completed: Vec<&EnergyStats> = input
            .history
            .iter()
            .filter(|s| (oldest..today).contains(&local_date(s, input.tz)))
            .collect();
        let days = complete_days(&completed, input.tz);

        if days < MIN_HISTORY_DAYS {
            debug!(days, "not enough history, using flat default forecast");
            return flat_forecast(input, start, days);
        }

        let profile = HourProfile::build(&completed, input.tz, input.settings.ignore_hour_usage_over_multiple);

        let elapsed_today: Vec<&EnergyStats> = input
            .history
            .iter()
            .filter(|s| local_date(s, input.tz) == today && s.ts_hour_start < start)
            .collect();
        let trend_ratio = trend_ratio(
            &elapsed_today,
            &profile.solar,
            input.tz,
            input.settings.solar_trend_ratio_max,
        );

        let adjusted: [f64; 24] = std::array::from_fn(|h| profile.solar[h] * trend_ratio);
        let peak = adjusted.iter().cloned().fold(0.0_f64, f64::max);
        let bell = BellCurve::fit(&profile.solar, peak);
        let weight = input.settings.solar_bell_curve_multiplier.clamp(0.0, 1.0);
        let cap_ratio = input.settings.solar_trend_ratio_max.max(1.0);

        let hours = (0..input.horizon_hours as i64)
            .map(|i| {
                let ts = start + Duration::hours(i);
                let local = ts.with_timezone(&input.tz);
                let h = local.hour() as usize;
                let same_day = local.date_naive() == today;

                let (solar, solar_trend) = if same_day {
                    let smoothed = match bell {
                        Some(curve) => (1.0 - weight) * adjusted[h] + weight * curve.at(h as u32),
                        None => adjusted[h],
                    };
                    (smoothed, trend_ratio)
                } else {
                    (profile.solar[h], 1.0)
                };

                HourlyEstimate {
                    ts,
                    local_hour: h as u32,
                    home_kwh: profile.load[h],
                    solar_kwh: solar.min(profile.solar_max[h] * cap_ratio).max(0.0),
                    solar_trend,
                }
            })
            .collect();

        LoadSolarForecast {
            generated_at: input.now,
            hours,
            trend_ratio,
            days_of_history: days,
            low_confidence: false,
        }
    }
}

fn local_date(stats: &EnergyStats, tz: Tz) -> NaiveDate {
    stats.ts_hour_start.with_timezone(&tz).date_naive()
}

/// Local dates whose every hour is present.
fn complete_days(samples: &[&EnergyStats], tz: Tz) -> usize {
    samples
        .iter()
        .into_group_map_by(|s| local_date(s, tz))
        .into_iter()
        .filter(|(date, rows)| {
            let covered = rows.iter().map(|s| s.ts_hour_start).unique().count() as i64;
            covered >= hours_in_day(*date, tz)
        })
        .count()
}

/// 23 or 25 on DST transition days.
fn hours_in_day(date: NaiveDate, tz: Tz) -> i64 {
    let midnight = |d: NaiveDate| {
        d.and_hms_opt(0, 0, 0)
            .and_then(|m| m.and_local_timezone(tz).earliest())
    };
    match (midnight(date), date.succ_opt().and_then(midnight)) {
        (Some(start), Some(end)) => (end - start).num_hours(),
        _ => 24,
    }
}

fn local_hour(stats: &EnergyStats, tz: Tz) -> usize {
    stats.ts_hour_start.with_timezone(&tz).hour() as usize
}

fn flat_forecast(input: &ForecastInput<'_>, start: DateTime<Utc>, days: usize) -> LoadSolarForecast {
    let hours = (0..input.horizon_hours as i64)
        .map(|i| {
            let ts = start + Duration::hours(i);
            HourlyEstimate {
                ts,
                local_hour: ts.with_timezone(&input.tz).hour(),
                home_kwh: DEFAULT_HOME_LOAD_KWH,
                solar_kwh: 0.0,
                solar_trend: 1.0,
            }
        })
        .collect();
    LoadSolarForecast {
        generated_at: input.now,
        hours,
        trend_ratio: 1.0,
        days_of_history: days,
        low_confidence: true,
    }
}

/// Outlier-filtered per-hour averages plus the raw per-hour solar maximum.
#[derive(Debug, Clone)]
struct HourProfile {
    load: [f64; 24],
    solar: [f64; 24],
    solar_max: [f64; 24],
}

impl HourProfile {
    fn build(samples: &[&EnergyStats], tz: Tz, outlier_multiple: f64) -> Self {
        let by_hour = samples.iter().into_group_map_by(|s| local_hour(s, tz));

        let mut load = [f64::NAN; 24];
        let mut solar = [0.0; 24];
        let mut solar_max = [0.0; 24];
        for (h, rows) in &by_hour {
            let loads: Vec<f64> = rows.iter().map(|s| s.home_kwh).collect();
            let solars: Vec<f64> = rows.iter().map(|s| s.solar_kwh.max(0.0)).collect();
            load[*h] = filtered_mean(&loads, outlier_multiple);
            solar[*h] = filtered_mean(&solars, outlier_multiple);
            solar_max[*h] = solars.iter().cloned().fold(0.0, f64::max);
        }

        // Hours never observed (gaps, DST) borrow the average of the others.
        let known: Vec<f64> = load.iter().cloned().filter(|v| v.is_finite()).collect();
        let fallback = if known.is_empty() {
            DEFAULT_HOME_LOAD_KWH
        } else {
            known.iter().sum::<f64>() / known.len() as f64
        };
        for v in load.iter_mut().filter(|v| !v.is_finite()) {
            *v = fallback;
        }

        Self { load, solar, solar_max }
    }
}

/// Average of `values`, ignoring samples above `multiple` × the plain
/// average. Falls back to the plain average if everything would be dropped.
pub fn filtered_mean(values: &[f64], multiple: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if multiple <= 0.0 || mean <= 0.0 {
        return mean;
    }
    let limit = mean * multiple;
    let kept: Vec<f64> = values.iter().cloned().filter(|v| *v <= limit).collect();
    if kept.is_empty() {
        return mean;
    }
    kept.iter().sum::<f64>() / kept.len() as f64
}

fn trend_ratio(elapsed_today: &[&EnergyStats], baseline: &[f64; 24], tz: Tz, ratio_max: f64) -> f64 {
    let actual: f64 = elapsed_today.iter().map(|s| s.solar_kwh.max(0.0)).sum();
    let expected: f64 = elapsed_today
        .iter()
        .map(|s| local_hour(s, tz))
        .unique()
        .map(|h| baseline[h])
        .sum();
    if expected < MIN_EXPECTED_SOLAR_KWH {
        return 1.0;
    }
    let max = ratio_max.max(1.0);
    (actual / expected).clamp(1.0 / max, max)
}
