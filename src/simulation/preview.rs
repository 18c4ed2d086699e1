use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use tracing::debug;

use super::VirtualBattery;
use crate::domain::{EnergyStats, ForecastHour, Price, Settings, SolarMode, SystemStatus};
use crate::forecast::{ForecastInput, HourlyEstimate, LoadSolarForecaster};
use crate::policy::{ArbitragePolicy, BatteryModel, DeficitCapacityPredictor, PolicyInput};

/// Hours covered by a preview.
pub const PREVIEW_HOURS: usize = 24;
/// Look-ahead the predictor gets at every preview step.
const LOOKAHEAD_HOURS: usize = 24;

#[derive(Debug, Clone, Copy)]
pub struct PreviewInput<'a> {
    pub settings: &'a Settings,
    pub status: &'a SystemStatus,
    pub history: &'a [EnergyStats],
    pub tz: Tz,
    pub now: DateTime<Utc>,
    pub current_price: &'a Price,
    pub future_prices: &'a [Price],
}

/// Replays the policy over a forecasted day for display. Never touches hardware.
#[derive(Debug, Clone, Default)]
pub struct Simulator<F> {
    forecaster: F,
    predictor: DeficitCapacityPredictor,
    policy: ArbitragePolicy,
}

impl<F: LoadSolarForecaster> Simulator<F> {
    pub fn new(forecaster: F) -> Self {
        Self {
            forecaster,
            predictor: DeficitCapacityPredictor,
            policy: ArbitragePolicy,
        }
    }

    pub fn preview(&self, input: &PreviewInput<'_>) -> Vec<ForecastHour> {
        let forecast = self.forecaster.forecast(&ForecastInput {
            history: input.history,
            settings: input.settings,
            tz: input.tz,
            now: input.now,
            horizon_hours: PREVIEW_HOURS + LOOKAHEAD_HOURS,
        });

        let mut battery = VirtualBattery::new(BatteryModel::from_status(input.status, input.settings));
        let mut price = input.current_price.clone();
        let mut out = Vec::with_capacity(PREVIEW_HOURS);

        for (i, hour) in forecast.hours.iter().take(PREVIEW_HOURS).enumerate() {
            // First step starts mid-hour at `now`.
            let at = if i == 0 { input.now } else { hour.ts };
            price = price_for(hour.ts, input, &price);

            let lookahead: &[HourlyEstimate] =
                &forecast.hours[i..(i + LOOKAHEAD_HOURS).min(forecast.hours.len())];
            let model = battery.snapshot();
            let prediction = self.predictor.predict(&model, lookahead);

            let status = SystemStatus {
                timestamp: at,
                battery_soc: model.soc_percent,
                ..input.status.clone()
            };
            let decision = self.policy.decide(&PolicyInput {
                settings: input.settings,
                status: &status,
                now: at,
                current_price: &price,
                future_prices: input.future_prices,
                prediction: &prediction,
            });

            battery.step(decision.battery_mode, hour.solar_kwh, hour.home_kwh);

            let solar_opp = if decision.solar_mode == SolarMode::Any && price.dollars_per_kwh > 0.0 {
                price.dollars_per_kwh
            } else {
                0.0
            };
            out.push(ForecastHour {
                ts: hour.ts,
                hour: hour.ts.with_timezone(&input.tz).hour(),
                net_load_solar_kwh: hour.net_kwh(),
                grid_charge_dollars_per_kwh: price.total(),
                solar_opp_dollars_per_kwh: solar_opp,
                avg_home_load_kwh: hour.home_kwh,
                predicted_solar_kwh: hour.solar_kwh,
                battery_kwh: battery.energy_kwh,
                battery_capacity_kwh: model.capacity_kwh,
                battery_reserve_kwh: model.reserve_kwh(),
                today_solar_trend: hour.solar_trend,
                battery_mode: Some(decision.battery_mode),
                reason: Some(decision.reason),
            });
        }

        debug!(
            hours = out.len(),
            low_confidence = forecast.low_confidence,
            trend_ratio = forecast.trend_ratio,
            "preview simulated"
        );
        out
    }
}

/// Price for the hour starting at `ts`; the last known price carries forward.
fn price_for(ts: DateTime<Utc>, input: &PreviewInput<'_>, last: &Price) -> Price {
    if input.current_price.covers(ts) {
        return input.current_price.clone();
    }
    match input.future_prices.iter().find(|p| p.covers(ts)) {
        Some(p) => p.clone(),
        None => Price {
            ts_start: ts,
            ts_end: ts + Duration::hours(1),
            ..last.clone()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BatteryMode, Reason};
    use crate::forecast::HourlyProfileForecaster;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 4, 10, 20, 0).unwrap()
    }

    fn status(soc: f64) -> SystemStatus {
        SystemStatus {
            timestamp: now(),
            battery_soc: soc,
            battery_capacity_kwh: 10.0,
            each_battery_soc: vec![soc],
            solar_kw: 0.0,
            home_kw: 1.0,
            grid_kw: 1.0,
            battery_kw: 0.0,
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

    #[test]
    fn test_preview_without_history_is_contiguous() {
        let settings = Settings::default();
        let status = status(80.0);
        let current = Price::hourly(now(), 0.15);
        let hours = Simulator::new(HourlyProfileForecaster).preview(&PreviewInput {
            settings: &settings,
            status: &status,
            history: &[],
            tz: chrono_tz::UTC,
            now: now(),
            current_price: &current,
            future_prices: &[],
        });

        assert_eq!(hours.len(), PREVIEW_HOURS);
        for pair in hours.windows(2) {
            assert_eq!(pair[1].ts - pair[0].ts, Duration::hours(1));
        }
        // Flat 1 kWh load, no solar; unknown prices reuse the current one.
        assert!(hours.iter().all(|h| (h.grid_charge_dollars_per_kwh - 0.15).abs() < 1e-12));
        assert!(hours.iter().all(|h| h.net_load_solar_kwh == -1.0));
        assert!(hours.iter().all(|h| h.battery_kwh >= h.battery_reserve_kwh - 1e-9));
        assert_eq!(hours[0].battery_reserve_kwh, 2.0);
    }

    #[test]
    fn test_preview_charges_in_cheap_hour() {
        let settings = Settings {
            always_charge_under_dollars_per_kwh: 0.05,
            ..Default::default()
        };
        let status = status(50.0);
        let current = Price::hourly(now(), 0.15);
        let future = vec![Price::hourly(now() + Duration::hours(1), 0.01)];
        let hours = Simulator::new(HourlyProfileForecaster).preview(&PreviewInput {
            settings: &settings,
            status: &status,
            history: &[],
            tz: chrono_tz::UTC,
            now: now(),
            current_price: &current,
            future_prices: &future,
        });
        assert_eq!(hours[1].reason, Some(Reason::AlwaysChargeBelowThreshold));
        assert_eq!(hours[1].battery_mode, Some(BatteryMode::ChargeAny));
        assert!(hours[1].battery_kwh > hours[0].battery_kwh);
        // The cheap price carries forward to later hours.
        assert!((hours[5].grid_charge_dollars_per_kwh - 0.01).abs() < 1e-12);
    }
}
