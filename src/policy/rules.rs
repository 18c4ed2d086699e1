use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Prediction;
use crate::domain::{hour_start, BatteryMode, Price, Reason, Settings, SolarMode, SystemStatus};

/// Snapshot the policy decides on. Nothing here is fetched by the policy.
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput<'a> {
    pub settings: &'a Settings,
    pub status: &'a SystemStatus,
    pub now: DateTime<Utc>,
    pub current_price: &'a Price,
    pub future_prices: &'a [Price],
    pub prediction: &'a Prediction,
}

/// Outcome of one policy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub battery_mode: BatteryMode,
    pub solar_mode: SolarMode,
    pub reason: Reason,
    pub description: String,
    /// All-in current price the decision was made on.
    pub current_price: Option<f64>,
    /// Window price the decision compared against, if any.
    pub future_price: Option<f64>,
    pub deficit_at: Option<DateTime<Utc>>,
    pub capacity_at: Option<DateTime<Utc>>,
}

/// Battery half of a rule's outcome.
struct Outcome {
    battery_mode: BatteryMode,
    future_price: Option<f64>,
    description: String,
}

impl Outcome {
    fn new(battery_mode: BatteryMode, description: String) -> Self {
        Self {
            battery_mode,
            future_price: None,
            description,
        }
    }

    fn against(mut self, price: f64) -> Self {
        self.future_price = Some(price);
        self
    }
}

/// Derived view over the input the rule predicates share.
struct Context<'a> {
    input: &'a PolicyInput<'a>,
    current: f64,
    /// Future prices inside the look-ahead window, ordered by start.
    window: Vec<&'a Price>,
}

impl<'a> Context<'a> {
    fn new(input: &'a PolicyInput<'a>) -> Self {
        let this_hour = hour_start(input.now);
        let horizon = input.now + Duration::hours(input.settings.future_price_window_hours as i64);
        let mut window: Vec<&Price> = input
            .future_prices
            .iter()
            .filter(|p| p.ts_start > this_hour && p.ts_start < horizon)
            .collect();
        window.sort_by_key(|p| p.ts_start);
        Self {
            input,
            current: input.current_price.total(),
            window,
        }
    }

    fn settings(&self) -> &Settings {
        self.input.settings
    }

    fn deficit_at(&self) -> Option<DateTime<Utc>> {
        self.input.prediction.deficit_at
    }

    fn can_grid_charge(&self) -> bool {
        self.settings().grid_charge_battery && self.input.status.can_import_battery
    }

    fn window_before(&self, until: DateTime<Utc>) -> impl Iterator<Item = f64> + '_ {
        self.window
            .iter()
            .filter(move |p| p.ts_start < until)
            .map(|p| p.total())
    }

    fn cheapest_before(&self, until: DateTime<Utc>) -> Option<f64> {
        self.window_before(until).reduce(f64::min)
    }

    fn peak_before(&self, until: DateTime<Utc>) -> Option<f64> {
        self.window_before(until).reduce(f64::max)
    }

    fn window_peak(&self) -> Option<f64> {
        self.window.iter().map(|p| p.total()).reduce(f64::max)
    }

    fn window_cheapest(&self) -> Option<f64> {
        self.window.iter().map(|p| p.total()).reduce(f64::min)
    }
}

type Predicate = fn(&Context<'_>) -> Option<Outcome>;

struct Rule {
    reason: Reason,
    evaluate: Predicate,
}

/// Evaluated top to bottom; the first rule returning an outcome wins.
const RULES: [Rule; 9] = [
    Rule {
        reason: Reason::MissingBattery,
        evaluate: missing_battery,
    },
    Rule {
        reason: Reason::AlwaysChargeBelowThreshold,
        evaluate: always_charge_below_threshold,
    },
    Rule {
        reason: Reason::DeficitCharge,
        evaluate: deficit_charge,
    },
    Rule {
        reason: Reason::ArbitrageCharge,
        evaluate: arbitrage_charge,
    },
    Rule {
        reason: Reason::PreventSolarCurtailment,
        evaluate: prevent_solar_curtailment,
    },
    Rule {
        reason: Reason::DeficitSaveForPeak,
        evaluate: deficit_save_for_peak,
    },
    Rule {
        reason: Reason::WaitingToCharge,
        evaluate: waiting_to_charge,
    },
    Rule {
        reason: Reason::ArbitrageSave,
        evaluate: arbitrage_save,
    },
    Rule {
        reason: Reason::SufficientBattery,
        evaluate: sufficient_battery,
    },
];

fn missing_battery(ctx: &Context<'_>) -> Option<Outcome> {
    (!ctx.input.status.has_battery())
        .then(|| Outcome::new(BatteryMode::Standby, "No battery detected".to_string()))
}

fn always_charge_below_threshold(ctx: &Context<'_>) -> Option<Outcome> {
    let threshold = ctx.settings().always_charge_under_dollars_per_kwh;
    (ctx.can_grid_charge() && ctx.current <= threshold).then(|| {
        Outcome::new(
            BatteryMode::ChargeAny,
            format!(
                "Price {} is at or below the always-charge threshold of {}",
                dollars(ctx.current),
                dollars(threshold)
            ),
        )
    })
}

fn deficit_charge(ctx: &Context<'_>) -> Option<Outcome> {
    if !ctx.can_grid_charge() {
        return None;
    }
    let deficit = ctx.deficit_at()?;
    let delta = ctx.settings().min_deficit_price_difference_dollars_per_kwh;
    match ctx.cheapest_before(deficit) {
        Some(best) if ctx.current + delta < best => Some(
            Outcome::new(
                BatteryMode::ChargeAny,
                format!(
                    "Battery runs low at {}; charging now at {} beats the best price of {} before then",
                    clock(deficit),
                    dollars(ctx.current),
                    dollars(best)
                ),
            )
            .against(best),
        ),
        Some(_) => None,
        // Deficit is already due; only a later hour cheaper by the margin is worth waiting for.
        None => match ctx.window_cheapest() {
            Some(later) if later + delta <= ctx.current => None,
            _ => Some(Outcome::new(
                BatteryMode::ChargeAny,
                format!(
                    "Battery runs low at {}; no cheaper price is known before then",
                    clock(deficit)
                ),
            )),
        },
    }
}

fn arbitrage_charge(ctx: &Context<'_>) -> Option<Outcome> {
    if !ctx.can_grid_charge() || ctx.deficit_at().is_some() || ctx.input.status.battery_soc >= 100.0 {
        return None;
    }
    let peak = ctx.window_peak()?;
    let delta = ctx.settings().min_arbitrage_difference_dollars_per_kwh;
    (ctx.current + delta < peak).then(|| {
        Outcome::new(
            BatteryMode::ChargeAny,
            format!(
                "Charging at {} ahead of a {} peak",
                dollars(ctx.current),
                dollars(peak)
            ),
        )
        .against(peak)
    })
}

fn prevent_solar_curtailment(ctx: &Context<'_>) -> Option<Outcome> {
    let prediction = ctx.input.prediction;
    if !prediction.capacity_before_deficit() {
        return None;
    }
    let capacity = prediction.capacity_at?;
    Some(Outcome::new(
        BatteryMode::Load,
        format!(
            "Battery fills at {}; using battery to make room for solar",
            clock(capacity)
        ),
    ))
}

fn deficit_save_for_peak(ctx: &Context<'_>) -> Option<Outcome> {
    let deficit = ctx.deficit_at()?;
    let peak = ctx.peak_before(deficit)?;
    (peak > ctx.current).then(|| {
        Outcome::new(
            BatteryMode::Standby,
            format!(
                "Saving battery for {} before it runs low at {}",
                dollars(peak),
                clock(deficit)
            ),
        )
        .against(peak)
    })
}

fn waiting_to_charge(ctx: &Context<'_>) -> Option<Outcome> {
    if !ctx.can_grid_charge() {
        return None;
    }
    let deficit = ctx.deficit_at()?;
    let best = ctx
        .cheapest_before(deficit)
        .or_else(|| ctx.window_cheapest())?;
    (best <= ctx.current).then(|| {
        Outcome::new(
            BatteryMode::Standby,
            format!(
                "Waiting to charge at {} before the battery runs low at {}",
                dollars(best),
                clock(deficit)
            ),
        )
        .against(best)
    })
}

fn arbitrage_save(ctx: &Context<'_>) -> Option<Outcome> {
    let peak = ctx.window_peak()?;
    let cheapest = ctx.window_cheapest()?;
    let delta = ctx.settings().min_arbitrage_difference_dollars_per_kwh;
    (ctx.current >= peak && ctx.current >= cheapest + delta).then(|| {
        Outcome::new(
            BatteryMode::Load,
            format!(
                "Price {} is the peak of the next {} hours; using battery",
                dollars(ctx.current),
                ctx.settings().future_price_window_hours
            ),
        )
        .against(cheapest)
    })
}

fn sufficient_battery(_ctx: &Context<'_>) -> Option<Outcome> {
    Some(sufficient())
}

fn sufficient() -> Outcome {
    Outcome::new(
        BatteryMode::Load,
        "Battery is sufficient; using battery for home load".to_string(),
    )
}

fn dollars(value: f64) -> String {
    format!("${value:.3}/kWh")
}

fn clock(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Ordered rule-table arbitrage policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArbitragePolicy;

impl ArbitragePolicy {
    pub fn decide(&self, input: &PolicyInput<'_>) -> Decision {
        let ctx = Context::new(input);
        let (reason, outcome) = RULES
            .iter()
            .find_map(|rule| (rule.evaluate)(&ctx).map(|outcome| (rule.reason, outcome)))
            .unwrap_or_else(|| (Reason::SufficientBattery, sufficient()));

        let solar_mode = if reason == Reason::MissingBattery {
            SolarMode::NoChange
        } else {
            solar_mode(input)
        };

        debug!(
            reason = %reason,
            battery_mode = %outcome.battery_mode,
            solar_mode = %solar_mode,
            current_price = ctx.current,
            window = ctx.window.len(),
            "policy decided"
        );

        Decision {
            battery_mode: outcome.battery_mode,
            solar_mode,
            reason,
            description: outcome.description,
            current_price: Some(ctx.current),
            future_price: outcome.future_price,
            deficit_at: input.prediction.deficit_at,
            capacity_at: input.prediction.capacity_at,
        }
    }
}

/// Export is off whenever exporting would cost money.
pub fn solar_mode(input: &PolicyInput<'_>) -> SolarMode {
    if input.current_price.dollars_per_kwh < 0.0 {
        SolarMode::NoExport
    } else if input.settings.grid_export_solar && input.status.can_export_solar {
        SolarMode::Any
    } else {
        SolarMode::NoExport
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rstest::rstest;

    pub(crate) fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 10, 15, 0).unwrap()
    }

    pub(crate) fn status(soc: f64) -> SystemStatus {
        SystemStatus {
            timestamp: now(),
            battery_soc: soc,
            battery_capacity_kwh: 13.5,
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

    fn prices(values: &[f64]) -> Vec<Price> {
        values
            .iter()
            .enumerate()
            .map(|(i, p)| Price::hourly(now() + Duration::hours(i as i64 + 1), *p))
            .collect()
    }

    fn decide(
        settings: &Settings,
        status: &SystemStatus,
        current: f64,
        future: &[f64],
        prediction: &Prediction,
    ) -> Decision {
        let current = Price::hourly(now(), current);
        let future = prices(future);
        ArbitragePolicy.decide(&PolicyInput {
            settings,
            status,
            now: now(),
            current_price: &current,
            future_prices: &future,
            prediction,
        })
    }

    fn deficit_in(hours: i64) -> Prediction {
        Prediction {
            deficit_at: Some(hour_start(now()) + Duration::hours(hours)),
            ..Default::default()
        }
    }

    #[test]
    fn test_sufficient_battery_mid_price() {
        let d = decide(
            &Settings::default(),
            &status(80.0),
            0.15,
            &[0.12, 0.16, 0.14],
            &Prediction::default(),
        );
        assert_eq!(d.reason, Reason::SufficientBattery);
        assert_eq!(d.battery_mode, BatteryMode::Load);
        assert_eq!(d.solar_mode, SolarMode::Any);
    }

    #[test]
    fn test_always_charge_below_threshold() {
        let settings = Settings {
            always_charge_under_dollars_per_kwh: 0.05,
            ..Default::default()
        };
        let d = decide(&settings, &status(80.0), 0.02, &[0.10], &Prediction::default());
        assert_eq!(d.reason, Reason::AlwaysChargeBelowThreshold);
        assert_eq!(d.battery_mode, BatteryMode::ChargeAny);
    }

    #[rstest]
    #[case::fees_push_over(0.04, false)]
    #[case::fees_stay_under(0.03, true)]
    fn test_always_charge_threshold_includes_fees(#[case] energy: f64, #[case] charges: bool) {
        let settings = Settings {
            always_charge_under_dollars_per_kwh: 0.05,
            ..Default::default()
        };
        let current = Price::hourly(now(), energy).with_fee(0.02);
        let future = prices(&[0.06]);
        let status = status(80.0);
        let prediction = Prediction::default();
        let d = ArbitragePolicy.decide(&PolicyInput {
            settings: &settings,
            status: &status,
            now: now(),
            current_price: &current,
            future_prices: &future,
            prediction: &prediction,
        });
        assert_eq!(d.reason == Reason::AlwaysChargeBelowThreshold, charges);
    }

    #[test]
    fn test_deficit_charge_without_cheaper_option() {
        let d = decide(
            &Settings::default(),
            &status(15.0),
            0.10,
            &[0.20, 0.25, 0.12],
            &deficit_in(2),
        );
        assert_eq!(d.reason, Reason::DeficitCharge);
        assert_eq!(d.battery_mode, BatteryMode::ChargeAny);
        assert_eq!(d.future_price, Some(0.20));
    }

    #[test]
    fn test_deficit_charge_with_empty_window() {
        let d = decide(&Settings::default(), &status(15.0), 0.30, &[], &deficit_in(2));
        assert_eq!(d.reason, Reason::DeficitCharge);
        assert!(d.description.contains("no cheaper price"));
    }

    #[test]
    fn test_deficit_due_now_waits_for_much_cheaper_hour() {
        let settings = Settings {
            min_battery_soc: 20.0,
            ..Default::default()
        };
        let d = decide(
            &settings,
            &status(20.0),
            0.50,
            &[0.05, 0.05, 0.05, 0.05, 0.05],
            &deficit_in(0),
        );
        assert_eq!(d.reason, Reason::WaitingToCharge);
        assert_eq!(d.battery_mode, BatteryMode::Standby);
        assert_eq!(d.future_price, Some(0.05));
    }

    #[test]
    fn test_deficit_due_now_charges_when_later_hours_are_not_cheaper() {
        let d = decide(
            &Settings::default(),
            &status(20.0),
            0.20,
            &[0.19, 0.30, 0.30],
            &deficit_in(0),
        );
        assert_eq!(d.reason, Reason::DeficitCharge);
        assert_eq!(d.battery_mode, BatteryMode::ChargeAny);
    }

    #[test]
    fn test_waiting_to_charge_when_cheaper_hour_comes_first() {
        let d = decide(
            &Settings::default(),
            &status(30.0),
            0.20,
            &[0.08, 0.09, 0.10, 0.11],
            &deficit_in(4),
        );
        assert_eq!(d.reason, Reason::WaitingToCharge);
        assert_eq!(d.battery_mode, BatteryMode::Standby);
        assert_eq!(d.future_price, Some(0.08));
    }

    #[test]
    fn test_save_for_peak_when_grid_charging_disabled() {
        let settings = Settings {
            grid_charge_battery: false,
            ..Default::default()
        };
        let d = decide(&settings, &status(30.0), 0.10, &[0.30, 0.05], &deficit_in(3));
        assert_eq!(d.reason, Reason::DeficitSaveForPeak);
        assert_eq!(d.battery_mode, BatteryMode::Standby);
    }

    #[test]
    fn test_arbitrage_charge_ahead_of_peak() {
        let d = decide(
            &Settings::default(),
            &status(50.0),
            0.10,
            &[0.12, 0.30, 0.15],
            &Prediction::default(),
        );
        assert_eq!(d.reason, Reason::ArbitrageCharge);
        assert_eq!(d.future_price, Some(0.30));
    }

    #[test]
    fn test_arbitrage_save_at_peak() {
        let d = decide(
            &Settings::default(),
            &status(100.0),
            0.40,
            &[0.12, 0.30, 0.15],
            &Prediction::default(),
        );
        assert_eq!(d.reason, Reason::ArbitrageSave);
        assert_eq!(d.battery_mode, BatteryMode::Load);
    }

    #[test]
    fn test_prevent_curtailment_when_full_before_deficit() {
        let base = hour_start(now());
        let prediction = Prediction {
            capacity_at: Some(base + Duration::hours(2)),
            deficit_at: Some(base + Duration::hours(10)),
            trajectory: vec![],
        };
        let d = decide(&Settings::default(), &status(90.0), 0.15, &[0.15; 12], &prediction);
        assert_eq!(d.reason, Reason::PreventSolarCurtailment);
        assert_eq!(d.battery_mode, BatteryMode::Load);
    }

    #[test]
    fn test_missing_battery() {
        let mut s = status(0.0);
        s.battery_capacity_kwh = 0.0;
        let d = decide(&Settings::default(), &s, -0.05, &[0.3], &Prediction::default());
        assert_eq!(d.reason, Reason::MissingBattery);
        assert_eq!(d.battery_mode, BatteryMode::Standby);
        assert_eq!(d.solar_mode, SolarMode::NoChange);
    }

    #[test]
    fn test_window_excludes_current_hour_and_far_prices() {
        let settings = Settings {
            future_price_window_hours: 2,
            ..Default::default()
        };
        let current = Price::hourly(now(), 0.10);
        let future = vec![
            Price::hourly(now(), 0.90),
            Price::hourly(now() + Duration::hours(1), 0.11),
            Price::hourly(now() + Duration::hours(5), 0.90),
        ];
        let status = status(50.0);
        let prediction = Prediction::default();
        let d = ArbitragePolicy.decide(&PolicyInput {
            settings: &settings,
            status: &status,
            now: now(),
            current_price: &current,
            future_prices: &future,
            prediction: &prediction,
        });
        assert_eq!(d.reason, Reason::SufficientBattery);
    }

    #[test]
    fn test_fees_count_toward_comparison() {
        let settings = Settings::default();
        let current = Price::hourly(now(), 0.10).with_fee(0.10);
        let future = vec![Price::hourly(now() + Duration::hours(1), 0.25)];
        let status = status(50.0);
        let prediction = Prediction::default();
        let d = ArbitragePolicy.decide(&PolicyInput {
            settings: &settings,
            status: &status,
            now: now(),
            current_price: &current,
            future_prices: &future,
            prediction: &prediction,
        });
        // 0.10 + 0.10 fee + 0.03 margin < 0.25
        assert_eq!(d.reason, Reason::ArbitrageCharge);
        assert!((d.current_price.unwrap() - 0.20).abs() < 1e-12);
    }

    #[rstest]
    #[case::export_allowed(0.10, true, true, SolarMode::Any)]
    #[case::setting_off(0.10, false, true, SolarMode::NoExport)]
    #[case::hardware_cannot(0.10, true, false, SolarMode::NoExport)]
    #[case::negative_price(-0.01, true, true, SolarMode::NoExport)]
    fn test_solar_mode(
        #[case] price: f64,
        #[case] export_setting: bool,
        #[case] can_export: bool,
        #[case] expected: SolarMode,
    ) {
        let settings = Settings {
            grid_export_solar: export_setting,
            ..Default::default()
        };
        let mut s = status(50.0);
        s.can_export_solar = can_export;
        let d = decide(&settings, &s, price, &[0.1], &Prediction::default());
        assert_eq!(d.solar_mode, expected);
    }

    proptest! {
        #[test]
        fn prop_identical_inputs_identical_decision(
            soc in 0.0f64..=100.0,
            current in -0.2f64..0.6,
            future in proptest::collection::vec(-0.2f64..0.6, 0..24),
            deficit in proptest::option::of(0i64..24),
        ) {
            let s = status(soc);
            let prediction = deficit.map(deficit_in).unwrap_or_default();
            let a = decide(&Settings::default(), &s, current, &future, &prediction);
            let b = decide(&Settings::default(), &s, current, &future, &prediction);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_negative_price_never_exports(
            soc in 0.0f64..=100.0,
            current in -1.0f64..-0.0001,
            future in proptest::collection::vec(-0.2f64..0.6, 0..24),
        ) {
            let d = decide(&Settings::default(), &status(soc), current, &future, &Prediction::default());
            prop_assert_ne!(d.solar_mode, SolarMode::Any);
        }

        #[test]
        fn prop_cheap_price_always_charges(
            soc in 0.0f64..=100.0,
            threshold in 0.0f64..0.2,
            below in 0.0f64..0.2,
            future in proptest::collection::vec(-0.2f64..0.6, 0..24),
        ) {
            let settings = Settings {
                always_charge_under_dollars_per_kwh: threshold,
                ..Default::default()
            };
            let d = decide(&settings, &status(soc), threshold - below, &future, &Prediction::default());
            prop_assert_eq!(d.battery_mode, BatteryMode::ChargeAny);
            prop_assert_eq!(d.reason, Reason::AlwaysChargeBelowThreshold);
        }
    }
}
