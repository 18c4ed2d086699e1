use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::{Validate, ValidationError};

use crate::error::{ControlError, ControlResult};

/// Schema version written by this build.
pub const SETTINGS_VERSION: u32 = 3;

pub const DEFAULT_HISTORY_DAYS: u32 = 3;
pub const DEFAULT_FUTURE_PRICE_WINDOW_HOURS: u32 = 24;

/// Per-site automation settings.
///
/// Stored as versioned JSON and migrated forward on read. Only the settings
/// API mutates them, and it validates before storing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_thresholds"))]
pub struct Settings {
    pub version: u32,

    /// Skip the policy entirely and record a paused action.
    pub pause: bool,

    /// Record decisions without sending them to the hardware.
    pub dry_run: bool,

    /// Minimum reserve state of charge (%).
    #[validate(range(min = 0.0, max = 100.0))]
    pub min_battery_soc: f64,

    /// Allow the policy to charge the battery from the grid.
    pub grid_charge_battery: bool,

    /// Allow solar export to the grid.
    pub grid_export_solar: bool,

    /// Always charge when the all-in price is at or below this. Grid fees
    /// count, so a $0.04 energy price with $0.02 of fees compares as $0.06.
    pub always_charge_under_dollars_per_kwh: f64,

    /// Required spread between now and a later peak before arbitrage charging.
    #[validate(range(min = 0.0))]
    pub min_arbitrage_difference_dollars_per_kwh: f64,

    /// Required spread between now and the cheapest hour before a deficit.
    #[validate(range(min = 0.0))]
    pub min_deficit_price_difference_dollars_per_kwh: f64,

    /// Cap on today's actual/expected solar ratio.
    #[validate(range(min = 1.0, max = 10.0))]
    pub solar_trend_ratio_max: f64,

    /// Weight of the bell curve in the solar forecast (0 = off, 1 = full).
    #[validate(range(min = 0.0, max = 1.0))]
    pub solar_bell_curve_multiplier: f64,

    /// Hourly samples above this multiple of the hour's average are ignored.
    /// Zero disables outlier rejection.
    #[validate(range(min = 0.0))]
    pub ignore_hour_usage_over_multiple: f64,

    /// Days of hourly history fed to the forecaster.
    #[validate(range(min = 1, max = 14))]
    pub history_days: u32,

    /// How far ahead future prices are considered by the policy.
    #[validate(range(min = 1, max = 48))]
    pub future_price_window_hours: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            pause: false,
            dry_run: false,
            min_battery_soc: 20.0,
            grid_charge_battery: true,
            grid_export_solar: true,
            always_charge_under_dollars_per_kwh: 0.0,
            min_arbitrage_difference_dollars_per_kwh: 0.03,
            min_deficit_price_difference_dollars_per_kwh: 0.02,
            solar_trend_ratio_max: 3.0,
            solar_bell_curve_multiplier: 0.0,
            ignore_hour_usage_over_multiple: 2.0,
            history_days: DEFAULT_HISTORY_DAYS,
            future_price_window_hours: DEFAULT_FUTURE_PRICE_WINDOW_HOURS,
        }
    }
}

fn validate_thresholds(settings: &Settings) -> Result<(), ValidationError> {
    if settings.version != SETTINGS_VERSION {
        let mut err = ValidationError::new("version");
        err.message = Some(format!("expected settings version {SETTINGS_VERSION}").into());
        return Err(err);
    }
    let prices = [
        settings.always_charge_under_dollars_per_kwh,
        settings.min_arbitrage_difference_dollars_per_kwh,
        settings.min_deficit_price_difference_dollars_per_kwh,
    ];
    if prices.iter().any(|p| !p.is_finite()) {
        return Err(ValidationError::new("non_finite_price_threshold"));
    }
    Ok(())
}

impl Settings {
    /// Validate, mapping failures to [`ControlError::ConfigInvalid`].
    pub fn check(&self) -> ControlResult<()> {
        self.validate().map_err(ControlError::from)
    }

    /// Parse stored settings of any known version, migrating forward.
    pub fn migrate(raw: Value) -> ControlResult<Settings> {
        let Value::Object(mut map) = raw else {
            return Err(ControlError::Storage("settings document is not an object".into()));
        };
        let mut version = map
            .get("version")
            .and_then(Value::as_u64)
            .unwrap_or(1) as u32;
        if version > SETTINGS_VERSION {
            return Err(ControlError::Storage(format!(
                "settings version {version} is newer than supported {SETTINGS_VERSION}"
            )));
        }
        while version < SETTINGS_VERSION {
            match version {
                1 => migrate_v1_to_v2(&mut map),
                2 => migrate_v2_to_v3(&mut map),
                _ => unreachable!("loop bound excludes current version"),
            }
            version += 1;
            map.insert("version".into(), Value::from(version));
        }
        Ok(serde_json::from_value(Value::Object(map))?)
    }
}

/// v2 split the deficit spread from the arbitrage spread and added solar
/// forecast tuning.
fn migrate_v1_to_v2(map: &mut Map<String, Value>) {
    let defaults = Settings::default();
    let arbitrage = map
        .get("min_arbitrage_difference_dollars_per_kwh")
        .cloned()
        .unwrap_or_else(|| Value::from(defaults.min_arbitrage_difference_dollars_per_kwh));
    map.entry("min_deficit_price_difference_dollars_per_kwh")
        .or_insert(arbitrage);
    map.entry("solar_trend_ratio_max")
        .or_insert(Value::from(defaults.solar_trend_ratio_max));
    map.entry("solar_bell_curve_multiplier")
        .or_insert(Value::from(defaults.solar_bell_curve_multiplier));
    map.entry("ignore_hour_usage_over_multiple")
        .or_insert(Value::from(defaults.ignore_hour_usage_over_multiple));
}

/// v3 renamed `grid_charge` and added dry-run and the forecast windows.
fn migrate_v2_to_v3(map: &mut Map<String, Value>) {
    if let Some(grid_charge) = map.remove("grid_charge") {
        map.entry("grid_charge_battery").or_insert(grid_charge);
    }
    map.entry("dry_run").or_insert(Value::Bool(false));
    map.entry("history_days")
        .or_insert(Value::from(DEFAULT_HISTORY_DAYS));
    map.entry("future_price_window_hours")
        .or_insert(Value::from(DEFAULT_FUTURE_PRICE_WINDOW_HOURS));
}
