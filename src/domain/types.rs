use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

// ============================================================================
// Operating modes
// ============================================================================

/// Battery operating mode requested from the storage system.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BatteryMode {
    /// Leave whatever the hardware is doing untouched.
    NoChange,
    /// Serve home load from the battery (self-consumption).
    Load,
    /// Hold charge; neither serve load nor charge from grid.
    Standby,
    /// Charge from solar and grid.
    ChargeAny,
    /// Charge from solar only.
    ChargeSolar,
}

impl BatteryMode {
    pub fn is_charging(&self) -> bool {
        matches!(self, Self::ChargeAny | Self::ChargeSolar)
    }
}

/// Solar export mode requested from the storage system.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SolarMode {
    NoChange,
    /// Solar may go anywhere, including export to the grid.
    Any,
    NoExport,
}

// ============================================================================
// Time helpers
// ============================================================================

/// Start of the hour containing `ts`.
pub fn hour_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::hours(1)).unwrap_or(ts)
}

/// Hourly timestamps `[start, start+1h, ...)` covering `count` hours.
pub fn hourly_steps(start: DateTime<Utc>, count: usize) -> impl Iterator<Item = DateTime<Utc>> {
    let first = hour_start(start);
    (0..count as i64).map(move |h| first + TimeDelta::hours(h))
}
