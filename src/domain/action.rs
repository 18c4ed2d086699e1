use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

use super::{BatteryMode, SolarMode, SystemStatus};

/// Why a decision was made. Every action carries exactly one.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Reason {
    // Policy outcomes, in rule order.
    MissingBattery,
    AlwaysChargeBelowThreshold,
    DeficitCharge,
    ArbitrageCharge,
    PreventSolarCurtailment,
    DeficitSaveForPeak,
    WaitingToCharge,
    ArbitrageSave,
    SufficientBattery,

    // Safety overrides.
    Paused,
    EmergencyMode,
    HasAlarms,
    StormHedge,
}

impl Reason {
    /// Set by the safety gate rather than the policy.
    pub fn is_override(&self) -> bool {
        matches!(
            self,
            Self::Paused | Self::EmergencyMode | Self::HasAlarms | Self::StormHedge
        )
    }
}

/// One record per decision cycle. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub site_id: String,
    pub timestamp: DateTime<Utc>,

    pub battery_mode: BatteryMode,
    pub solar_mode: SolarMode,
    pub reason: Reason,
    pub description: String,

    pub current_price: Option<f64>,
    pub future_price: Option<f64>,
    pub deficit_at: Option<DateTime<Utc>>,
    pub capacity_at: Option<DateTime<Utc>>,

    pub fault: bool,
    pub paused: bool,
    pub dry_run: bool,

    pub system_status: SystemStatus,
}

impl Action {
    /// Whether executing this action sends anything to the hardware.
    pub fn changes_hardware(&self) -> bool {
        !self.fault
            && !self.paused
            && !self.dry_run
            && !(self.battery_mode == BatteryMode::NoChange && self.solar_mode == SolarMode::NoChange)
    }
}
