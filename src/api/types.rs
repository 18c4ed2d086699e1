use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

use crate::domain::{Action, ForecastHour, Price, Reason, Settings};
use crate::error::ControlError;
use crate::savings::{SavingsHour, SavingsReport};

/// Outcome label of a single-site update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
pub enum UpdateStatus {
    #[serde(rename = "success")]
    #[strum(serialize = "success")]
    Success,
    #[serde(rename = "paused")]
    #[strum(serialize = "paused")]
    Paused,
    #[serde(rename = "emergency mode")]
    #[strum(serialize = "emergency mode")]
    EmergencyMode,
    #[serde(rename = "alarms present")]
    #[strum(serialize = "alarms present")]
    AlarmsPresent,
    #[serde(rename = "storm hedge")]
    #[strum(serialize = "storm hedge")]
    StormHedge,
}

impl From<Reason> for UpdateStatus {
    fn from(reason: Reason) -> Self {
        match reason {
            Reason::Paused => Self::Paused,
            Reason::EmergencyMode => Self::EmergencyMode,
            Reason::HasAlarms => Self::AlarmsPresent,
            Reason::StormHedge => Self::StormHedge,
            _ => Self::Success,
        }
    }
}

/// Single-site update response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub status: UpdateStatus,
    pub action: Action,
    pub price: Option<Price>,
}

impl UpdateResponse {
    pub fn new(action: Action, price: Option<Price>) -> Self {
        Self {
            status: action.reason.into(),
            action,
            price,
        }
    }
}

pub const BATCH_SUCCESS: &str = "success";

/// Batch response: site id to `"success"` or the error message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchResponse(pub BTreeMap<String, String>);

impl BatchResponse {
    pub fn record(&mut self, site_id: impl Into<String>, result: Result<(), ControlError>) {
        let value = match result {
            Ok(()) => BATCH_SUCCESS.to_string(),
            Err(e) => e.to_string(),
        };
        self.0.insert(site_id.into(), value);
    }

    pub fn succeeded(&self) -> usize {
        self.0.values().filter(|v| *v == BATCH_SUCCESS).count()
    }

    pub fn failed(&self) -> usize {
        self.0.len() - self.succeeded()
    }
}

/// Forecast preview, one entry per hour.
pub type ForecastResponse = Vec<ForecastHour>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsResponse {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub cost: f64,
    pub credit: f64,
    pub avoided_cost: f64,
    pub charging_cost: f64,
    pub solar_savings: f64,
    pub battery_savings: f64,
    pub hourly: Vec<SavingsHour>,
    /// Suggested `Cache-Control: max-age`.
    pub max_age_seconds: u64,
}

impl SavingsResponse {
    pub fn new(report: SavingsReport, max_age: std::time::Duration) -> Self {
        Self {
            start: report.start,
            end: report.end,
            cost: report.cost,
            credit: report.credit,
            avoided_cost: report.avoided_cost,
            charging_cost: report.charging_cost,
            solar_savings: report.solar_savings,
            battery_savings: report.battery_savings,
            hourly: report.hours,
            max_age_seconds: max_age.as_secs(),
        }
    }
}

/// Settings read/write payload carrying the revision for optimistic updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsDocument {
    pub settings: Settings,
    pub revision: u64,
}
