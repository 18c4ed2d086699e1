use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::domain::{Reason, Settings, SystemStatus};

/// Safety state derived fresh every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SafetyState {
    Normal,
    Paused,
    EmergencyMode,
    /// Number of active alarms.
    AlarmsPresent(usize),
    StormHedge { description: String },
}

/// What the gate records in place of a policy decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyOverride {
    pub reason: Reason,
    pub description: String,
    pub fault: bool,
    pub paused: bool,
}

impl SafetyState {
    pub fn is_normal(&self) -> bool {
        matches!(self, Self::Normal)
    }

    /// `None` when the policy may run.
    pub fn override_action(&self) -> Option<SafetyOverride> {
        let (reason, description, fault, paused) = match self {
            Self::Normal => return None,
            Self::Paused => (Reason::Paused, "Automation is paused".to_string(), false, true),
            Self::EmergencyMode => (Reason::EmergencyMode, "In emergency mode".to_string(), true, false),
            Self::AlarmsPresent(count) => (Reason::HasAlarms, format!("{count} alarms present"), true, false),
            Self::StormHedge { .. } => (Reason::StormHedge, "Storm hedge active".to_string(), true, false),
        };
        Some(SafetyOverride {
            reason,
            description,
            fault,
            paused,
        })
    }
}

/// Wraps the policy; overrides it on pause, emergency, alarms or storms.
#[derive(Debug, Default, Clone, Copy)]
pub struct SafetyGate;

impl SafetyGate {
    /// Precedence: pause, emergency, alarms, storm.
    pub fn evaluate(&self, settings: &Settings, status: &SystemStatus, now: DateTime<Utc>) -> SafetyState {
        if settings.pause {
            return SafetyState::Paused;
        }
        if status.emergency_mode {
            error!(soc = status.battery_soc, "storage system reports emergency mode");
            return SafetyState::EmergencyMode;
        }
        if !status.alarms.is_empty() {
            let codes: Vec<&str> = status.alarms.iter().map(|a| a.code.as_str()).collect();
            error!(count = status.alarms.len(), codes = ?codes, "storage system reports alarms");
            return SafetyState::AlarmsPresent(status.alarms.len());
        }
        if let Some(storm) = status.active_storm(now) {
            warn!(
                starts_at = %storm.starts_at,
                ends_at = %storm.ends_at,
                description = %storm.description,
                "storm hedge active"
            );
            return SafetyState::StormHedge {
                description: storm.description.clone(),
            };
        }
        SafetyState::Normal
    }
}
