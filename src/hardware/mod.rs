//! Storage-system boundary. Vendor quirks stay behind [`EnergyStorageSystem`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{BatteryMode, EnergyStats, Settings, SolarMode, SystemStatus};
use crate::error::ControlResult;

pub mod session;
pub mod simulated;

pub use session::{Authenticator, TokenSession};
pub use simulated::{SimulatedStorage, SimulatedStorageConfig};

/// One site's battery/inverter system.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnergyStorageSystem: Send + Sync {
    async fn get_status(&self) -> ControlResult<SystemStatus>;

    /// `NoChange` leaves that half of the configuration untouched.
    async fn set_modes(&self, battery_mode: BatteryMode, solar_mode: SolarMode) -> ControlResult<()>;

    /// Push settings the hardware enforces itself (reserve, export permission).
    async fn apply_settings(&self, settings: &Settings) -> ControlResult<()>;

    /// Hourly energy flows in `[start, end)`.
    async fn get_energy_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ControlResult<Vec<EnergyStats>>;
}
