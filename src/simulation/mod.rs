//! # Preview Simulation
//!
//! Replays the arbitrage policy over a forecasted day so users can see what
//! the controller would do hour by hour. Nothing here is executed against
//! hardware or persisted.
//!
//! - **VirtualBattery**: one-hour physical step (solar first, then battery,
//!   then grid), also used by the simulated storage adapter
//! - **Simulator**: forecaster + predictor + policy over a 24 hour horizon

pub mod battery;
pub mod preview;

pub use battery::{HourFlows, VirtualBattery};
pub use preview::{PreviewInput, Simulator, PREVIEW_HOURS};
