//! Energy arbitrage controller.
//!
//! Decides, once per cycle and per site, how a behind-the-meter battery and
//! its solar export should operate given time-varying electricity prices,
//! a short-term load/solar forecast and the hardware's safety state.

pub mod api;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod forecast;
pub mod hardware;
pub mod policy;
pub mod prices;
pub mod repo;
pub mod savings;
pub mod simulation;
pub mod telemetry;

pub use error::{ControlError, ControlResult};
