//! Battery forward simulation and the rule-table arbitrage policy.

pub mod predictor;
pub mod rules;

pub use predictor::*;
pub use rules::*;
