//! Serializable boundary types. Routing and auth live outside this crate.

pub mod types;

pub use types::*;
