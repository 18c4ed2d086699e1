pub mod bell_curve;
pub mod load_solar;

pub use bell_curve::*;
pub use load_solar::*;
