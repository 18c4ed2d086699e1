pub mod action;
pub mod energy;
pub mod forecast;
pub mod price;
pub mod settings;
pub mod status;
pub mod types;

pub use action::*;
pub use energy::*;
pub use forecast::*;
pub use price::*;
pub use settings::*;
pub use status::*;
pub use types::*;
