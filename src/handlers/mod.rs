//! API handlers for the ledger server

pub mod collateral;
pub mod health;
pub mod investors;
pub mod loans;
pub mod payments;

pub use collateral::*;
pub use health::health_check;
pub use investors::*;
pub use loans::*;
pub use payments::*;
