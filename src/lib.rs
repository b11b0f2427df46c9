//! Herdbook ledger server library
//!
//! Livestock-backed micro-loans, the investor capital that funds them and
//! the M-Pesa push payments that repay them.

pub mod clock;
pub mod collateral;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod investor;
pub mod jobs;
pub mod ledger;
pub mod loan;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod routes;
pub mod state;
