//! Shared data types for the ledger API

use serde::{Deserialize, Serialize};

/// Basis-point denominator used by every rate in the ledger
pub const BPS_DENOMINATOR: i64 = 10_000;

/// Apply a basis-point rate to a whole-shilling amount, flooring toward zero
pub fn apply_bps(amount: i64, bps: i64) -> i64 {
    ((amount as i128 * bps as i128) / BPS_DENOMINATOR as i128) as i64
}

/// Who put up the money for a loan (and therefore owns the collateral)
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "funding_source", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FundingSource {
    Company,
    Investor,
}

/// How money moved for a ledger entry
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_method", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Mpesa,
    Bank,
}

/// Which bucket of a loan a repayment goes to
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    Principal,
    Interest,
}

/// Generic API response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}
