//! Ledger error taxonomy

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::loan::LoanStatus;

/// Failures raised by a ledger store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Duplicate value for unique key {0}")]
    Duplicate(String),

    #[error("Ledger unit already committed")]
    Closed,

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::not_found("row", "unknown"),
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                StoreError::Duplicate(db_err.constraint().unwrap_or("unknown").to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// How callers should treat a ledger rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input; nothing changed
    Validation,
    /// Well-formed request that breaks a business rule
    Conflict,
    NotFound,
    /// Retryable storage failure
    Storage,
}

/// Rejections from the loan, investor and ownership state machines
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Amount must be greater than zero (got {0})")]
    InvalidAmount(i64),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    #[error("Investor-funded loans need an investor id")]
    InvestorRequired,

    #[error("Company-funded loans cannot reference an investor")]
    UnexpectedInvestor,

    #[error("Investor {0} is not active")]
    InvestorNotActive(Uuid),

    #[error("Investor has {available} available but {requested} was requested")]
    InsufficientInvestorFunds { available: i64, requested: i64 },

    #[error("Interest for this period is already settled; next period opens {next_period_at}")]
    InterestAlreadySettledThisPeriod { next_period_at: DateTime<Utc> },

    #[error("Interest payment of {amount} exceeds the expected interest of {expected}")]
    AmountExceedsExpectedInterest { amount: i64, expected: i64 },

    #[error("Principal payment of {amount} exceeds outstanding principal {principal}")]
    AmountExceedsPrincipal { amount: i64, principal: i64 },

    #[error("Cannot reduce investment to {requested}; {outstanding} is lent out")]
    AdjustmentBelowOutstandingLoans { requested: i64, outstanding: i64 },

    #[error("Return is not due until {next_return_at}")]
    ReturnNotYetDue { next_return_at: DateTime<Utc> },

    #[error("Loan is not overdue (due {due_at})")]
    LoanNotOverdue { due_at: DateTime<Utc> },

    #[error("Loan {loan_id} is {status:?} and accepts no further changes")]
    LoanClosed { loan_id: Uuid, status: LoanStatus },

    #[error("Reference {0} is already recorded")]
    DuplicateReference(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Store(StoreError),
}

impl LedgerError {
    /// Stable machine-readable kind, surfaced as the API error code
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
            LedgerError::Invalid(_) => "VALIDATION_ERROR",
            LedgerError::InvalidPhoneNumber(_) => "INVALID_PHONE_NUMBER",
            LedgerError::InvestorRequired => "INVESTOR_REQUIRED",
            LedgerError::UnexpectedInvestor => "UNEXPECTED_INVESTOR",
            LedgerError::InvestorNotActive(_) => "INVESTOR_NOT_ACTIVE",
            LedgerError::InsufficientInvestorFunds { .. } => "INSUFFICIENT_INVESTOR_FUNDS",
            LedgerError::InterestAlreadySettledThisPeriod { .. } => {
                "INTEREST_ALREADY_SETTLED_THIS_PERIOD"
            }
            LedgerError::AmountExceedsExpectedInterest { .. } => {
                "AMOUNT_EXCEEDS_EXPECTED_INTEREST"
            }
            LedgerError::AmountExceedsPrincipal { .. } => "AMOUNT_EXCEEDS_PRINCIPAL",
            LedgerError::AdjustmentBelowOutstandingLoans { .. } => {
                "ADJUSTMENT_BELOW_OUTSTANDING_LOANS"
            }
            LedgerError::ReturnNotYetDue { .. } => "RETURN_NOT_YET_DUE",
            LedgerError::LoanNotOverdue { .. } => "LOAN_NOT_OVERDUE",
            LedgerError::LoanClosed { .. } => "LOAN_CLOSED",
            LedgerError::DuplicateReference(_) => "DUPLICATE_REFERENCE",
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::Store(_) => "STORAGE_ERROR",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            LedgerError::InvalidAmount(_)
            | LedgerError::Invalid(_)
            | LedgerError::InvalidPhoneNumber(_)
            | LedgerError::InvestorRequired
            | LedgerError::UnexpectedInvestor
            | LedgerError::LoanNotOverdue { .. } => ErrorClass::Validation,
            LedgerError::NotFound(_) => ErrorClass::NotFound,
            LedgerError::Store(_) => ErrorClass::Storage,
            _ => ErrorClass::Conflict,
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => {
                LedgerError::NotFound(format!("{} {} not found", entity, id))
            }
            StoreError::Duplicate(key) => LedgerError::DuplicateReference(key),
            other => LedgerError::Store(other),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
