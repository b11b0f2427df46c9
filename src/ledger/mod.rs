//! The ledger: immutable entries, the error taxonomy and the storage seam

pub mod entry;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

use serde::Serialize;

pub use entry::{replay_investor, replay_loan, InvestorReplay, LedgerEntry, LoanReplay, TransactionType};
pub use error::{ErrorClass, LedgerError, LedgerResult, StoreError};
pub use memory::MemoryLedger;
pub use postgres::PgLedger;
pub use store::{LedgerStore, LedgerUnit, StoreResult};

/// Result of a mutating operation: the updated account and the entry written
#[derive(Debug, Serialize, Clone)]
pub struct Posting<T> {
    pub account: T,
    pub transaction: LedgerEntry,
}

impl<T> Posting<T> {
    pub fn new(account: T, transaction: LedgerEntry) -> Self {
        Self {
            account,
            transaction,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Posting<U> {
        Posting {
            account: f(self.account),
            transaction: self.transaction,
        }
    }
}
