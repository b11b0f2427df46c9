//! Storage seam for loans, investors, collateral and ledger entries
//!
//! Every mutating operation opens a [`LedgerUnit`], locks the rows it needs
//! (loan before investor), stages its writes and commits once. A unit that
//! is dropped without `commit` discards everything it staged.

use async_trait::async_trait;
use uuid::Uuid;

use super::entry::LedgerEntry;
use super::error::StoreError;
use crate::collateral::Collateral;
use crate::investor::Investor;
use crate::loan::{ListLoansQuery, Loan};

pub type StoreResult<T> = Result<T, StoreError>;

/// Read side of the store plus the unit-of-work factory
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerUnit>>;

    async fn loan(&self, id: Uuid) -> StoreResult<Loan>;

    /// Loans matching the filter, newest first, paginated
    async fn list_loans(&self, filter: &ListLoansQuery) -> StoreResult<Vec<Loan>>;

    async fn investor(&self, id: Uuid) -> StoreResult<Investor>;

    async fn collateral_owned_by(&self, investor_id: Uuid) -> StoreResult<Vec<Collateral>>;

    async fn available_collateral(&self) -> StoreResult<Vec<Collateral>>;

    /// Entries of one loan in the order they were written
    async fn entries_for_loan(&self, loan_id: Uuid) -> StoreResult<Vec<LedgerEntry>>;

    async fn entries_for_investor(&self, investor_id: Uuid) -> StoreResult<Vec<LedgerEntry>>;

    /// Entries of every loan funded by the investor, oldest first
    async fn entries_for_investor_loans(&self, investor_id: Uuid)
        -> StoreResult<Vec<LedgerEntry>>;

    async fn entry_by_checkout(&self, checkout_request_id: &str)
        -> StoreResult<Option<LedgerEntry>>;

    async fn ping(&self) -> StoreResult<()>;
}

/// One atomic read-validate-write unit
#[async_trait]
pub trait LedgerUnit: Send {
    /// Read a loan and hold it until commit
    async fn lock_loan(&mut self, id: Uuid) -> StoreResult<Loan>;

    async fn lock_investor(&mut self, id: Uuid) -> StoreResult<Investor>;

    async fn lock_collateral_for_loan(&mut self, loan_id: Uuid) -> StoreResult<Option<Collateral>>;

    /// Entries of every loan funded by the investor, oldest first, as seen
    /// by this unit
    async fn entries_for_investor_loans(&mut self, investor_id: Uuid)
        -> StoreResult<Vec<LedgerEntry>>;

    async fn entry_by_checkout(
        &mut self,
        checkout_request_id: &str,
    ) -> StoreResult<Option<LedgerEntry>>;

    async fn entry_by_reference(&mut self, reference: &str) -> StoreResult<Option<LedgerEntry>>;

    async fn insert_loan(&mut self, loan: &Loan) -> StoreResult<()>;

    async fn update_loan(&mut self, loan: &Loan) -> StoreResult<()>;

    async fn insert_investor(&mut self, investor: &Investor) -> StoreResult<()>;

    async fn update_investor(&mut self, investor: &Investor) -> StoreResult<()>;

    async fn insert_collateral(&mut self, collateral: &Collateral) -> StoreResult<()>;

    async fn update_collateral(&mut self, collateral: &Collateral) -> StoreResult<()>;

    /// Append an entry. Reused checkout ids and receipts fail with
    /// [`StoreError::Duplicate`].
    async fn append(&mut self, entry: &LedgerEntry) -> StoreResult<()>;

    async fn commit(&mut self) -> StoreResult<()>;
}
