//! In-process ledger store
//!
//! Units are serialised behind a single async mutex and work on a staged copy
//! of the tables that replaces the live copy on commit. Used by the test
//! suite and by `LEDGER_STORE=memory` deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::entry::LedgerEntry;
use super::error::StoreError;
use super::store::{LedgerStore, LedgerUnit, StoreResult};
use crate::collateral::{Collateral, CollateralStatus};
use crate::investor::Investor;
use crate::loan::{ListLoansQuery, Loan};

#[derive(Debug, Default, Clone)]
struct Tables {
    loans: HashMap<Uuid, Loan>,
    investors: HashMap<Uuid, Investor>,
    collateral: HashMap<Uuid, Collateral>,
    entries: Vec<LedgerEntry>,
}

impl Tables {
    fn loan(&self, id: Uuid) -> StoreResult<Loan> {
        self.loans
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Loan", id))
    }

    fn investor(&self, id: Uuid) -> StoreResult<Investor> {
        self.investors
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Investor", id))
    }

    fn collateral_for_loan(&self, loan_id: Uuid) -> Option<Collateral> {
        self.collateral
            .values()
            .find(|c| c.loan_id == Some(loan_id))
            .cloned()
    }

    fn entries_for_investor_loans(&self, investor_id: Uuid) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .entries
            .iter()
            .filter(|e| {
                e.loan_id
                    .and_then(|id| self.loans.get(&id))
                    .is_some_and(|loan| loan.investor_id == Some(investor_id))
            })
            .cloned()
            .collect();
        // Stable sort keeps write order for entries sharing a timestamp
        entries.sort_by_key(|e| e.created_at);
        entries
    }

    fn entry_by_checkout(&self, checkout_request_id: &str) -> Option<LedgerEntry> {
        self.entries
            .iter()
            .find(|e| e.checkout_request_id.as_deref() == Some(checkout_request_id))
            .cloned()
    }

    fn entry_by_reference(&self, reference: &str) -> Option<LedgerEntry> {
        self.entries
            .iter()
            .find(|e| e.external_reference.as_deref() == Some(reference))
            .cloned()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerUnit>> {
        let guard = self.tables.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryUnit {
            guard: Some(guard),
            staged,
        }))
    }

    async fn loan(&self, id: Uuid) -> StoreResult<Loan> {
        self.tables.lock().await.loan(id)
    }

    async fn list_loans(&self, filter: &ListLoansQuery) -> StoreResult<Vec<Loan>> {
        let tables = self.tables.lock().await;
        let mut loans: Vec<Loan> = tables
            .loans
            .values()
            .filter(|loan| filter.matches(loan))
            .cloned()
            .collect();
        loans.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(loans
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect())
    }

    async fn investor(&self, id: Uuid) -> StoreResult<Investor> {
        self.tables.lock().await.investor(id)
    }

    async fn collateral_owned_by(&self, investor_id: Uuid) -> StoreResult<Vec<Collateral>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .collateral
            .values()
            .filter(|c| c.owner_investor_id == Some(investor_id))
            .cloned()
            .collect())
    }

    async fn available_collateral(&self) -> StoreResult<Vec<Collateral>> {
        let tables = self.tables.lock().await;
        let mut available: Vec<Collateral> = tables
            .collateral
            .values()
            .filter(|c| c.status == CollateralStatus::Available)
            .cloned()
            .collect();
        available.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(available)
    }

    async fn entries_for_loan(&self, loan_id: Uuid) -> StoreResult<Vec<LedgerEntry>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .entries
            .iter()
            .filter(|e| e.loan_id == Some(loan_id))
            .cloned()
            .collect())
    }

    async fn entries_for_investor(&self, investor_id: Uuid) -> StoreResult<Vec<LedgerEntry>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .entries
            .iter()
            .filter(|e| e.investor_id == Some(investor_id))
            .cloned()
            .collect())
    }

    async fn entries_for_investor_loans(
        &self,
        investor_id: Uuid,
    ) -> StoreResult<Vec<LedgerEntry>> {
        Ok(self.tables.lock().await.entries_for_investor_loans(investor_id))
    }

    async fn entry_by_checkout(
        &self,
        checkout_request_id: &str,
    ) -> StoreResult<Option<LedgerEntry>> {
        Ok(self.tables.lock().await.entry_by_checkout(checkout_request_id))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

struct MemoryUnit {
    guard: Option<OwnedMutexGuard<Tables>>,
    staged: Tables,
}

impl MemoryUnit {
    fn open(&mut self) -> StoreResult<&mut Tables> {
        if self.guard.is_none() {
            return Err(StoreError::Closed);
        }
        Ok(&mut self.staged)
    }
}

#[async_trait]
impl LedgerUnit for MemoryUnit {
    async fn lock_loan(&mut self, id: Uuid) -> StoreResult<Loan> {
        self.open()?.loan(id)
    }

    async fn lock_investor(&mut self, id: Uuid) -> StoreResult<Investor> {
        self.open()?.investor(id)
    }

    async fn lock_collateral_for_loan(
        &mut self,
        loan_id: Uuid,
    ) -> StoreResult<Option<Collateral>> {
        Ok(self.open()?.collateral_for_loan(loan_id))
    }

    async fn entries_for_investor_loans(
        &mut self,
        investor_id: Uuid,
    ) -> StoreResult<Vec<LedgerEntry>> {
        Ok(self.open()?.entries_for_investor_loans(investor_id))
    }

    async fn entry_by_checkout(
        &mut self,
        checkout_request_id: &str,
    ) -> StoreResult<Option<LedgerEntry>> {
        Ok(self.open()?.entry_by_checkout(checkout_request_id))
    }

    async fn entry_by_reference(&mut self, reference: &str) -> StoreResult<Option<LedgerEntry>> {
        Ok(self.open()?.entry_by_reference(reference))
    }

    async fn insert_loan(&mut self, loan: &Loan) -> StoreResult<()> {
        let tables = self.open()?;
        if tables.loans.contains_key(&loan.id) {
            return Err(StoreError::Duplicate("loans_pkey".to_string()));
        }
        tables.loans.insert(loan.id, loan.clone());
        Ok(())
    }

    async fn update_loan(&mut self, loan: &Loan) -> StoreResult<()> {
        let tables = self.open()?;
        match tables.loans.get_mut(&loan.id) {
            Some(row) => {
                *row = loan.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("Loan", loan.id)),
        }
    }

    async fn insert_investor(&mut self, investor: &Investor) -> StoreResult<()> {
        let tables = self.open()?;
        if tables.investors.contains_key(&investor.id) {
            return Err(StoreError::Duplicate("investors_pkey".to_string()));
        }
        tables.investors.insert(investor.id, investor.clone());
        Ok(())
    }

    async fn update_investor(&mut self, investor: &Investor) -> StoreResult<()> {
        let tables = self.open()?;
        match tables.investors.get_mut(&investor.id) {
            Some(row) => {
                *row = investor.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("Investor", investor.id)),
        }
    }

    async fn insert_collateral(&mut self, collateral: &Collateral) -> StoreResult<()> {
        let tables = self.open()?;
        if tables.collateral.contains_key(&collateral.id) {
            return Err(StoreError::Duplicate("collateral_pkey".to_string()));
        }
        tables.collateral.insert(collateral.id, collateral.clone());
        Ok(())
    }

    async fn update_collateral(&mut self, collateral: &Collateral) -> StoreResult<()> {
        let tables = self.open()?;
        match tables.collateral.get_mut(&collateral.id) {
            Some(row) => {
                *row = collateral.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("Collateral", collateral.id)),
        }
    }

    async fn append(&mut self, entry: &LedgerEntry) -> StoreResult<()> {
        let tables = self.open()?;
        if let Some(checkout) = entry.checkout_request_id.as_deref() {
            if tables.entry_by_checkout(checkout).is_some() {
                return Err(StoreError::Duplicate(
                    "transactions_checkout_request_id_key".to_string(),
                ));
            }
        }
        if let Some(reference) = entry.external_reference.as_deref() {
            if tables.entry_by_reference(reference).is_some() {
                return Err(StoreError::Duplicate(
                    "transactions_external_reference_key".to_string(),
                ));
            }
        }
        tables.entries.push(entry.clone());
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let mut guard = self.guard.take().ok_or(StoreError::Closed)?;
        *guard = std::mem::take(&mut self.staged);
        Ok(())
    }
}
