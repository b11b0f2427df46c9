//! Ownership transitions of livestock collateral

use std::sync::Arc;

use uuid::Uuid;
use validator::Validate;

use crate::clock::Clock;
use crate::collateral::{ApproveLoanRequest, Collateral};
use crate::ledger::{LedgerError, LedgerResult, LedgerStore, Posting};
use crate::loan::service::originate;
use crate::loan::{DisburseRequest, LoanView};

/// Loan approved against pledged livestock
#[derive(Debug, serde::Serialize, Clone)]
pub struct ApprovedLoan {
    #[serde(flatten)]
    pub loan: LoanView,
    pub collateral: Collateral,
}

/// Loan claimed for default, with the livestock back in inventory
#[derive(Debug, serde::Serialize, Clone)]
pub struct ClaimedLoan {
    #[serde(flatten)]
    pub loan: LoanView,
    pub collateral: Option<Collateral>,
}

#[derive(Clone)]
pub struct OwnershipService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl OwnershipService {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Approve an application: loan, collateral, disbursement and investor
    /// encumbrance are written in one unit.
    pub async fn approve_loan(
        &self,
        request: ApproveLoanRequest,
    ) -> LedgerResult<Posting<ApprovedLoan>> {
        request
            .livestock
            .validate()
            .map_err(|e| LedgerError::Invalid(e.to_string()))?;

        let now = self.clock.now();
        let terms = DisburseRequest {
            client_id: request.client_id,
            principal: request.principal,
            funding_source: request.funding_source,
            investor_id: request.investor_id,
            method: None,
            external_reference: request.external_reference,
        };

        let mut unit = self.store.begin().await?;
        let (loan, entry) = originate(unit.as_mut(), &terms, now).await?;
        let collateral = Collateral::pledged(
            &request.livestock,
            terms.funding_source,
            terms.investor_id,
            loan.id,
            now,
        );
        unit.insert_collateral(&collateral).await?;
        unit.commit().await?;

        tracing::info!(
            target: "audit",
            action = "approve_loan",
            loan_id = %loan.id,
            collateral_id = %collateral.id,
            ownership = ?collateral.ownership_type,
            head_count = collateral.head_count,
            principal = loan.principal_original,
            "Loan approved against livestock"
        );

        Ok(Posting::new(
            ApprovedLoan {
                loan: LoanView::at(loan, now),
                collateral,
            },
            entry,
        ))
    }

    /// Repossess the livestock of an overdue loan. Irreversible.
    pub async fn claim_ownership(&self, loan_id: Uuid) -> LedgerResult<Posting<ClaimedLoan>> {
        let now = self.clock.now();
        let mut unit = self.store.begin().await?;

        let mut loan = unit.lock_loan(loan_id).await?;
        let entry = loan.claim(now)?;

        // The investor stops carrying the defaulted principal
        if let Some(investor_id) = loan.investor_id {
            let mut investor = unit.lock_investor(investor_id).await?;
            investor.release(entry.amount, now);
            unit.update_investor(&investor).await?;
        }

        let mut collateral = unit.lock_collateral_for_loan(loan_id).await?;
        if let Some(c) = collateral.as_mut() {
            c.claim(now)?;
            unit.update_collateral(c).await?;
        }

        unit.update_loan(&loan).await?;
        unit.append(&entry).await?;
        unit.commit().await?;

        tracing::warn!(
            target: "audit",
            action = "claim_ownership",
            loan_id = %loan_id,
            principal_written_off = entry.amount,
            investor_id = ?loan.investor_id,
            collateral_id = ?collateral.as_ref().map(|c| c.id),
            "Collateral claimed for overdue loan"
        );

        Ok(Posting::new(
            ClaimedLoan {
                loan: LoanView::at(loan, now),
                collateral,
            },
            entry,
        ))
    }

    /// Livestock currently in inventory
    pub async fn list_inventory(&self) -> LedgerResult<Vec<Collateral>> {
        Ok(self.store.available_collateral().await?)
    }
}
