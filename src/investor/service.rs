//! Investor service layer - capital contributions, adjustments and returns

use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::collateral::CollateralStatus;
use crate::investor::{
    AdjustInvestmentRequest, InvestRequest, Investor, InvestorSummary, OpenInvestorRequest,
    ProcessReturnRequest, ReturnQuote,
};
use crate::ledger::{LedgerError, LedgerResult, LedgerStore, Posting, TransactionType};
use crate::loan::service::ensure_reference_unused;
use crate::loan::ListLoansQuery;
use crate::payments::normalize_phone;

/// Number of recent returns shown on the investor dashboard
const RECENT_RETURNS: usize = 5;

#[derive(Clone)]
pub struct InvestorService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl InvestorService {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Register an investor with no capital yet
    pub async fn open_investor(&self, request: OpenInvestorRequest) -> LedgerResult<Investor> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(LedgerError::Invalid("Investor name is required".to_string()));
        }
        let phone_number = normalize_phone(&request.phone_number)?;

        let investor = Investor::open(name, phone_number, self.clock.now());
        let mut unit = self.store.begin().await?;
        unit.insert_investor(&investor).await?;
        unit.commit().await?;

        tracing::info!(target: "audit", action = "open_investor", investor_id = %investor.id, "Investor registered");
        Ok(investor)
    }

    pub async fn invest(
        &self,
        investor_id: Uuid,
        request: InvestRequest,
    ) -> LedgerResult<Posting<Investor>> {
        let now = self.clock.now();
        let mut unit = self.store.begin().await?;
        ensure_reference_unused(unit.as_mut(), request.external_reference.as_deref()).await?;

        let mut investor = unit.lock_investor(investor_id).await?;
        let entry = investor
            .invest(request.amount, request.method, now)?
            .with_reference(request.external_reference);

        unit.update_investor(&investor).await?;
        unit.append(&entry).await?;
        unit.commit().await?;

        tracing::info!(
            target: "audit",
            action = "invest",
            investor_id = %investor_id,
            entry_type = ?entry.entry_type,
            amount = entry.amount,
            investment = investor.investment_amount,
            "Capital contributed"
        );

        Ok(Posting::new(investor, entry))
    }

    pub async fn adjust_investment(
        &self,
        investor_id: Uuid,
        request: AdjustInvestmentRequest,
    ) -> LedgerResult<Posting<Investor>> {
        let now = self.clock.now();
        let mut unit = self.store.begin().await?;
        ensure_reference_unused(unit.as_mut(), request.external_reference.as_deref()).await?;

        let mut investor = unit.lock_investor(investor_id).await?;
        let entry = investor
            .adjust_investment(request.new_amount, request.method, now)?
            .with_reference(request.external_reference);

        unit.update_investor(&investor).await?;
        unit.append(&entry).await?;
        unit.commit().await?;

        tracing::info!(
            target: "audit",
            action = "adjust_investment",
            investor_id = %investor_id,
            entry_type = ?entry.entry_type,
            amount = entry.amount,
            "Investment adjusted"
        );

        Ok(Posting::new(investor, entry))
    }

    /// Quote the return for the current period from deployed capital
    pub async fn compute_return(&self, investor_id: Uuid) -> LedgerResult<ReturnQuote> {
        let investor = self.store.investor(investor_id).await?;
        let loan_entries = self.store.entries_for_investor_loans(investor_id).await?;
        Ok(ReturnQuote::build(&investor, &loan_entries, self.clock.now()))
    }

    pub async fn process_return(
        &self,
        investor_id: Uuid,
        request: ProcessReturnRequest,
    ) -> LedgerResult<Posting<Investor>> {
        let now = self.clock.now();
        let mut unit = self.store.begin().await?;
        ensure_reference_unused(unit.as_mut(), request.external_reference.as_deref()).await?;

        // Principal changes lock the investor too, so once it is held the
        // entries below are final for the quote
        let mut investor = unit.lock_investor(investor_id).await?;
        let loan_entries = unit.entries_for_investor_loans(investor_id).await?;
        let quote = ReturnQuote::build(&investor, &loan_entries, now);
        let entry = investor
            .apply_return(&quote, request.is_early, request.method, now)?
            .with_reference(request.external_reference);

        unit.update_investor(&investor).await?;
        unit.append(&entry).await?;
        unit.commit().await?;

        tracing::info!(
            target: "audit",
            action = "process_return",
            investor_id = %investor_id,
            computed = quote.amount,
            paid = entry.amount,
            early = !quote.can_process,
            "Investor return paid"
        );

        Ok(Posting::new(investor, entry))
    }

    pub async fn get_investor(&self, investor_id: Uuid) -> LedgerResult<Investor> {
        Ok(self.store.investor(investor_id).await?)
    }

    /// Investor dashboard: balances, collateral cover and the next return
    pub async fn investor_summary(&self, investor_id: Uuid) -> LedgerResult<InvestorSummary> {
        let investor = self.store.investor(investor_id).await?;
        let collateral = self.store.collateral_owned_by(investor_id).await?;
        let loan_entries = self.store.entries_for_investor_loans(investor_id).await?;
        let mut returns: Vec<_> = self
            .store
            .entries_for_investor(investor_id)
            .await?
            .into_iter()
            .filter(|e| e.entry_type == TransactionType::InvestorReturn)
            .collect();
        returns.reverse();
        returns.truncate(RECENT_RETURNS);

        let open_loans = ListLoansQuery {
            investor_id: Some(investor_id),
            limit: Some(200),
            ..Default::default()
        };
        let active_loans = self.store.list_loans(&open_loans).await?.len();
        let collateral_value: i64 = collateral
            .iter()
            .filter(|c| c.status != CollateralStatus::Claimed)
            .map(|c| c.estimated_value)
            .sum();
        let available_balance = investor.available_balance();
        let coverage_ratio = if investor.investment_amount > 0 {
            (collateral_value + available_balance) as f64 / investor.investment_amount as f64
                * 100.0
        } else {
            0.0
        };

        Ok(InvestorSummary {
            next_return: ReturnQuote::build(&investor, &loan_entries, self.clock.now()),
            available_balance,
            active_loans,
            collateral_value,
            coverage_ratio,
            recent_returns: returns,
            investor,
        })
    }
}
