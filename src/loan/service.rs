//! Loan service layer - Business logic for the loan account

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::ledger::{
    replay_loan, LedgerEntry, LedgerError, LedgerResult, LedgerStore, LedgerUnit, Posting,
    TransactionType,
};
use crate::loan::{
    AdjustRequest, DisburseRequest, ListLoansQuery, Loan, LoanAlert, LoanStatement, LoanStatus,
    LoanView, PaymentRequest, PortfolioSummary, TopupRequest,
};
use crate::models::{FundingSource, PaymentMethod};

/// Loan service for managing the loan lifecycle
#[derive(Clone)]
pub struct LoanService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl LoanService {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Disburse a loan without collateral
    pub async fn disburse(&self, request: DisburseRequest) -> LedgerResult<Posting<LoanView>> {
        let now = self.clock.now();
        let mut unit = self.store.begin().await?;
        let (loan, entry) = originate(unit.as_mut(), &request, now).await?;
        unit.commit().await?;

        tracing::info!(
            target: "audit",
            action = "disburse",
            loan_id = %loan.id,
            client_id = %loan.client_id,
            principal = loan.principal_original,
            investor_id = ?loan.investor_id,
            "Loan disbursed"
        );

        Ok(Posting::new(LoanView::at(loan, now), entry))
    }

    /// Record a repayment made in cash, by bank or with a known M-Pesa receipt
    pub async fn apply_payment(
        &self,
        loan_id: Uuid,
        request: PaymentRequest,
    ) -> LedgerResult<Posting<LoanView>> {
        let now = self.clock.now();
        let mut unit = self.store.begin().await?;
        let (loan, entry) = post_payment(unit.as_mut(), loan_id, &request, None, now).await?;
        unit.commit().await?;

        tracing::info!(
            target: "audit",
            action = "apply_payment",
            loan_id = %loan_id,
            entry_type = ?entry.entry_type,
            amount = entry.amount,
            status = ?loan.status,
            "Payment applied"
        );

        Ok(Posting::new(LoanView::at(loan, now), entry))
    }

    pub async fn topup(
        &self,
        loan_id: Uuid,
        request: TopupRequest,
    ) -> LedgerResult<Posting<LoanView>> {
        let now = self.clock.now();
        let mut unit = self.store.begin().await?;
        ensure_reference_unused(unit.as_mut(), request.external_reference.as_deref()).await?;

        let mut loan = unit.lock_loan(loan_id).await?;
        let entry = loan
            .topup(request.amount, request.method, now)?
            .with_reference(request.external_reference);

        if let Some(investor_id) = loan.investor_id {
            let mut investor = unit.lock_investor(investor_id).await?;
            investor.encumber(request.amount, now)?;
            unit.update_investor(&investor).await?;
        }

        unit.update_loan(&loan).await?;
        unit.append(&entry).await?;
        unit.commit().await?;

        tracing::info!(
            target: "audit",
            action = "topup",
            loan_id = %loan_id,
            amount = request.amount,
            principal = loan.principal_current,
            "Loan topped up"
        );

        Ok(Posting::new(LoanView::at(loan, now), entry))
    }

    pub async fn adjust(
        &self,
        loan_id: Uuid,
        request: AdjustRequest,
    ) -> LedgerResult<Posting<LoanView>> {
        let now = self.clock.now();
        let mut unit = self.store.begin().await?;
        ensure_reference_unused(unit.as_mut(), request.external_reference.as_deref()).await?;

        let mut loan = unit.lock_loan(loan_id).await?;
        let entry = loan
            .adjust(request.new_principal, request.method, now)?
            .with_reference(request.external_reference);

        if let Some(investor_id) = loan.investor_id {
            let mut investor = unit.lock_investor(investor_id).await?;
            if entry.amount > 0 {
                investor.encumber(entry.amount, now)?;
            } else {
                investor.release(-entry.amount, now);
            }
            unit.update_investor(&investor).await?;
        }
        if loan.status == LoanStatus::Completed {
            release_collateral(unit.as_mut(), loan_id, now).await?;
        }

        unit.update_loan(&loan).await?;
        unit.append(&entry).await?;
        unit.commit().await?;

        tracing::info!(
            target: "audit",
            action = "adjust",
            loan_id = %loan_id,
            delta = entry.amount,
            principal = loan.principal_current,
            "Loan principal adjusted"
        );

        Ok(Posting::new(LoanView::at(loan, now), entry))
    }

    pub async fn get_loan(&self, loan_id: Uuid) -> LedgerResult<LoanView> {
        let loan = self.store.loan(loan_id).await?;
        Ok(LoanView::at(loan, self.clock.now()))
    }

    pub async fn list_loans(&self, query: &ListLoansQuery) -> LedgerResult<Vec<LoanView>> {
        let now = self.clock.now();
        let loans = self.store.list_loans(query).await?;
        Ok(loans.into_iter().map(|loan| LoanView::at(loan, now)).collect())
    }

    /// Loan with its transactions, checked against a replay of those transactions
    pub async fn loan_statement(&self, loan_id: Uuid) -> LedgerResult<LoanStatement> {
        let loan = self.store.loan(loan_id).await?;
        let transactions = self.store.entries_for_loan(loan_id).await?;

        let replay = replay_loan(&transactions);
        let replay_consistent = replay.principal_original == loan.principal_original
            && replay.principal_current == loan.principal_current
            && replay.amount_paid_total == loan.amount_paid_total;
        if !replay_consistent {
            tracing::error!(
                loan_id = %loan_id,
                ?replay,
                principal_current = loan.principal_current,
                "Loan state disagrees with its ledger entries"
            );
        }

        Ok(LoanStatement {
            loan: LoanView::at(loan, self.clock.now()),
            transactions,
            replay_consistent,
        })
    }

    /// Back-office dashboard figures across every loan
    pub async fn portfolio_summary(&self) -> LedgerResult<PortfolioSummary> {
        let now = self.clock.now();
        let loans = self.all_loans(true).await?;
        let mut summary = PortfolioSummary::default();

        for loan in loans {
            summary.total_lent += loan.principal_original;
            summary.total_received += loan.amount_paid_total;
            summary.interest_earned += self
                .store
                .entries_for_loan(loan.id)
                .await?
                .iter()
                .filter(|e| e.entry_type == TransactionType::PaymentInterest)
                .map(|e| e.amount)
                .sum::<i64>();

            if loan.status.is_closed() {
                continue;
            }
            summary.open_loans += 1;
            summary.outstanding_principal += loan.principal_current;

            let view = LoanView::at(loan, now);
            let alert = LoanAlert {
                loan_id: view.loan.id,
                client_id: view.loan.client_id,
                balance: view.balance,
                days_overdue: (-view.days_left).max(0),
            };
            match view.classification {
                LoanStatus::DueToday => summary.due_today.push(alert),
                LoanStatus::Overdue => summary.overdue.push(alert),
                _ => {}
            }
        }

        summary.overdue.sort_by(|a, b| b.days_overdue.cmp(&a.days_overdue));
        Ok(summary)
    }

    /// Persist the date-driven classification of every open loan. Returns the
    /// number of loans whose status changed.
    pub async fn refresh_statuses(&self) -> LedgerResult<usize> {
        let now = self.clock.now();
        let stale: Vec<Uuid> = self
            .all_loans(false)
            .await?
            .into_iter()
            .filter(|loan| loan.classification(now) != loan.status)
            .map(|loan| loan.id)
            .collect();

        let mut changed = 0;
        for loan_id in stale {
            let mut unit = self.store.begin().await?;
            let mut loan = unit.lock_loan(loan_id).await?;
            let status = loan.classification(now);
            if status == loan.status {
                continue;
            }

            tracing::debug!(loan_id = %loan_id, from = ?loan.status, to = ?status, "Reclassifying loan");
            loan.status = status;
            loan.updated_at = now;
            if status == LoanStatus::Completed {
                release_collateral(unit.as_mut(), loan_id, now).await?;
            }
            unit.update_loan(&loan).await?;
            unit.commit().await?;
            changed += 1;
        }

        Ok(changed)
    }

    async fn all_loans(&self, include_closed: bool) -> LedgerResult<Vec<Loan>> {
        let mut query = ListLoansQuery {
            include_closed: Some(include_closed),
            page: Some(1),
            limit: Some(200),
            ..Default::default()
        };
        let mut loans = Vec::new();
        loop {
            let page = self.store.list_loans(&query).await?;
            let done = (page.len() as i64) < query.limit();
            loans.extend(page);
            if done {
                return Ok(loans);
            }
            query.page = Some(query.page() + 1);
        }
    }
}

/// Create a loan, encumber its investor and write the disbursement inside `unit`
pub(crate) async fn originate(
    unit: &mut dyn LedgerUnit,
    request: &DisburseRequest,
    now: DateTime<Utc>,
) -> LedgerResult<(Loan, LedgerEntry)> {
    if request.principal <= 0 {
        return Err(LedgerError::InvalidAmount(request.principal));
    }
    match (request.funding_source, request.investor_id) {
        (FundingSource::Investor, None) => return Err(LedgerError::InvestorRequired),
        (FundingSource::Company, Some(_)) => return Err(LedgerError::UnexpectedInvestor),
        _ => {}
    }
    ensure_reference_unused(unit, request.external_reference.as_deref()).await?;

    // The loan row is new, so taking the investor lock first keeps lock order
    if let Some(investor_id) = request.investor_id {
        let mut investor = unit.lock_investor(investor_id).await?;
        investor.encumber(request.principal, now)?;
        unit.update_investor(&investor).await?;
    }

    let loan = Loan::disbursed(
        request.client_id,
        request.principal,
        request.funding_source,
        request.investor_id,
        now,
    );
    let entry = LedgerEntry::for_loan(
        loan.id,
        TransactionType::Disbursement,
        request.principal,
        Some(request.method.unwrap_or(PaymentMethod::Cash)),
        now,
    )
    .with_reference(request.external_reference.clone());

    unit.insert_loan(&loan).await?;
    unit.append(&entry).await?;

    Ok((loan, entry))
}

/// Apply a repayment inside `unit`. Confirmed mobile-money payments pass
/// their checkout id, which the store keeps unique.
pub(crate) async fn post_payment(
    unit: &mut dyn LedgerUnit,
    loan_id: Uuid,
    request: &PaymentRequest,
    checkout_request_id: Option<&str>,
    now: DateTime<Utc>,
) -> LedgerResult<(Loan, LedgerEntry)> {
    ensure_reference_unused(unit, request.external_reference.as_deref()).await?;

    let mut loan = unit.lock_loan(loan_id).await?;
    let mut entry = loan
        .apply_payment(request.amount, request.payment_type, request.method, now)?
        .with_reference(request.external_reference.clone());
    if let Some(checkout) = checkout_request_id {
        entry = entry.with_checkout(checkout);
    }
    if let Some(notes) = &request.notes {
        entry = entry.with_notes(notes.clone());
    }

    if entry.entry_type == TransactionType::PaymentPrincipal {
        if let Some(investor_id) = loan.investor_id {
            let mut investor = unit.lock_investor(investor_id).await?;
            investor.release(request.amount, now);
            unit.update_investor(&investor).await?;
        }
    }
    if loan.status == LoanStatus::Completed {
        release_collateral(unit, loan_id, now).await?;
    }

    unit.update_loan(&loan).await?;
    unit.append(&entry).await?;

    Ok((loan, entry))
}

pub(crate) async fn ensure_reference_unused(
    unit: &mut dyn LedgerUnit,
    reference: Option<&str>,
) -> LedgerResult<()> {
    let Some(reference) = reference.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(());
    };
    if unit.entry_by_reference(reference).await?.is_some() {
        return Err(LedgerError::DuplicateReference(reference.to_string()));
    }
    Ok(())
}

async fn release_collateral(
    unit: &mut dyn LedgerUnit,
    loan_id: Uuid,
    now: DateTime<Utc>,
) -> LedgerResult<()> {
    if let Some(mut collateral) = unit.lock_collateral_for_loan(loan_id).await? {
        collateral.release(now);
        unit.update_collateral(&collateral).await?;
        tracing::info!(
            target: "audit",
            action = "release_collateral",
            loan_id = %loan_id,
            collateral_id = %collateral.id,
            "Collateral returned to inventory"
        );
    }
    Ok(())
}
