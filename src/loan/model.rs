//! Loan account models and the per-loan state machine

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::ledger::{LedgerEntry, LedgerError, LedgerResult, TransactionType};
use crate::models::{apply_bps, FundingSource, PaymentMethod, PaymentType};

/// Fixed interest charged per active period (0.30)
pub const INTEREST_RATE_BPS: i64 = 3_000;

/// Length of an interest period and of the initial repayment window
pub const INTEREST_PERIOD_DAYS: i64 = 7;

/// Loan status enum
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "loan_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Active,
    DueToday,
    Overdue,
    Completed,
    Claimed,
}

impl LoanStatus {
    /// Completed and claimed loans never change again
    pub fn is_closed(&self) -> bool {
        matches!(self, LoanStatus::Completed | LoanStatus::Claimed)
    }
}

/// Whole calendar days from `now` until `due_at` (negative once past due)
pub fn days_left(due_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (due_at.date_naive() - now.date_naive()).num_days()
}

/// Date-only classification of an open loan
pub fn classify(due_at: DateTime<Utc>, now: DateTime<Utc>) -> LoanStatus {
    match days_left(due_at, now) {
        d if d < 0 => LoanStatus::Overdue,
        0 => LoanStatus::DueToday,
        _ => LoanStatus::Active,
    }
}

/// Loan model
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct Loan {
    pub id: Uuid,
    pub client_id: Uuid,
    pub funding_source: FundingSource,
    pub investor_id: Option<Uuid>,
    pub principal_original: i64,
    pub principal_current: i64,
    pub interest_rate_bps: i64,
    /// Principal at the start of the current interest period
    pub interest_baseline: i64,
    pub interest_period_started_at: DateTime<Utc>,
    pub interest_paid_current_period: i64,
    pub amount_paid_total: i64,
    pub disbursed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub last_interest_payment_at: Option<DateTime<Utc>>,
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// A freshly disbursed loan. Funding rules are checked by the caller.
    pub fn disbursed(
        client_id: Uuid,
        principal: i64,
        funding_source: FundingSource,
        investor_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id,
            funding_source,
            investor_id,
            principal_original: principal,
            principal_current: principal,
            interest_rate_bps: INTEREST_RATE_BPS,
            interest_baseline: principal,
            interest_period_started_at: now,
            interest_paid_current_period: 0,
            amount_paid_total: 0,
            disbursed_at: now,
            due_at: now + Duration::days(INTEREST_PERIOD_DAYS),
            last_interest_payment_at: None,
            status: LoanStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// When the next interest period begins. A period only ends once its
    /// interest has been met, and the next one waits out the 7-day cooldown
    /// from the last interest payment. Unpaid interest never lapses.
    pub fn next_period_opens_at(&self) -> Option<DateTime<Utc>> {
        let charged = apply_bps(self.interest_baseline, self.interest_rate_bps);
        if self.interest_paid_current_period < charged {
            return None;
        }
        Some(
            self.last_interest_payment_at
                .map(|last| last + Duration::days(INTEREST_PERIOD_DAYS))
                .unwrap_or(self.interest_period_started_at),
        )
    }

    fn next_period_open(&self, now: DateTime<Utc>) -> bool {
        self.next_period_opens_at().is_some_and(|opens| now >= opens)
    }

    /// Principal the current period's interest is charged on
    pub fn interest_baseline_at(&self, now: DateTime<Utc>) -> i64 {
        if self.next_period_open(now) {
            self.principal_current
        } else {
            self.interest_baseline
        }
    }

    pub fn interest_paid_at(&self, now: DateTime<Utc>) -> i64 {
        if self.next_period_open(now) {
            0
        } else {
            self.interest_paid_current_period
        }
    }

    pub fn expected_interest(&self, now: DateTime<Utc>) -> i64 {
        apply_bps(self.interest_baseline_at(now), self.interest_rate_bps)
    }

    pub fn outstanding_interest(&self, now: DateTime<Utc>) -> i64 {
        (self.expected_interest(now) - self.interest_paid_at(now)).max(0)
    }

    pub fn balance(&self, now: DateTime<Utc>) -> i64 {
        self.principal_current + self.outstanding_interest(now)
    }

    fn is_settled(&self, now: DateTime<Utc>) -> bool {
        self.principal_current <= 0 && self.balance(now) <= 0
    }

    /// Status the loan should carry at `now`
    pub fn classification(&self, now: DateTime<Utc>) -> LoanStatus {
        if self.status.is_closed() {
            self.status
        } else if self.is_settled(now) {
            LoanStatus::Completed
        } else {
            classify(self.due_at, now)
        }
    }

    pub fn ensure_open(&self) -> LedgerResult<()> {
        if self.status.is_closed() {
            return Err(LedgerError::LoanClosed {
                loan_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    /// Validate a repayment without touching the loan. Shared by direct
    /// payments and push initiation.
    pub fn check_payment(
        &self,
        amount: i64,
        payment_type: PaymentType,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        self.ensure_open()?;

        match payment_type {
            PaymentType::Interest => {
                let expected = self.expected_interest(now);
                let paid = self.interest_paid_at(now);
                if let Some(last) = self.last_interest_payment_at {
                    let cooldown_ends = last + Duration::days(INTEREST_PERIOD_DAYS);
                    if now < cooldown_ends && expected > 0 && paid >= expected {
                        return Err(LedgerError::InterestAlreadySettledThisPeriod {
                            next_period_at: cooldown_ends,
                        });
                    }
                }
                if amount > expected {
                    return Err(LedgerError::AmountExceedsExpectedInterest { amount, expected });
                }
            }
            PaymentType::Principal => {
                if amount > self.principal_current {
                    return Err(LedgerError::AmountExceedsPrincipal {
                        amount,
                        principal: self.principal_current,
                    });
                }
            }
        }
        Ok(())
    }

    /// Start the next period on the principal it opened with. Any change to
    /// principal after it opened is a mutation, so calling this first from
    /// every mutation keeps the baseline exact.
    fn open_due_period(&mut self, now: DateTime<Utc>) {
        if let Some(opens) = self.next_period_opens_at().filter(|opens| now >= *opens) {
            self.interest_baseline = self.principal_current;
            self.interest_paid_current_period = 0;
            self.interest_period_started_at = opens;
        }
    }

    /// Store the classification so status listings agree with the view
    fn refresh_status(&mut self, now: DateTime<Utc>) {
        self.status = self.classification(now);
        self.updated_at = now;
    }

    /// Apply a validated repayment and return the entry to append
    pub fn apply_payment(
        &mut self,
        amount: i64,
        payment_type: PaymentType,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> LedgerResult<LedgerEntry> {
        self.check_payment(amount, payment_type, now)?;
        self.open_due_period(now);

        let entry_type = match payment_type {
            PaymentType::Principal => {
                self.principal_current -= amount;
                TransactionType::PaymentPrincipal
            }
            PaymentType::Interest => {
                self.interest_paid_current_period += amount;
                self.last_interest_payment_at = Some(now);
                self.due_at = self.due_at + Duration::days(INTEREST_PERIOD_DAYS);
                TransactionType::PaymentInterest
            }
        };

        self.amount_paid_total += amount;
        self.refresh_status(now);

        Ok(LedgerEntry::for_loan(self.id, entry_type, amount, Some(method), now))
    }

    pub fn topup(
        &mut self,
        amount: i64,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> LedgerResult<LedgerEntry> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        self.ensure_open()?;
        self.open_due_period(now);

        self.principal_current += amount;
        self.refresh_status(now);

        Ok(LedgerEntry::for_loan(
            self.id,
            TransactionType::Topup,
            amount,
            Some(method),
            now,
        ))
    }

    /// Set the principal directly. The entry carries the signed delta.
    pub fn adjust(
        &mut self,
        new_principal: i64,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> LedgerResult<LedgerEntry> {
        if new_principal < 0 {
            return Err(LedgerError::Invalid(format!(
                "New principal cannot be negative (got {})",
                new_principal
            )));
        }
        self.ensure_open()?;

        let delta = new_principal - self.principal_current;
        if delta == 0 {
            return Err(LedgerError::Invalid(
                "New principal equals the current principal".to_string(),
            ));
        }

        self.open_due_period(now);
        self.principal_current = new_principal;
        self.refresh_status(now);

        Ok(LedgerEntry::for_loan(
            self.id,
            TransactionType::Adjustment,
            delta,
            Some(method),
            now,
        ))
    }

    /// Close the loan by repossession. Only overdue loans qualify. The entry
    /// carries the principal written off, which stays on the loan itself.
    pub fn claim(&mut self, now: DateTime<Utc>) -> LedgerResult<LedgerEntry> {
        self.ensure_open()?;
        if self.classification(now) != LoanStatus::Overdue {
            return Err(LedgerError::LoanNotOverdue { due_at: self.due_at });
        }

        self.status = LoanStatus::Claimed;
        self.updated_at = now;

        Ok(LedgerEntry::for_loan(
            self.id,
            TransactionType::Claim,
            self.principal_current,
            None,
            now,
        )
        .with_notes("Collateral claimed for overdue loan"))
    }
}

/// Loan with its derived figures at a point in time
#[derive(Debug, Serialize, Clone)]
pub struct LoanView {
    #[serde(flatten)]
    pub loan: Loan,
    pub classification: LoanStatus,
    pub expected_interest: i64,
    pub outstanding_interest: i64,
    pub balance: i64,
    pub days_left: i64,
}

impl LoanView {
    pub fn at(loan: Loan, now: DateTime<Utc>) -> Self {
        Self {
            classification: loan.classification(now),
            expected_interest: loan.expected_interest(now),
            outstanding_interest: loan.outstanding_interest(now),
            balance: loan.balance(now),
            days_left: days_left(loan.due_at, now),
            loan,
        }
    }
}

/// Request to disburse a new loan
#[derive(Debug, Deserialize, Validate)]
pub struct DisburseRequest {
    pub client_id: Uuid,
    #[validate(range(min = 1))]
    pub principal: i64,
    pub funding_source: FundingSource,
    pub investor_id: Option<Uuid>,
    pub method: Option<PaymentMethod>,
    pub external_reference: Option<String>,
}

/// Request to record a repayment
#[derive(Debug, Deserialize, Validate)]
pub struct PaymentRequest {
    #[validate(range(min = 1))]
    pub amount: i64,
    pub payment_type: PaymentType,
    pub method: PaymentMethod,
    pub external_reference: Option<String>,
    pub notes: Option<String>,
}

/// Request to add principal to an open loan
#[derive(Debug, Deserialize, Validate)]
pub struct TopupRequest {
    #[validate(range(min = 1))]
    pub amount: i64,
    pub method: PaymentMethod,
    pub external_reference: Option<String>,
}

/// Request to correct a loan's principal
#[derive(Debug, Deserialize, Validate)]
pub struct AdjustRequest {
    #[validate(range(min = 0))]
    pub new_principal: i64,
    pub method: PaymentMethod,
    pub external_reference: Option<String>,
}

/// Query for listing loans
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ListLoansQuery {
    pub client_id: Option<Uuid>,
    pub investor_id: Option<Uuid>,
    pub status: Option<LoanStatus>,
    /// Include completed and claimed loans when no status is given
    pub include_closed: Option<bool>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl ListLoansQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 200)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.limit()
    }

    /// Whether a loan belongs in the listing
    pub fn matches(&self, loan: &Loan) -> bool {
        if self.client_id.is_some_and(|id| id != loan.client_id) {
            return false;
        }
        if self.investor_id.is_some() && self.investor_id != loan.investor_id {
            return false;
        }
        match self.status {
            Some(status) => loan.status == status,
            None => self.include_closed.unwrap_or(false) || !loan.status.is_closed(),
        }
    }
}

/// Entry in the due-today / overdue lists of the portfolio summary
#[derive(Debug, Serialize, Clone)]
pub struct LoanAlert {
    pub loan_id: Uuid,
    pub client_id: Uuid,
    pub balance: i64,
    pub days_overdue: i64,
}

/// Portfolio-wide figures for the back office
#[derive(Debug, Serialize, Clone, Default)]
pub struct PortfolioSummary {
    pub open_loans: usize,
    pub total_lent: i64,
    pub outstanding_principal: i64,
    pub total_received: i64,
    pub interest_earned: i64,
    pub due_today: Vec<LoanAlert>,
    pub overdue: Vec<LoanAlert>,
}

/// A loan with its full entry history and a replay check
#[derive(Debug, Serialize)]
pub struct LoanStatement {
    pub loan: LoanView,
    pub transactions: Vec<LedgerEntry>,
    pub replay_consistent: bool,
}
