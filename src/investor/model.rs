//! Investor capital account models and state transitions

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::ledger::{LedgerEntry, LedgerError, LedgerResult, TransactionType};
use crate::models::{apply_bps, PaymentMethod};

/// Return paid per period on deployed capital (0.40)
pub const RETURN_RATE_BPS: i64 = 4_000;

/// Share of a return paid out when withdrawn early (0.85, i.e. a 15% fee)
pub const EARLY_PAYOUT_BPS: i64 = 8_500;

pub const FIRST_RETURN_WEEKS: i64 = 5;
pub const RETURN_INTERVAL_WEEKS: i64 = 4;

/// Investor account status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "investor_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InvestorStatus {
    /// Registered, no capital yet
    Pending,
    Active,
    Inactive,
}

/// Investor model
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct Investor {
    pub id: Uuid,
    pub name: String,
    pub phone_number: String,
    pub investment_amount: i64,
    pub total_lent_amount: i64,
    pub invested_at: Option<DateTime<Utc>>,
    pub next_return_at: Option<DateTime<Utc>>,
    pub last_return_at: Option<DateTime<Utc>>,
    pub total_returns_received: i64,
    pub account_status: InvestorStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Investor {
    pub fn open(name: String, phone_number: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            phone_number,
            investment_amount: 0,
            total_lent_amount: 0,
            invested_at: None,
            next_return_at: None,
            last_return_at: None,
            total_returns_received: 0,
            account_status: InvestorStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn available_balance(&self) -> i64 {
        self.investment_amount - self.total_lent_amount
    }

    /// Contribute capital. The first contribution activates the account and
    /// starts the return schedule.
    pub fn invest(
        &mut self,
        amount: i64,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> LedgerResult<LedgerEntry> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if self.account_status == InvestorStatus::Inactive {
            return Err(LedgerError::InvestorNotActive(self.id));
        }

        let entry_type = if self.invested_at.is_none() {
            self.invested_at = Some(now);
            self.next_return_at = Some(now + Duration::weeks(FIRST_RETURN_WEEKS));
            self.account_status = InvestorStatus::Active;
            TransactionType::InitialInvestment
        } else {
            TransactionType::InvestorTopup
        };

        self.investment_amount += amount;
        self.updated_at = now;

        Ok(LedgerEntry::for_investor(
            self.id,
            entry_type,
            amount,
            Some(method),
            now,
        ))
    }

    /// Set the contributed capital directly; never below what is lent out
    pub fn adjust_investment(
        &mut self,
        new_amount: i64,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> LedgerResult<LedgerEntry> {
        if new_amount < 0 {
            return Err(LedgerError::InvalidAmount(new_amount));
        }
        if new_amount < self.total_lent_amount {
            return Err(LedgerError::AdjustmentBelowOutstandingLoans {
                requested: new_amount,
                outstanding: self.total_lent_amount,
            });
        }

        let delta = new_amount - self.investment_amount;
        let entry_type = match delta {
            0 => {
                return Err(LedgerError::Invalid(
                    "New amount equals the current investment".to_string(),
                ))
            }
            d if d > 0 => TransactionType::InvestorAdjustmentUp,
            _ => TransactionType::InvestorAdjustmentDown,
        };

        self.investment_amount = new_amount;
        self.updated_at = now;

        Ok(LedgerEntry::for_investor(
            self.id,
            entry_type,
            delta.abs(),
            Some(method),
            now,
        ))
    }

    pub fn ensure_active(&self) -> LedgerResult<()> {
        if self.account_status != InvestorStatus::Active {
            return Err(LedgerError::InvestorNotActive(self.id));
        }
        Ok(())
    }

    /// Commit capital to a loan
    pub fn encumber(&mut self, amount: i64, now: DateTime<Utc>) -> LedgerResult<()> {
        self.ensure_active()?;
        let available = self.available_balance();
        if available < amount {
            return Err(LedgerError::InsufficientInvestorFunds {
                available,
                requested: amount,
            });
        }
        self.total_lent_amount += amount;
        self.updated_at = now;
        Ok(())
    }

    /// Capital returned by a principal repayment, a downward adjustment or a
    /// claim
    pub fn release(&mut self, amount: i64, now: DateTime<Utc>) {
        self.total_lent_amount = (self.total_lent_amount - amount).max(0);
        self.updated_at = now;
    }

    /// Window the next return is computed over
    pub fn return_window(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.last_return_at.or(self.invested_at)?;
        let end = self.next_return_at.map_or(now, |next| next.min(now));
        Some((start, end.max(start)))
    }

    /// Pay out a quoted return and roll the schedule forward
    pub fn apply_return(
        &mut self,
        quote: &ReturnQuote,
        is_early: bool,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> LedgerResult<LedgerEntry> {
        self.ensure_active()?;
        let next_return_at = self
            .next_return_at
            .ok_or_else(|| LedgerError::Invalid("Investor has no return schedule".to_string()))?;

        let payout = if quote.can_process {
            quote.amount
        } else if is_early {
            quote.early_payout
        } else {
            return Err(LedgerError::ReturnNotYetDue { next_return_at });
        };
        if payout <= 0 {
            return Err(LedgerError::InvalidAmount(payout));
        }

        self.total_returns_received += payout;
        self.last_return_at = Some(now);
        self.next_return_at = Some(next_return_at + Duration::weeks(RETURN_INTERVAL_WEEKS));
        self.updated_at = now;

        let mut entry = LedgerEntry::for_investor(
            self.id,
            TransactionType::InvestorReturn,
            payout,
            Some(method),
            now,
        );
        if !quote.can_process {
            entry = entry.with_notes(format!(
                "Early withdrawal: {} withheld from {}",
                quote.amount - payout,
                quote.amount
            ));
        }
        Ok(entry)
    }
}

/// Time-weighted average of an investor's deployed capital over `[start, end]`,
/// rebuilt from the entries of the loans it funded. Entries must be ordered
/// by `created_at`.
pub fn time_weighted_deployment(
    entries: &[LedgerEntry],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> i64 {
    let span = (end - start).num_seconds();
    if span <= 0 {
        return 0;
    }

    let mut level: i128 = 0;
    let mut area: i128 = 0;
    let mut cursor = start;

    for entry in entries {
        let effect = entry.entry_type.deployment_effect(entry.amount) as i128;
        if entry.created_at <= start {
            level += effect;
            continue;
        }
        if entry.created_at > end {
            break;
        }
        area += level * (entry.created_at - cursor).num_seconds() as i128;
        level += effect;
        cursor = entry.created_at;
    }
    area += level * (end - cursor).num_seconds() as i128;

    (area / span as i128) as i64
}

/// Server-side return quote
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ReturnQuote {
    pub investor_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub period_days: i64,
    pub average_deployed: i64,
    /// Authoritative return for the period
    pub amount: i64,
    /// What an early withdrawal would pay now
    pub early_payout: i64,
    /// Flat 40% of investment; display only
    pub estimated_amount: i64,
    pub next_return_at: Option<DateTime<Utc>>,
    pub can_process: bool,
}

impl ReturnQuote {
    pub fn build(investor: &Investor, loan_entries: &[LedgerEntry], now: DateTime<Utc>) -> Self {
        let (period_start, period_end) = investor.return_window(now).unwrap_or((now, now));
        let average_deployed = time_weighted_deployment(loan_entries, period_start, period_end);
        let amount = apply_bps(average_deployed, RETURN_RATE_BPS);

        Self {
            investor_id: investor.id,
            period_start,
            period_end,
            period_days: (period_end - period_start).num_days(),
            average_deployed,
            amount,
            early_payout: apply_bps(amount, EARLY_PAYOUT_BPS),
            estimated_amount: apply_bps(investor.investment_amount, RETURN_RATE_BPS),
            next_return_at: investor.next_return_at,
            can_process: investor.next_return_at.is_some_and(|next| now >= next),
        }
    }
}

/// Request to register an investor
#[derive(Debug, Deserialize, Validate)]
pub struct OpenInvestorRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 9, max = 16))]
    pub phone_number: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct InvestRequest {
    #[validate(range(min = 1))]
    pub amount: i64,
    pub method: PaymentMethod,
    pub external_reference: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdjustInvestmentRequest {
    #[validate(range(min = 0))]
    pub new_amount: i64,
    pub method: PaymentMethod,
    pub external_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessReturnRequest {
    pub method: PaymentMethod,
    pub external_reference: Option<String>,
    #[serde(default)]
    pub is_early: bool,
}

/// Investor dashboard figures
#[derive(Debug, Serialize)]
pub struct InvestorSummary {
    pub investor: Investor,
    pub available_balance: i64,
    pub active_loans: usize,
    pub collateral_value: i64,
    /// (collateral value + available balance) / investment, in percent
    pub coverage_ratio: f64,
    pub next_return: ReturnQuote,
    pub recent_returns: Vec<LedgerEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 8, 0, 0).unwrap()
    }

    fn funded(amount: i64) -> Investor {
        let mut investor = Investor::open("Wanjiru".into(), "254712345678".into(), start());
        investor.invest(amount, PaymentMethod::Bank, start()).unwrap();
        investor
    }

    #[test]
    fn test_first_investment_activates_and_schedules() {
        let mut investor = Investor::open("Wanjiru".into(), "254712345678".into(), start());
        assert_eq!(investor.account_status, InvestorStatus::Pending);

        let entry = investor.invest(100_000, PaymentMethod::Bank, start()).unwrap();
        assert_eq!(entry.entry_type, TransactionType::InitialInvestment);
        assert_eq!(investor.account_status, InvestorStatus::Active);
        assert_eq!(investor.next_return_at, Some(start() + Duration::weeks(5)));

        let entry = investor.invest(20_000, PaymentMethod::Bank, start()).unwrap();
        assert_eq!(entry.entry_type, TransactionType::InvestorTopup);
        assert_eq!(investor.investment_amount, 120_000);
    }

    #[test]
    fn test_encumber_respects_available_balance() {
        let mut investor = funded(100_000);
        investor.encumber(60_000, start()).unwrap();
        assert_eq!(investor.available_balance(), 40_000);

        let err = investor.encumber(50_000, start()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientInvestorFunds {
                available: 40_000,
                requested: 50_000
            }
        ));
    }

    #[test]
    fn test_adjustment_cannot_go_below_lent() {
        let mut investor = funded(100_000);
        investor.encumber(70_000, start()).unwrap();

        let err = investor
            .adjust_investment(60_000, PaymentMethod::Bank, start())
            .unwrap_err();
        assert!(matches!(err, LedgerError::AdjustmentBelowOutstandingLoans { .. }));

        let entry = investor
            .adjust_investment(80_000, PaymentMethod::Bank, start())
            .unwrap();
        assert_eq!(entry.entry_type, TransactionType::InvestorAdjustmentDown);
        assert_eq!(entry.amount, 20_000);
    }

    #[test]
    fn test_time_weighted_deployment() {
        let loan = Uuid::new_v4();
        let entries = vec![
            LedgerEntry::for_loan(loan, TransactionType::Disbursement, 100_000, None, start()),
            LedgerEntry::for_loan(
                loan,
                TransactionType::PaymentPrincipal,
                50_000,
                None,
                start() + Duration::days(10),
            ),
        ];

        // 100k for 10 days then 50k for 10 days
        let avg = time_weighted_deployment(&entries, start(), start() + Duration::days(20));
        assert_eq!(avg, 75_000);
        assert_eq!(time_weighted_deployment(&entries, start(), start()), 0);
    }

    #[test]
    fn test_early_return_withholds_fee() {
        let mut investor = funded(100_000);
        let loan = Uuid::new_v4();
        let entries = vec![LedgerEntry::for_loan(
            loan,
            TransactionType::Disbursement,
            100_000,
            None,
            start(),
        )];
        let now = start() + Duration::weeks(3);

        let quote = ReturnQuote::build(&investor, &entries, now);
        assert!(!quote.can_process);
        assert_eq!(quote.amount, 40_000);
        assert_eq!(quote.early_payout, 34_000);

        let err = investor
            .apply_return(&quote, false, PaymentMethod::Mpesa, now)
            .unwrap_err();
        assert!(matches!(err, LedgerError::ReturnNotYetDue { .. }));

        let entry = investor
            .apply_return(&quote, true, PaymentMethod::Mpesa, now)
            .unwrap();
        assert_eq!(entry.amount, 34_000);
        assert_eq!(investor.total_returns_received, 34_000);
        assert_eq!(investor.next_return_at, Some(start() + Duration::weeks(9)));
        assert_eq!(investor.last_return_at, Some(now));
    }
}
