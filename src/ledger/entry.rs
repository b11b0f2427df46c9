//! Immutable ledger entries and replay

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::PaymentMethod;

/// Kind of money movement recorded by a ledger entry
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "transaction_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Disbursement,
    PaymentPrincipal,
    PaymentInterest,
    Topup,
    Adjustment,
    Claim,
    InvestorTopup,
    InvestorAdjustmentUp,
    InvestorAdjustmentDown,
    InvestorReturn,
    InitialInvestment,
}

impl TransactionType {
    /// Signed effect of an entry of this type on a loan's outstanding principal
    pub fn principal_effect(&self, amount: i64) -> i64 {
        match self {
            TransactionType::Disbursement | TransactionType::Topup => amount,
            TransactionType::Adjustment => amount,
            TransactionType::PaymentPrincipal => -amount,
            _ => 0,
        }
    }

    /// Signed effect on the capital a loan ties up for its investor. A claim
    /// writes the defaulted principal off the investor without repaying it.
    pub fn deployment_effect(&self, amount: i64) -> i64 {
        match self {
            TransactionType::Claim => -amount,
            other => other.principal_effect(amount),
        }
    }

    /// Signed effect of an entry of this type on an investor's contributed capital
    pub fn capital_effect(&self, amount: i64) -> i64 {
        match self {
            TransactionType::InitialInvestment
            | TransactionType::InvestorTopup
            | TransactionType::InvestorAdjustmentUp => amount,
            TransactionType::InvestorAdjustmentDown => -amount,
            _ => 0,
        }
    }

    pub fn is_repayment(&self) -> bool {
        matches!(
            self,
            TransactionType::PaymentPrincipal | TransactionType::PaymentInterest
        )
    }
}

/// One row of the append-only `transactions` table
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub loan_id: Option<Uuid>,
    pub investor_id: Option<Uuid>,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub entry_type: TransactionType,
    /// Whole shillings; only `adjustment` entries carry a sign. A `claim`
    /// carries the principal written off the funding investor.
    pub amount: i64,
    pub method: Option<PaymentMethod>,
    pub external_reference: Option<String>,
    pub checkout_request_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn for_loan(
        loan_id: Uuid,
        entry_type: TransactionType,
        amount: i64,
        method: Option<PaymentMethod>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id: Some(loan_id),
            investor_id: None,
            entry_type,
            amount,
            method,
            external_reference: None,
            checkout_request_id: None,
            notes: None,
            created_at: at,
        }
    }

    pub fn for_investor(
        investor_id: Uuid,
        entry_type: TransactionType,
        amount: i64,
        method: Option<PaymentMethod>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id: None,
            investor_id: Some(investor_id),
            entry_type,
            amount,
            method,
            external_reference: None,
            checkout_request_id: None,
            notes: None,
            created_at: at,
        }
    }

    pub fn with_reference(mut self, reference: Option<String>) -> Self {
        self.external_reference = reference
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        self
    }

    pub fn with_checkout(mut self, checkout_request_id: impl Into<String>) -> Self {
        self.checkout_request_id = Some(checkout_request_id.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Loan figures recomputed from its entries alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LoanReplay {
    pub principal_original: i64,
    pub principal_current: i64,
    pub amount_paid_total: i64,
}

/// Replay a loan's entries in order. The first disbursement sets the original principal.
pub fn replay_loan(entries: &[LedgerEntry]) -> LoanReplay {
    let mut replay = LoanReplay::default();
    for entry in entries {
        if entry.entry_type == TransactionType::Disbursement && replay.principal_original == 0 {
            replay.principal_original = entry.amount;
        }
        replay.principal_current += entry.entry_type.principal_effect(entry.amount);
        if entry.entry_type.is_repayment() {
            replay.amount_paid_total += entry.amount;
        }
    }
    replay
}

/// Investor figures recomputed from its entries alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct InvestorReplay {
    pub investment_amount: i64,
    pub total_returns_received: i64,
}

pub fn replay_investor(entries: &[LedgerEntry]) -> InvestorReplay {
    entries
        .iter()
        .fold(InvestorReplay::default(), |mut acc, entry| {
            acc.investment_amount += entry.entry_type.capital_effect(entry.amount);
            if entry.entry_type == TransactionType::InvestorReturn {
                acc.total_returns_received += entry.amount;
            }
            acc
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: TransactionType, amount: i64) -> LedgerEntry {
        LedgerEntry::for_loan(Uuid::nil(), kind, amount, Some(PaymentMethod::Cash), Utc::now())
    }

    #[test]
    fn test_replay_loan_mixed_entries() {
        let entries = vec![
            entry(TransactionType::Disbursement, 10_000),
            entry(TransactionType::PaymentInterest, 3_000),
            entry(TransactionType::Topup, 2_000),
            entry(TransactionType::PaymentPrincipal, 5_000),
            entry(TransactionType::Adjustment, -500),
            entry(TransactionType::Claim, 6_500),
        ];

        // The claimed principal stays on the loan
        let replay = replay_loan(&entries);
        assert_eq!(replay.principal_original, 10_000);
        assert_eq!(replay.principal_current, 6_500);
        assert_eq!(replay.amount_paid_total, 8_000);
    }

    #[test]
    fn test_claim_stops_deployment() {
        let claim = TransactionType::Claim;
        assert_eq!(claim.principal_effect(6_500), 0);
        assert_eq!(claim.deployment_effect(6_500), -6_500);
        assert_eq!(TransactionType::Topup.deployment_effect(2_000), 2_000);
        assert_eq!(TransactionType::PaymentInterest.deployment_effect(3_000), 0);
    }

    #[test]
    fn test_replay_investor() {
        let id = Uuid::new_v4();
        let at = Utc::now();
        let entries = vec![
            LedgerEntry::for_investor(id, TransactionType::InitialInvestment, 100_000, None, at),
            LedgerEntry::for_investor(id, TransactionType::InvestorTopup, 20_000, None, at),
            LedgerEntry::for_investor(id, TransactionType::InvestorAdjustmentDown, 5_000, None, at),
            LedgerEntry::for_investor(id, TransactionType::InvestorReturn, 34_000, None, at),
        ];

        let replay = replay_investor(&entries);
        assert_eq!(replay.investment_amount, 115_000);
        assert_eq!(replay.total_returns_received, 34_000);
    }

    #[test]
    fn test_blank_reference_is_dropped() {
        let e = entry(TransactionType::PaymentPrincipal, 100).with_reference(Some("  ".into()));
        assert!(e.external_reference.is_none());
    }
}
