use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::ledger::{LedgerError, LedgerResult};
use crate::models::FundingSource;

/// Collateral status enum
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "collateral_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CollateralStatus {
    /// In the company's (or an investor's) inventory, not securing a loan
    Available,
    /// With the client, securing an open loan
    Loaned,
    /// Repossessed and not yet returned to inventory
    Claimed,
}

/// Livestock securing (or formerly securing) a loan
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct Collateral {
    pub id: Uuid,
    pub ownership_type: FundingSource,
    pub owner_investor_id: Option<Uuid>,
    pub status: CollateralStatus,
    pub loan_id: Option<Uuid>,
    pub livestock_type: String,
    pub head_count: i32,
    pub estimated_value: i64,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Collateral {
    /// Record livestock pledged against a freshly approved loan. Ownership
    /// follows whoever funded the loan.
    pub fn pledged(
        description: &LivestockDescription,
        funding_source: FundingSource,
        investor_id: Option<Uuid>,
        loan_id: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ownership_type: funding_source,
            owner_investor_id: investor_id,
            status: CollateralStatus::Loaned,
            loan_id: Some(loan_id),
            livestock_type: description.livestock_type.trim().to_string(),
            head_count: description.head_count,
            estimated_value: description.estimated_value,
            location: description.location.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Repossess: the animals return to the owner's inventory detached from
    /// the loan. Only loaned collateral can be claimed.
    pub fn claim(&mut self, now: DateTime<Utc>) -> LedgerResult<()> {
        if self.status != CollateralStatus::Loaned {
            return Err(LedgerError::Invalid(format!(
                "Collateral {} is {:?}, not loaned",
                self.id, self.status
            )));
        }
        self.status = CollateralStatus::Available;
        self.loan_id = None;
        self.updated_at = now;
        Ok(())
    }

    /// Hand the collateral back to inventory once its loan is fully repaid
    pub fn release(&mut self, now: DateTime<Utc>) {
        if self.status == CollateralStatus::Loaned {
            self.status = CollateralStatus::Available;
            self.loan_id = None;
            self.updated_at = now;
        }
    }
}

/// Descriptive fields captured when the loan application is approved
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct LivestockDescription {
    #[validate(length(min = 1, max = 64))]
    pub livestock_type: String,
    #[validate(range(min = 1))]
    pub head_count: i32,
    #[validate(range(min = 0))]
    pub estimated_value: i64,
    pub location: Option<String>,
}

/// A client's loan application as approved by the back office
#[derive(Debug, Deserialize, Validate)]
pub struct ApproveLoanRequest {
    pub client_id: Uuid,
    #[validate(range(min = 1))]
    pub principal: i64,
    pub funding_source: FundingSource,
    pub investor_id: Option<Uuid>,
    #[validate]
    pub livestock: LivestockDescription,
    pub external_reference: Option<String>,
}
