//! PostgreSQL ledger store
//!
//! A unit is one database transaction. Rows are locked with
//! `SELECT ... FOR UPDATE`; callers always lock the loan before the investor.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::entry::LedgerEntry;
use super::error::StoreError;
use super::store::{LedgerStore, LedgerUnit, StoreResult};
use crate::collateral::Collateral;
use crate::investor::Investor;
use crate::loan::{ListLoansQuery, Loan};

const INVESTOR_LOAN_ENTRIES: &str = r#"
    SELECT t.* FROM transactions t
    JOIN loans l ON l.id = t.loan_id
    WHERE l.investor_id = $1
    ORDER BY t.created_at, t.seq
"#;

#[derive(Clone)]
pub struct PgLedger {
    db_pool: PgPool,
}

impl PgLedger {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerUnit>> {
        let tx = self.db_pool.begin().await?;
        Ok(Box::new(PgUnit { tx: Some(tx) }))
    }

    async fn loan(&self, id: Uuid) -> StoreResult<Loan> {
        sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| StoreError::not_found("Loan", id))
    }

    async fn list_loans(&self, filter: &ListLoansQuery) -> StoreResult<Vec<Loan>> {
        let loans = sqlx::query_as::<_, Loan>(
            r#"
            SELECT * FROM loans
            WHERE ($1::uuid IS NULL OR client_id = $1)
              AND ($2::uuid IS NULL OR investor_id = $2)
              AND (
                    ($3::loan_status IS NOT NULL AND status = $3)
                 OR ($3::loan_status IS NULL AND ($4 OR status NOT IN ('completed', 'claimed')))
              )
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(filter.client_id)
        .bind(filter.investor_id)
        .bind(filter.status)
        .bind(filter.include_closed.unwrap_or(false))
        .bind(filter.limit())
        .bind(filter.offset())
        .fetch_all(&self.db_pool)
        .await?;

        Ok(loans)
    }

    async fn investor(&self, id: Uuid) -> StoreResult<Investor> {
        sqlx::query_as::<_, Investor>("SELECT * FROM investors WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| StoreError::not_found("Investor", id))
    }

    async fn collateral_owned_by(&self, investor_id: Uuid) -> StoreResult<Vec<Collateral>> {
        let collateral = sqlx::query_as::<_, Collateral>(
            "SELECT * FROM collateral WHERE owner_investor_id = $1 ORDER BY created_at",
        )
        .bind(investor_id)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(collateral)
    }

    async fn available_collateral(&self) -> StoreResult<Vec<Collateral>> {
        let collateral = sqlx::query_as::<_, Collateral>(
            "SELECT * FROM collateral WHERE status = 'available' ORDER BY updated_at DESC",
        )
        .fetch_all(&self.db_pool)
        .await?;
        Ok(collateral)
    }

    async fn entries_for_loan(&self, loan_id: Uuid) -> StoreResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            "SELECT * FROM transactions WHERE loan_id = $1 ORDER BY created_at, seq",
        )
        .bind(loan_id)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(entries)
    }

    async fn entries_for_investor(&self, investor_id: Uuid) -> StoreResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            "SELECT * FROM transactions WHERE investor_id = $1 ORDER BY created_at, seq",
        )
        .bind(investor_id)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(entries)
    }

    async fn entries_for_investor_loans(
        &self,
        investor_id: Uuid,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(INVESTOR_LOAN_ENTRIES)
            .bind(investor_id)
            .fetch_all(&self.db_pool)
            .await?;
        Ok(entries)
    }

    async fn entry_by_checkout(
        &self,
        checkout_request_id: &str,
    ) -> StoreResult<Option<LedgerEntry>> {
        let entry = sqlx::query_as::<_, LedgerEntry>(
            "SELECT * FROM transactions WHERE checkout_request_id = $1",
        )
        .bind(checkout_request_id)
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(entry)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.db_pool).await?;
        Ok(())
    }
}

struct PgUnit {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgUnit {
    fn tx(&mut self) -> StoreResult<&mut Transaction<'static, Postgres>> {
        self.tx.as_mut().ok_or(StoreError::Closed)
    }
}

#[async_trait]
impl LedgerUnit for PgUnit {
    async fn lock_loan(&mut self, id: Uuid) -> StoreResult<Loan> {
        let tx = self.tx()?;
        sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| StoreError::not_found("Loan", id))
    }

    async fn lock_investor(&mut self, id: Uuid) -> StoreResult<Investor> {
        let tx = self.tx()?;
        sqlx::query_as::<_, Investor>("SELECT * FROM investors WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| StoreError::not_found("Investor", id))
    }

    async fn lock_collateral_for_loan(
        &mut self,
        loan_id: Uuid,
    ) -> StoreResult<Option<Collateral>> {
        let tx = self.tx()?;
        let collateral = sqlx::query_as::<_, Collateral>(
            "SELECT * FROM collateral WHERE loan_id = $1 FOR UPDATE",
        )
        .bind(loan_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(collateral)
    }

    async fn entries_for_investor_loans(
        &mut self,
        investor_id: Uuid,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let tx = self.tx()?;
        let entries = sqlx::query_as::<_, LedgerEntry>(INVESTOR_LOAN_ENTRIES)
            .bind(investor_id)
            .fetch_all(&mut **tx)
            .await?;
        Ok(entries)
    }

    async fn entry_by_checkout(
        &mut self,
        checkout_request_id: &str,
    ) -> StoreResult<Option<LedgerEntry>> {
        let tx = self.tx()?;
        let entry = sqlx::query_as::<_, LedgerEntry>(
            "SELECT * FROM transactions WHERE checkout_request_id = $1",
        )
        .bind(checkout_request_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(entry)
    }

    async fn entry_by_reference(&mut self, reference: &str) -> StoreResult<Option<LedgerEntry>> {
        let tx = self.tx()?;
        let entry = sqlx::query_as::<_, LedgerEntry>(
            "SELECT * FROM transactions WHERE external_reference = $1",
        )
        .bind(reference)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(entry)
    }

    async fn insert_loan(&mut self, loan: &Loan) -> StoreResult<()> {
        let tx = self.tx()?;
        sqlx::query(
            r#"
            INSERT INTO loans (
                id, client_id, funding_source, investor_id, principal_original,
                principal_current, interest_rate_bps, interest_baseline,
                interest_period_started_at, interest_paid_current_period, amount_paid_total,
                disbursed_at, due_at, last_interest_payment_at, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(loan.id)
        .bind(loan.client_id)
        .bind(loan.funding_source)
        .bind(loan.investor_id)
        .bind(loan.principal_original)
        .bind(loan.principal_current)
        .bind(loan.interest_rate_bps)
        .bind(loan.interest_baseline)
        .bind(loan.interest_period_started_at)
        .bind(loan.interest_paid_current_period)
        .bind(loan.amount_paid_total)
        .bind(loan.disbursed_at)
        .bind(loan.due_at)
        .bind(loan.last_interest_payment_at)
        .bind(loan.status)
        .bind(loan.created_at)
        .bind(loan.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn update_loan(&mut self, loan: &Loan) -> StoreResult<()> {
        let tx = self.tx()?;
        let result = sqlx::query(
            r#"
            UPDATE loans
            SET principal_current = $2, interest_baseline = $3, interest_period_started_at = $4,
                interest_paid_current_period = $5, amount_paid_total = $6, due_at = $7,
                last_interest_payment_at = $8, status = $9, updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(loan.id)
        .bind(loan.principal_current)
        .bind(loan.interest_baseline)
        .bind(loan.interest_period_started_at)
        .bind(loan.interest_paid_current_period)
        .bind(loan.amount_paid_total)
        .bind(loan.due_at)
        .bind(loan.last_interest_payment_at)
        .bind(loan.status)
        .bind(loan.updated_at)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Loan", loan.id));
        }
        Ok(())
    }

    async fn insert_investor(&mut self, investor: &Investor) -> StoreResult<()> {
        let tx = self.tx()?;
        sqlx::query(
            r#"
            INSERT INTO investors (
                id, name, phone_number, investment_amount, total_lent_amount, invested_at,
                next_return_at, last_return_at, total_returns_received, account_status,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(investor.id)
        .bind(&investor.name)
        .bind(&investor.phone_number)
        .bind(investor.investment_amount)
        .bind(investor.total_lent_amount)
        .bind(investor.invested_at)
        .bind(investor.next_return_at)
        .bind(investor.last_return_at)
        .bind(investor.total_returns_received)
        .bind(investor.account_status)
        .bind(investor.created_at)
        .bind(investor.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn update_investor(&mut self, investor: &Investor) -> StoreResult<()> {
        let tx = self.tx()?;
        let result = sqlx::query(
            r#"
            UPDATE investors
            SET investment_amount = $2, total_lent_amount = $3, invested_at = $4,
                next_return_at = $5, last_return_at = $6, total_returns_received = $7,
                account_status = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(investor.id)
        .bind(investor.investment_amount)
        .bind(investor.total_lent_amount)
        .bind(investor.invested_at)
        .bind(investor.next_return_at)
        .bind(investor.last_return_at)
        .bind(investor.total_returns_received)
        .bind(investor.account_status)
        .bind(investor.updated_at)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Investor", investor.id));
        }
        Ok(())
    }

    async fn insert_collateral(&mut self, collateral: &Collateral) -> StoreResult<()> {
        let tx = self.tx()?;
        sqlx::query(
            r#"
            INSERT INTO collateral (
                id, ownership_type, owner_investor_id, status, loan_id, livestock_type,
                head_count, estimated_value, location, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(collateral.id)
        .bind(collateral.ownership_type)
        .bind(collateral.owner_investor_id)
        .bind(collateral.status)
        .bind(collateral.loan_id)
        .bind(&collateral.livestock_type)
        .bind(collateral.head_count)
        .bind(collateral.estimated_value)
        .bind(&collateral.location)
        .bind(collateral.created_at)
        .bind(collateral.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn update_collateral(&mut self, collateral: &Collateral) -> StoreResult<()> {
        let tx = self.tx()?;
        let result = sqlx::query(
            "UPDATE collateral SET status = $2, loan_id = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(collateral.id)
        .bind(collateral.status)
        .bind(collateral.loan_id)
        .bind(collateral.updated_at)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Collateral", collateral.id));
        }
        Ok(())
    }

    async fn append(&mut self, entry: &LedgerEntry) -> StoreResult<()> {
        let tx = self.tx()?;
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, loan_id, investor_id, type, amount, method, external_reference,
                checkout_request_id, notes, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.loan_id)
        .bind(entry.investor_id)
        .bind(entry.entry_type)
        .bind(entry.amount)
        .bind(entry.method)
        .bind(&entry.external_reference)
        .bind(&entry.checkout_request_id)
        .bind(&entry.notes)
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let tx = self.tx.take().ok_or(StoreError::Closed)?;
        tx.commit().await?;
        Ok(())
    }
}
