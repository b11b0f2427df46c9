//! In-flight push payment sessions

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::gateway::{GatewayError, QueryStatus};
use super::schedule::{
    self, classify_result, ResultClass, BASE_POLL_DELAY_MS, INITIAL_DELAY_MS, MAX_ATTEMPTS,
};
use crate::models::PaymentType;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initiated,
    Polling,
    Confirmed,
    Failed,
    TimedOut,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Confirmed | SessionState::Failed | SessionState::TimedOut
        )
    }
}

/// What the poller should do after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Query again after this many milliseconds
    Wait(u64),
    /// Payment succeeded; write it to the ledger
    Confirm,
    /// Terminal without a ledger write
    Stop,
}

#[derive(Debug, Serialize, Clone)]
pub struct PaymentSession {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub loan_id: Uuid,
    pub amount: i64,
    pub phone_number: String,
    pub payment_type: PaymentType,
    pub state: SessionState,
    pub attempt_count: u32,
    /// Base delay grown on pending answers and transport errors
    pub poll_delay_ms: u64,
    pub next_poll_delay_ms: u64,
    pub result_code: Option<i64>,
    pub result_description: Option<String>,
    pub receipt: Option<String>,
    /// Ledger entry written for a confirmed payment
    pub transaction_id: Option<Uuid>,
    /// Set when a confirmed payment could not be written and needs manual
    /// reconciliation
    pub ledger_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentSession {
    pub fn new(
        checkout_request_id: String,
        merchant_request_id: String,
        loan_id: Uuid,
        amount: i64,
        phone_number: String,
        payment_type: PaymentType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            checkout_request_id,
            merchant_request_id,
            loan_id,
            amount,
            phone_number,
            payment_type,
            state: SessionState::Initiated,
            attempt_count: 0,
            poll_delay_ms: BASE_POLL_DELAY_MS,
            next_poll_delay_ms: INITIAL_DELAY_MS,
            result_code: None,
            result_description: None,
            receipt: None,
            transaction_id: None,
            ledger_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Confirmed but not yet written to the ledger (a storage failure
    /// interrupted the write)
    pub fn needs_ledger_write(&self) -> bool {
        self.state == SessionState::Confirmed
            && self.transaction_id.is_none()
            && self.ledger_error.is_none()
    }

    /// Fold one status query into the session
    pub fn record_query(
        &mut self,
        outcome: Result<QueryStatus, GatewayError>,
        now: DateTime<Utc>,
    ) -> NextStep {
        if self.state.is_terminal() {
            return NextStep::Stop;
        }
        self.state = SessionState::Polling;
        self.attempt_count += 1;
        self.updated_at = now;

        match outcome {
            Ok(QueryStatus::Completed {
                result_code,
                result_description,
                receipt,
            }) => {
                let class = self.record_result(result_code, result_description, receipt);
                if class != ResultClass::Undetermined {
                    return self.finish(class);
                }
                self.poll_delay_ms = schedule::after_pending(self.poll_delay_ms);
                self.next_poll_delay_ms = self.poll_delay_ms;
            }
            Ok(QueryStatus::Pending) => {
                self.poll_delay_ms = schedule::after_pending(self.poll_delay_ms);
                self.next_poll_delay_ms = self.poll_delay_ms;
            }
            Err(GatewayError::RateLimited { retry_after }) => {
                self.next_poll_delay_ms = schedule::after_rate_limit(retry_after);
            }
            Err(err) => {
                self.result_description = Some(err.to_string());
                self.poll_delay_ms = schedule::after_error(self.poll_delay_ms);
                self.next_poll_delay_ms = self.poll_delay_ms;
            }
        }

        if self.attempt_count >= MAX_ATTEMPTS {
            self.state = SessionState::TimedOut;
            return NextStep::Stop;
        }
        NextStep::Wait(self.next_poll_delay_ms)
    }

    /// Final result pushed by the gateway callback. Unknown codes leave the
    /// session polling.
    pub fn record_callback(
        &mut self,
        result_code: i64,
        result_description: String,
        receipt: Option<String>,
        now: DateTime<Utc>,
    ) -> NextStep {
        if self.state.is_terminal() {
            return NextStep::Stop;
        }
        self.updated_at = now;
        match self.record_result(result_code, result_description, receipt) {
            ResultClass::Undetermined => NextStep::Wait(self.next_poll_delay_ms),
            class => self.finish(class),
        }
    }

    fn record_result(
        &mut self,
        result_code: i64,
        result_description: String,
        receipt: Option<String>,
    ) -> ResultClass {
        self.result_code = Some(result_code);
        self.result_description = Some(result_description);
        if receipt.is_some() {
            self.receipt = receipt;
        }
        classify_result(result_code)
    }

    fn finish(&mut self, class: ResultClass) -> NextStep {
        match class {
            ResultClass::Confirmed => {
                self.state = SessionState::Confirmed;
                NextStep::Confirm
            }
            _ => {
                self.state = SessionState::Failed;
                NextStep::Stop
            }
        }
    }
}
