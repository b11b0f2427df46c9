//! Push payment initiation and reconciliation

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;
use validator::Validate;

use super::callback::CallbackResult;
use super::gateway::{GatewayError, PaymentGateway, PushRequest};
use super::phone::normalize_phone;
use super::poller;
use super::session::{NextStep, PaymentSession};
use super::throttle::PushThrottle;
use crate::clock::Clock;
use crate::ledger::{LedgerError, LedgerStore};
use crate::loan::service::post_payment;
use crate::loan::PaymentRequest;
use crate::models::{PaymentMethod, PaymentType};

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Payment session {0} not found")]
    SessionNotFound(String),

    #[error("Too many payment requests to {0}; try again in a minute")]
    Throttled(String),
}

/// Request to push a payment prompt to the client's phone
#[derive(Debug, Deserialize, Validate)]
pub struct InitiatePushRequest {
    pub loan_id: Uuid,
    #[validate(range(min = 1))]
    pub amount: i64,
    pub phone_number: String,
    pub payment_type: PaymentType,
}

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    /// Terminal sessions stay queryable for this long
    pub session_retention: chrono::Duration,
    /// Start a server-side poll job for every push
    pub auto_poll: bool,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            session_retention: chrono::Duration::minutes(30),
            auto_poll: true,
        }
    }
}

/// Payment service coordinating the gateway, the session registry and the ledger
#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    gateway: Arc<dyn PaymentGateway>,
    throttle: PushThrottle,
    settings: PaymentSettings,
    sessions: Arc<RwLock<HashMap<String, PaymentSession>>>,
    watchers: Arc<RwLock<HashMap<String, watch::Sender<bool>>>>,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        gateway: Arc<dyn PaymentGateway>,
        throttle: PushThrottle,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            store,
            clock,
            gateway,
            throttle,
            settings,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            watchers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Validate against the loan, send the push and open a session
    pub async fn initiate_push(
        &self,
        request: InitiatePushRequest,
    ) -> Result<PaymentSession, PaymentError> {
        if request.amount <= 0 {
            return Err(LedgerError::InvalidAmount(request.amount).into());
        }
        let phone_number = normalize_phone(&request.phone_number)?;

        let loan = self.store.loan(request.loan_id).await.map_err(LedgerError::from)?;
        loan.check_payment(request.amount, request.payment_type, self.clock.now())?;

        if !self.throttle.check(&phone_number).await {
            tracing::warn!(phone = %phone_number, "Push throttled");
            return Err(PaymentError::Throttled(phone_number));
        }

        let push = PushRequest {
            phone_number: phone_number.clone(),
            amount: request.amount,
            account_reference: format!("LOAN-{}", &loan.id.simple().to_string()[..8]),
            description: "Loan Payment".to_string(),
        };
        let accepted = self.gateway.push(&push).await.map_err(|e| {
            tracing::warn!(loan_id = %loan.id, error = %e, "Push rejected by gateway");
            e
        })?;

        let session = PaymentSession::new(
            accepted.checkout_request_id.clone(),
            accepted.merchant_request_id,
            loan.id,
            request.amount,
            phone_number,
            request.payment_type,
            self.clock.now(),
        );
        self.sessions
            .write()
            .await
            .insert(session.checkout_request_id.clone(), session.clone());

        tracing::info!(
            checkout_request_id = %session.checkout_request_id,
            loan_id = %loan.id,
            amount = request.amount,
            payment_type = ?request.payment_type,
            "Push initiated"
        );

        if self.settings.auto_poll {
            self.watch(&session.checkout_request_id).await?;
        }
        Ok(session)
    }

    pub async fn session(&self, checkout_request_id: &str) -> Result<PaymentSession, PaymentError> {
        self.sessions
            .read()
            .await
            .get(checkout_request_id)
            .cloned()
            .ok_or_else(|| PaymentError::SessionNotFound(checkout_request_id.to_string()))
    }

    /// Query the gateway once now (unless the session is already settled)
    pub async fn poll_status(
        &self,
        checkout_request_id: &str,
    ) -> Result<PaymentSession, PaymentError> {
        self.advance(checkout_request_id).await?;
        self.session(checkout_request_id).await
    }

    /// One status query folded into the session; confirmed payments are
    /// written before returning.
    pub(crate) async fn advance(&self, checkout_request_id: &str) -> Result<NextStep, PaymentError> {
        let session = self.session(checkout_request_id).await?;
        if session.state.is_terminal() {
            if session.needs_ledger_write() {
                self.confirm(checkout_request_id).await?;
            }
            return Ok(NextStep::Stop);
        }

        let outcome = self.gateway.query(checkout_request_id).await;
        if let Err(err) = &outcome {
            tracing::debug!(checkout_request_id, error = %err, "Status query failed");
        }

        let step = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(checkout_request_id)
                .ok_or_else(|| PaymentError::SessionNotFound(checkout_request_id.to_string()))?;
            let step = session.record_query(outcome, self.clock.now());
            tracing::debug!(
                checkout_request_id,
                attempt = session.attempt_count,
                state = ?session.state,
                next_poll_delay_ms = session.next_poll_delay_ms,
                "Push status updated"
            );
            step
        };

        if step == NextStep::Confirm {
            self.confirm(checkout_request_id).await?;
        }
        Ok(step)
    }

    /// Feed a gateway callback into the session
    pub async fn handle_callback(
        &self,
        result: CallbackResult,
    ) -> Result<PaymentSession, PaymentError> {
        let checkout_request_id = result.checkout_request_id.clone();
        let step = {
            let mut sessions = self.sessions.write().await;
            let session = sessions.get_mut(&checkout_request_id).ok_or_else(|| {
                tracing::warn!(checkout_request_id = %checkout_request_id, "Callback for unknown session");
                PaymentError::SessionNotFound(checkout_request_id.clone())
            })?;
            if let Some(amount) = result.amount {
                if amount != session.amount {
                    tracing::warn!(
                        checkout_request_id = %checkout_request_id,
                        expected = session.amount,
                        reported = amount,
                        "Callback amount differs from the push"
                    );
                }
            }
            session.record_callback(
                result.result_code,
                result.result_description,
                result.receipt,
                self.clock.now(),
            )
        };

        tracing::info!(
            checkout_request_id = %checkout_request_id,
            result_code = result.result_code,
            "Push callback received"
        );

        match step {
            NextStep::Wait(_) => {}
            _ => {
                self.stop_watching(&checkout_request_id).await;
                if self.session(&checkout_request_id).await?.needs_ledger_write() {
                    self.confirm(&checkout_request_id).await?;
                }
            }
        }
        self.session(&checkout_request_id).await
    }

    /// Write the confirmed payment exactly once. A payment the ledger refuses
    /// stays confirmed with `ledger_error` set for manual reconciliation.
    async fn confirm(&self, checkout_request_id: &str) -> Result<(), PaymentError> {
        let session = self.session(checkout_request_id).await?;
        if session.transaction_id.is_some() {
            return Ok(());
        }

        let outcome = match self.store.entry_by_checkout(checkout_request_id).await {
            Ok(Some(existing)) => Ok(existing),
            Ok(None) => self.write_confirmed(&session).await,
            Err(e) => Err(e.into()),
        };

        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(checkout_request_id) else {
            return Ok(());
        };
        match outcome {
            Ok(transaction) => {
                entry.transaction_id = Some(transaction.id);
                entry.ledger_error = None;
            }
            // A concurrent confirmation already recorded it
            Err(_) if entry.transaction_id.is_some() => {}
            Err(LedgerError::Store(err)) => {
                // Retryable; the next poll or callback tries again
                tracing::error!(checkout_request_id, error = %err, "Storage failure writing confirmed payment");
                return Err(LedgerError::Store(err).into());
            }
            Err(err) => {
                tracing::error!(
                    target: "audit",
                    checkout_request_id,
                    loan_id = %entry.loan_id,
                    error = %err,
                    "Confirmed payment rejected by ledger; needs manual reconciliation"
                );
                entry.ledger_error = Some(err.to_string());
            }
        }
        Ok(())
    }

    async fn write_confirmed(
        &self,
        session: &PaymentSession,
    ) -> Result<crate::ledger::LedgerEntry, LedgerError> {
        let now = self.clock.now();
        let request = PaymentRequest {
            amount: session.amount,
            payment_type: session.payment_type,
            method: PaymentMethod::Mpesa,
            external_reference: session.receipt.clone(),
            notes: Some(format!("M-Pesa push {}", session.checkout_request_id)),
        };

        let mut unit = self.store.begin().await?;
        // Another confirmation for the same push may have committed while we
        // waited for the loan row
        unit.lock_loan(session.loan_id).await?;
        if let Some(existing) = unit.entry_by_checkout(&session.checkout_request_id).await? {
            return Ok(existing);
        }
        let written = post_payment(
            unit.as_mut(),
            session.loan_id,
            &request,
            Some(&session.checkout_request_id),
            now,
        )
        .await;

        let (loan, entry) = match written {
            Ok(posted) => posted,
            Err(LedgerError::DuplicateReference(_)) => {
                drop(unit);
                // Lost a race with another writer for the same checkout id
                return match self.store.entry_by_checkout(&session.checkout_request_id).await? {
                    Some(existing) => Ok(existing),
                    None => Err(LedgerError::DuplicateReference(
                        session.receipt.clone().unwrap_or_default(),
                    )),
                };
            }
            Err(err) => return Err(err),
        };
        unit.commit().await?;

        tracing::info!(
            target: "audit",
            action = "confirm_push",
            checkout_request_id = %session.checkout_request_id,
            loan_id = %loan.id,
            entry_type = ?entry.entry_type,
            amount = entry.amount,
            receipt = ?entry.external_reference,
            "Push payment recorded"
        );
        Ok(entry)
    }

    /// Start a server-side poll job. Returns false when one is already running.
    pub async fn watch(&self, checkout_request_id: &str) -> Result<bool, PaymentError> {
        let session = self.session(checkout_request_id).await?;
        if session.state.is_terminal() {
            return Ok(false);
        }

        let mut watchers = self.watchers.write().await;
        if watchers.contains_key(checkout_request_id) {
            return Ok(false);
        }
        let (cancel_tx, cancel_rx) = watch::channel(false);
        watchers.insert(checkout_request_id.to_string(), cancel_tx);
        drop(watchers);

        poller::spawn_poll_job(
            self.clone(),
            checkout_request_id.to_string(),
            session.next_poll_delay_ms,
            cancel_rx,
        );
        Ok(true)
    }

    /// Stop the poll job for a session. The session itself is left as is.
    pub async fn cancel_watch(
        &self,
        checkout_request_id: &str,
    ) -> Result<PaymentSession, PaymentError> {
        let session = self.session(checkout_request_id).await?;
        if self.stop_watching(checkout_request_id).await {
            tracing::info!(checkout_request_id, "Poll job cancelled");
        }
        Ok(session)
    }

    pub(crate) async fn stop_watching(&self, checkout_request_id: &str) -> bool {
        match self.watchers.write().await.remove(checkout_request_id) {
            Some(cancel) => {
                let _ = cancel.send(true);
                true
            }
            None => false,
        }
    }

    pub async fn is_watching(&self, checkout_request_id: &str) -> bool {
        self.watchers.read().await.contains_key(checkout_request_id)
    }

    /// Drop sessions idle past the retention window that are either settled
    /// or no longer polled
    pub async fn evict_expired(&self) -> usize {
        let cutoff = self.clock.now() - self.settings.session_retention;
        let watchers = self.watchers.read().await;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, session| {
            session.updated_at >= cutoff
                || (!session.state.is_terminal() && watchers.contains_key(id))
        });
        before - sessions.len()
    }

    pub fn throttle(&self) -> &PushThrottle {
        &self.throttle
    }
}
