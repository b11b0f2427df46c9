//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::collateral::OwnershipService;
use crate::investor::InvestorService;
use crate::ledger::LedgerStore;
use crate::loan::LoanService;
use crate::payments::PaymentService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub loan_service: Arc<LoanService>,
    pub investor_service: Arc<InvestorService>,
    pub ownership_service: Arc<OwnershipService>,
    pub payment_service: Arc<PaymentService>,
    pub store: Arc<dyn LedgerStore>,
    /// Expected `X-Webhook-Secret` on gateway callbacks
    pub callback_secret: Option<String>,
}

impl AppState {
    pub fn new(
        loan_service: Arc<LoanService>,
        investor_service: Arc<InvestorService>,
        ownership_service: Arc<OwnershipService>,
        payment_service: Arc<PaymentService>,
        store: Arc<dyn LedgerStore>,
        callback_secret: Option<String>,
    ) -> Self {
        Self {
            loan_service,
            investor_service,
            ownership_service,
            payment_service,
            store,
            callback_secret,
        }
    }
}

impl FromRef<AppState> for Arc<LoanService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.loan_service.clone()
    }
}

impl FromRef<AppState> for Arc<InvestorService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.investor_service.clone()
    }
}

impl FromRef<AppState> for Arc<OwnershipService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.ownership_service.clone()
    }
}

impl FromRef<AppState> for Arc<PaymentService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.payment_service.clone()
    }
}

impl FromRef<AppState> for Arc<dyn LedgerStore> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.store.clone()
    }
}
