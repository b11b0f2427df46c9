//! Shared fixtures: an in-memory ledger, a hand-driven clock and a gateway
//! whose answers are scripted per test.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use herdbook_server::clock::ManualClock;
use herdbook_server::collateral::OwnershipService;
use herdbook_server::investor::{InvestRequest, Investor, InvestorService, OpenInvestorRequest};
use herdbook_server::ledger::MemoryLedger;
use herdbook_server::loan::{DisburseRequest, LoanService, LoanView};
use herdbook_server::models::{FundingSource, PaymentMethod};
use herdbook_server::payments::{
    GatewayError, PaymentGateway, PaymentService, PaymentSettings, PushAccepted, PushRequest,
    PushThrottle, QueryStatus,
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()
}

/// Gateway answering queries from a script; pending once the script runs out
#[derive(Default)]
pub struct ScriptedGateway {
    answers: Mutex<VecDeque<Result<QueryStatus, GatewayError>>>,
    pushes: AtomicU32,
    queries: AtomicU32,
    reject_push: Mutex<Option<GatewayError>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script(&self, answers: Vec<Result<QueryStatus, GatewayError>>) {
        self.answers.lock().await.extend(answers);
    }

    pub async fn reject_pushes_with(&self, err: GatewayError) {
        *self.reject_push.lock().await = Some(err);
    }

    pub fn pushes(&self) -> u32 {
        self.pushes.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> u32 {
        self.queries.load(Ordering::SeqCst)
    }
}

pub fn pending() -> Result<QueryStatus, GatewayError> {
    Ok(QueryStatus::Pending)
}

pub fn completed(result_code: i64, receipt: Option<&str>) -> Result<QueryStatus, GatewayError> {
    Ok(QueryStatus::Completed {
        result_code,
        result_description: format!("result {}", result_code),
        receipt: receipt.map(str::to_string),
    })
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn push(&self, _request: &PushRequest) -> Result<PushAccepted, GatewayError> {
        if let Some(err) = self.reject_push.lock().await.clone() {
            return Err(err);
        }
        let n = self.pushes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PushAccepted {
            checkout_request_id: format!("ws_CO_TEST_{}", n),
            merchant_request_id: format!("MR-{}", n),
            customer_message: None,
        })
    }

    async fn query(&self, _checkout_request_id: &str) -> Result<QueryStatus, GatewayError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.answers
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(QueryStatus::Pending))
    }
}

/// Every service wired to one in-memory ledger and one manual clock
pub struct Harness {
    pub store: Arc<MemoryLedger>,
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<ScriptedGateway>,
    pub loans: LoanService,
    pub investors: InvestorService,
    pub ownership: OwnershipService,
    pub payments: PaymentService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(PaymentSettings {
            auto_poll: false,
            ..Default::default()
        })
    }

    pub fn with_settings(settings: PaymentSettings) -> Self {
        let store = Arc::new(MemoryLedger::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let gateway = Arc::new(ScriptedGateway::new());

        Self {
            loans: LoanService::new(store.clone(), clock.clone()),
            investors: InvestorService::new(store.clone(), clock.clone()),
            ownership: OwnershipService::new(store.clone(), clock.clone()),
            payments: PaymentService::new(
                store.clone(),
                clock.clone(),
                gateway.clone(),
                PushThrottle::new(10),
                settings,
            ),
            store,
            clock,
            gateway,
        }
    }

    pub fn advance_days(&self, days: i64) {
        self.clock.advance(chrono::Duration::days(days));
    }

    pub async fn company_loan(&self, principal: i64) -> LoanView {
        self.loans
            .disburse(DisburseRequest {
                client_id: Uuid::new_v4(),
                principal,
                funding_source: FundingSource::Company,
                investor_id: None,
                method: Some(PaymentMethod::Mpesa),
                external_reference: None,
            })
            .await
            .expect("disburse company loan")
            .account
    }

    pub async fn investor_loan(&self, investor_id: Uuid, principal: i64) -> LoanView {
        self.loans
            .disburse(DisburseRequest {
                client_id: Uuid::new_v4(),
                principal,
                funding_source: FundingSource::Investor,
                investor_id: Some(investor_id),
                method: Some(PaymentMethod::Bank),
                external_reference: None,
            })
            .await
            .expect("disburse investor loan")
            .account
    }

    pub async fn funded_investor(&self, amount: i64) -> Investor {
        let investor = self
            .investors
            .open_investor(OpenInvestorRequest {
                name: "Achieng Otieno".to_string(),
                phone_number: "0712345678".to_string(),
            })
            .await
            .expect("open investor");
        self.investors
            .invest(
                investor.id,
                InvestRequest {
                    amount,
                    method: PaymentMethod::Bank,
                    external_reference: None,
                },
            )
            .await
            .expect("invest")
            .account
    }
}
