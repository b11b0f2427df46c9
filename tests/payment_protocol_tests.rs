//! Push payment reconciliation: polling outcomes, callbacks and the
//! exactly-once ledger write

mod common;

use std::time::Duration as StdDuration;

use common::{completed, pending, Harness};
use herdbook_server::ledger::{LedgerError, LedgerStore, TransactionType};
use herdbook_server::loan::PaymentRequest;
use herdbook_server::models::{PaymentMethod, PaymentType};
use herdbook_server::payments::{
    CallbackResult, GatewayError, InitiatePushRequest, PaymentError, PaymentSettings,
    SessionState,
};
use uuid::Uuid;

fn push(loan_id: Uuid, amount: i64, payment_type: PaymentType) -> InitiatePushRequest {
    InitiatePushRequest {
        loan_id,
        amount,
        phone_number: "0712345678".to_string(),
        payment_type,
    }
}

fn callback(checkout_request_id: &str, result_code: i64, receipt: Option<&str>) -> CallbackResult {
    CallbackResult {
        checkout_request_id: checkout_request_id.to_string(),
        result_code,
        result_description: "callback".to_string(),
        receipt: receipt.map(str::to_string),
        amount: None,
    }
}

async fn payments_for(h: &Harness, loan_id: Uuid) -> Vec<herdbook_server::ledger::LedgerEntry> {
    h.store
        .entries_for_loan(loan_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.entry_type.is_repayment())
        .collect()
}

// ============================================================================
// Initiation
// ============================================================================

#[tokio::test]
async fn test_push_is_validated_like_a_direct_payment() {
    let h = Harness::new();
    let loan = h.company_loan(10_000).await;

    let err = h
        .payments
        .initiate_push(push(loan.loan.id, 12_000, PaymentType::Principal))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PaymentError::Ledger(LedgerError::AmountExceedsPrincipal { .. })
    ));

    let err = h
        .payments
        .initiate_push(push(loan.loan.id, 0, PaymentType::Principal))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Ledger(LedgerError::InvalidAmount(0))));

    let mut bad_phone = push(loan.loan.id, 1_000, PaymentType::Principal);
    bad_phone.phone_number = "0812345678".to_string();
    let err = h.payments.initiate_push(bad_phone).await.unwrap_err();
    assert!(matches!(
        err,
        PaymentError::Ledger(LedgerError::InvalidPhoneNumber(_))
    ));

    assert_eq!(h.gateway.pushes(), 0);
}

#[tokio::test]
async fn test_new_session_waits_before_first_query() {
    let h = Harness::new();
    let loan = h.company_loan(10_000).await;

    let session = h
        .payments
        .initiate_push(push(loan.loan.id, 5_000, PaymentType::Principal))
        .await
        .unwrap();
    assert_eq!(session.state, SessionState::Initiated);
    assert_eq!(session.next_poll_delay_ms, 10_000);
    assert_eq!(session.phone_number, "254712345678");
    assert_eq!(session.attempt_count, 0);
}

#[tokio::test]
async fn test_pushes_are_throttled_per_phone() {
    let h = Harness::new();
    let loan = h.company_loan(10_000).await;

    for _ in 0..10 {
        h.payments
            .initiate_push(push(loan.loan.id, 100, PaymentType::Principal))
            .await
            .unwrap();
    }
    let err = h
        .payments
        .initiate_push(push(loan.loan.id, 100, PaymentType::Principal))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Throttled(_)));
    assert_eq!(h.gateway.pushes(), 10);
}

#[tokio::test]
async fn test_rejected_push_opens_no_session() {
    let h = Harness::new();
    let loan = h.company_loan(10_000).await;
    h.gateway
        .reject_pushes_with(GatewayError::Rejected("Invalid Access Token".into()))
        .await;

    let err = h
        .payments
        .initiate_push(push(loan.loan.id, 1_000, PaymentType::Principal))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Gateway(GatewayError::Rejected(_))));
}

// ============================================================================
// Polling
// ============================================================================

#[tokio::test]
async fn test_confirmed_push_is_written_exactly_once() {
    let h = Harness::new();
    let loan = h.company_loan(10_000).await;
    h.gateway
        .script(vec![pending(), pending(), pending(), completed(0, Some("QKX1Y2Z3"))])
        .await;

    let session = h
        .payments
        .initiate_push(push(loan.loan.id, 5_000, PaymentType::Principal))
        .await
        .unwrap();
    let id = session.checkout_request_id.clone();

    let mut delays = Vec::new();
    for _ in 0..3 {
        let session = h.payments.poll_status(&id).await.unwrap();
        assert_eq!(session.state, SessionState::Polling);
        delays.push(session.next_poll_delay_ms);
    }
    assert_eq!(delays, vec![12_000, 18_000, 27_000]);

    let session = h.payments.poll_status(&id).await.unwrap();
    assert_eq!(session.state, SessionState::Confirmed);
    assert_eq!(session.receipt.as_deref(), Some("QKX1Y2Z3"));
    assert!(session.transaction_id.is_some());
    assert!(session.ledger_error.is_none());

    // Late poll and a duplicate callback change nothing
    h.payments.poll_status(&id).await.unwrap();
    h.payments
        .handle_callback(callback(&id, 0, Some("QKX1Y2Z3")))
        .await
        .unwrap();
    assert_eq!(h.gateway.queries(), 4);

    let written = payments_for(&h, loan.loan.id).await;
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].entry_type, TransactionType::PaymentPrincipal);
    assert_eq!(written[0].amount, 5_000);
    assert_eq!(written[0].method, Some(PaymentMethod::Mpesa));
    assert_eq!(written[0].checkout_request_id.as_deref(), Some(id.as_str()));
    assert_eq!(written[0].external_reference.as_deref(), Some("QKX1Y2Z3"));

    let view = h.loans.get_loan(loan.loan.id).await.unwrap();
    assert_eq!(view.loan.principal_current, 5_000);
}

#[tokio::test]
async fn test_failure_code_leaves_loan_untouched() {
    let h = Harness::new();
    let loan = h.company_loan(10_000).await;
    h.gateway.script(vec![pending(), completed(1032, None)]).await;

    let session = h
        .payments
        .initiate_push(push(loan.loan.id, 5_000, PaymentType::Principal))
        .await
        .unwrap();
    let id = session.checkout_request_id;

    h.payments.poll_status(&id).await.unwrap();
    let session = h.payments.poll_status(&id).await.unwrap();
    assert_eq!(session.state, SessionState::Failed);
    assert_eq!(session.result_code, Some(1032));
    assert!(session.transaction_id.is_none());

    // Terminal: a late success callback is ignored
    let session = h
        .payments
        .handle_callback(callback(&id, 0, Some("LATE")))
        .await
        .unwrap();
    assert_eq!(session.state, SessionState::Failed);

    assert!(payments_for(&h, loan.loan.id).await.is_empty());
    let view = h.loans.get_loan(loan.loan.id).await.unwrap();
    assert_eq!(view.loan.principal_current, 10_000);
}

#[tokio::test]
async fn test_unknown_result_code_keeps_polling() {
    let h = Harness::new();
    let loan = h.company_loan(10_000).await;
    h.gateway
        .script(vec![completed(4999, None), completed(0, Some("QKOK"))])
        .await;

    let id = h
        .payments
        .initiate_push(push(loan.loan.id, 2_000, PaymentType::Principal))
        .await
        .unwrap()
        .checkout_request_id;

    let session = h.payments.poll_status(&id).await.unwrap();
    assert_eq!(session.state, SessionState::Polling);
    assert_eq!(session.result_code, Some(4999));

    let session = h.payments.poll_status(&id).await.unwrap();
    assert_eq!(session.state, SessionState::Confirmed);
}

#[tokio::test]
async fn test_session_times_out_after_twelve_attempts() {
    let h = Harness::new();
    let loan = h.company_loan(10_000).await;

    let id = h
        .payments
        .initiate_push(push(loan.loan.id, 2_000, PaymentType::Principal))
        .await
        .unwrap()
        .checkout_request_id;

    let mut session = h.payments.session(&id).await.unwrap();
    for _ in 0..12 {
        session = h.payments.poll_status(&id).await.unwrap();
    }
    assert_eq!(session.state, SessionState::TimedOut);
    assert_eq!(session.attempt_count, 12);

    h.payments.poll_status(&id).await.unwrap();
    assert_eq!(h.gateway.queries(), 12);
    assert!(payments_for(&h, loan.loan.id).await.is_empty());
}

#[tokio::test]
async fn test_gateway_errors_slow_polling_down() {
    let h = Harness::new();
    let loan = h.company_loan(10_000).await;
    h.gateway
        .script(vec![
            Err(GatewayError::RateLimited {
                retry_after: Some(StdDuration::from_secs(5)),
            }),
            Err(GatewayError::Transport("connection reset".into())),
        ])
        .await;

    let id = h
        .payments
        .initiate_push(push(loan.loan.id, 2_000, PaymentType::Principal))
        .await
        .unwrap()
        .checkout_request_id;

    let session = h.payments.poll_status(&id).await.unwrap();
    assert_eq!(session.next_poll_delay_ms, 5_000);
    let session = h.payments.poll_status(&id).await.unwrap();
    assert_eq!(session.next_poll_delay_ms, 10_400);
    assert_eq!(session.state, SessionState::Polling);
}

// ============================================================================
// Callbacks and reconciliation
// ============================================================================

#[tokio::test]
async fn test_callback_confirms_without_polling() {
    let h = Harness::new();
    let loan = h.company_loan(10_000).await;

    let id = h
        .payments
        .initiate_push(push(loan.loan.id, 3_000, PaymentType::Interest))
        .await
        .unwrap()
        .checkout_request_id;

    let session = h
        .payments
        .handle_callback(callback(&id, 0, Some("QKCALLBACK")))
        .await
        .unwrap();
    assert_eq!(session.state, SessionState::Confirmed);
    assert!(session.transaction_id.is_some());

    let written = payments_for(&h, loan.loan.id).await;
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].entry_type, TransactionType::PaymentInterest);

    let err = h
        .payments
        .handle_callback(callback("ws_CO_UNKNOWN", 0, None))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::SessionNotFound(_)));
}

#[tokio::test]
async fn test_ledger_rejection_is_kept_for_reconciliation() {
    let h = Harness::new();
    let loan = h.company_loan(10_000).await;
    h.gateway.script(vec![completed(0, Some("QKLATE"))]).await;

    let id = h
        .payments
        .initiate_push(push(loan.loan.id, 3_000, PaymentType::Interest))
        .await
        .unwrap()
        .checkout_request_id;

    // The interest is settled in cash while the push is outstanding
    h.loans
        .apply_payment(
            loan.loan.id,
            PaymentRequest {
                amount: 3_000,
                payment_type: PaymentType::Interest,
                method: PaymentMethod::Cash,
                external_reference: None,
                notes: None,
            },
        )
        .await
        .unwrap();

    let session = h.payments.poll_status(&id).await.unwrap();
    assert_eq!(session.state, SessionState::Confirmed);
    assert!(session.transaction_id.is_none());
    assert!(session
        .ledger_error
        .as_deref()
        .is_some_and(|e| e.contains("already settled")));

    let written = payments_for(&h, loan.loan.id).await;
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].method, Some(PaymentMethod::Cash));
}

#[tokio::test]
async fn test_settled_sessions_are_evicted_after_retention() {
    let h = Harness::new();
    let loan = h.company_loan(10_000).await;
    h.gateway.script(vec![completed(0, Some("QKEVICT"))]).await;

    let id = h
        .payments
        .initiate_push(push(loan.loan.id, 1_000, PaymentType::Principal))
        .await
        .unwrap()
        .checkout_request_id;
    h.payments.poll_status(&id).await.unwrap();

    assert_eq!(h.payments.evict_expired().await, 0);
    h.clock.advance(chrono::Duration::minutes(31));
    assert_eq!(h.payments.evict_expired().await, 1);
    assert!(matches!(
        h.payments.session(&id).await,
        Err(PaymentError::SessionNotFound(_))
    ));
}

// ============================================================================
// Racing confirmations
// ============================================================================

async fn assert_recorded_once(h: &Harness, loan_id: Uuid, id: &str, amount: i64) {
    let written: Vec<_> = payments_for(h, loan_id)
        .await
        .into_iter()
        .filter(|e| e.checkout_request_id.as_deref() == Some(id))
        .collect();
    assert_eq!(written.len(), 1);

    let session = h.payments.session(id).await.unwrap();
    assert_eq!(session.state, SessionState::Confirmed);
    assert_eq!(session.transaction_id, Some(written[0].id));
    assert!(session.ledger_error.is_none());

    let statement = h.loans.loan_statement(loan_id).await.unwrap();
    assert!(statement.replay_consistent);
    assert_eq!(statement.loan.loan.principal_current, 10_000 - amount);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_poll_racing_callback_writes_once() {
    let h = Harness::new();
    let loan = h.company_loan(10_000).await;
    h.gateway.script(vec![completed(0, Some("QKRACE1"))]).await;

    let id = h
        .payments
        .initiate_push(push(loan.loan.id, 4_000, PaymentType::Principal))
        .await
        .unwrap()
        .checkout_request_id;

    let poller = {
        let payments = h.payments.clone();
        let id = id.clone();
        tokio::spawn(async move { payments.poll_status(&id).await })
    };
    let notifier = {
        let payments = h.payments.clone();
        let id = id.clone();
        tokio::spawn(async move {
            payments
                .handle_callback(callback(&id, 0, Some("QKRACE1")))
                .await
        })
    };
    poller.await.unwrap().unwrap();
    notifier.await.unwrap().unwrap();

    assert_recorded_once(&h, loan.loan.id, &id, 4_000).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_polls_write_once() {
    let h = Harness::new();
    let loan = h.company_loan(10_000).await;
    h.gateway
        .script(vec![completed(0, Some("QKRACE2")), completed(0, Some("QKRACE2"))])
        .await;

    let id = h
        .payments
        .initiate_push(push(loan.loan.id, 2_500, PaymentType::Principal))
        .await
        .unwrap()
        .checkout_request_id;

    let (a, b) = tokio::join!(h.payments.poll_status(&id), h.payments.poll_status(&id));
    a.unwrap();
    b.unwrap();

    assert_recorded_once(&h, loan.loan.id, &id, 2_500).await;
}

// ============================================================================
// Server-held poll job
// ============================================================================

fn auto_polling() -> Harness {
    Harness::with_settings(PaymentSettings {
        auto_poll: true,
        ..Default::default()
    })
}

#[tokio::test(start_paused = true)]
async fn test_poll_job_confirms_in_background() {
    let h = auto_polling();
    let loan = h.company_loan(10_000).await;
    h.gateway.script(vec![pending(), completed(0, Some("QKJOB"))]).await;

    let id = h
        .payments
        .initiate_push(push(loan.loan.id, 4_000, PaymentType::Principal))
        .await
        .unwrap()
        .checkout_request_id;
    assert!(h.payments.is_watching(&id).await);

    // 10s initial wait, then 12s after the pending answer
    tokio::time::sleep(StdDuration::from_secs(60)).await;

    let session = h.payments.session(&id).await.unwrap();
    assert_eq!(session.state, SessionState::Confirmed);
    assert!(session.transaction_id.is_some());
    assert!(!h.payments.is_watching(&id).await);
    assert_eq!(h.gateway.queries(), 2);

    let view = h.loans.get_loan(loan.loan.id).await.unwrap();
    assert_eq!(view.loan.principal_current, 6_000);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_poll_job_never_queries() {
    let h = auto_polling();
    let loan = h.company_loan(10_000).await;

    let id = h
        .payments
        .initiate_push(push(loan.loan.id, 4_000, PaymentType::Principal))
        .await
        .unwrap()
        .checkout_request_id;

    let session = h.payments.cancel_watch(&id).await.unwrap();
    assert_eq!(session.state, SessionState::Initiated);
    assert!(!h.payments.is_watching(&id).await);

    tokio::time::sleep(StdDuration::from_secs(120)).await;
    assert_eq!(h.gateway.queries(), 0);
    assert!(payments_for(&h, loan.loan.id).await.is_empty());

    // Watching can be resumed
    assert!(h.payments.watch(&id).await.unwrap());
}
