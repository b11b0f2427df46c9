//! Server-held poll job for one push session

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::service::PaymentService;
use super::session::NextStep;

/// Sleep, query, repeat until the session settles or the job is cancelled.
/// No ledger lock is held while sleeping.
pub(crate) fn spawn_poll_job(
    service: PaymentService,
    checkout_request_id: String,
    initial_delay_ms: u64,
    mut cancel: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!(checkout_request_id = %checkout_request_id, "Poll job started");
        let mut delay_ms = initial_delay_ms;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                _ = cancel.changed() => {
                    tracing::debug!(checkout_request_id = %checkout_request_id, "Poll job stopped");
                    return;
                }
            }

            match service.advance(&checkout_request_id).await {
                Ok(NextStep::Wait(next)) => delay_ms = next,
                Ok(step) => {
                    tracing::debug!(checkout_request_id = %checkout_request_id, ?step, "Poll job finished");
                    break;
                }
                Err(e) => {
                    tracing::warn!(checkout_request_id = %checkout_request_id, error = %e, "Poll job aborted");
                    break;
                }
            }
        }

        service.stop_watching(&checkout_request_id).await;
    })
}
