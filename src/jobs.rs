//! Scheduled maintenance
//!
//! An hourly sweep persists the date-driven loan classification (so listings
//! filtered by status stay accurate), evicts settled payment sessions and
//! drops idle push throttle buckets.

use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler};

use crate::loan::LoanService;
use crate::payments::PaymentService;

/// Top of every hour
pub const SWEEP_SCHEDULE: &str = "0 0 * * * *";

const THROTTLE_IDLE: Duration = Duration::from_secs(10 * 60);

/// What one sweep changed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub loans_reclassified: usize,
    pub sessions_evicted: usize,
    pub throttle_buckets_dropped: usize,
}

/// Run one maintenance pass
pub async fn run_sweep(
    loans: &LoanService,
    payments: &PaymentService,
) -> anyhow::Result<SweepReport> {
    let loans_reclassified = loans.refresh_statuses().await?;
    let sessions_evicted = payments.evict_expired().await;
    let throttle_buckets_dropped = payments.throttle().cleanup(THROTTLE_IDLE).await;

    Ok(SweepReport {
        loans_reclassified,
        sessions_evicted,
        throttle_buckets_dropped,
    })
}

/// Register the hourly sweep and start the scheduler. The returned scheduler
/// must be kept alive for the jobs to keep firing.
pub async fn start_scheduler(
    loans: Arc<LoanService>,
    payments: Arc<PaymentService>,
) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create scheduler: {:?}", e))?;

    let job = Job::new_async(SWEEP_SCHEDULE, move |_id, _scheduler| {
        let loans = loans.clone();
        let payments = payments.clone();
        Box::pin(async move {
            match run_sweep(&loans, &payments).await {
                Ok(report) => tracing::info!(
                    loans_reclassified = report.loans_reclassified,
                    sessions_evicted = report.sessions_evicted,
                    throttle_buckets_dropped = report.throttle_buckets_dropped,
                    "Maintenance sweep finished"
                ),
                Err(e) => tracing::error!(error = %e, "Maintenance sweep failed"),
            }
        })
    })
    .map_err(|e| anyhow::anyhow!("invalid sweep schedule: {:?}", e))?;

    scheduler
        .add(job)
        .await
        .map_err(|e| anyhow::anyhow!("failed to register sweep: {:?}", e))?;
    scheduler
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start scheduler: {:?}", e))?;

    tracing::info!(schedule = SWEEP_SCHEDULE, "Maintenance sweep scheduled");
    Ok(scheduler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::MemoryLedger;
    use crate::loan::{DisburseRequest, LoanStatus};
    use crate::models::FundingSource;
    use crate::payments::{PaymentSettings, PushThrottle, SandboxGateway};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sweep_reclassifies_overdue_loans() {
        let store = Arc::new(MemoryLedger::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        let loans = LoanService::new(store.clone(), clock.clone());
        let payments = PaymentService::new(
            store.clone(),
            clock.clone(),
            Arc::new(SandboxGateway::new()),
            PushThrottle::default(),
            PaymentSettings {
                auto_poll: false,
                ..Default::default()
            },
        );

        let posting = loans
            .disburse(DisburseRequest {
                client_id: Uuid::new_v4(),
                principal: 10_000,
                funding_source: FundingSource::Company,
                investor_id: None,
                method: None,
                external_reference: None,
            })
            .await
            .unwrap();

        let report = run_sweep(&loans, &payments).await.unwrap();
        assert_eq!(report.loans_reclassified, 0);

        clock.advance(chrono::Duration::days(9));
        let report = run_sweep(&loans, &payments).await.unwrap();
        assert_eq!(report.loans_reclassified, 1);

        let loan = loans.get_loan(posting.account.loan.id).await.unwrap();
        assert_eq!(loan.loan.status, LoanStatus::Overdue);
    }
}
