use std::time::Instant;

use chrono::Duration;
use fee_payment_engine::{payment_objects::RetrySummary, PaymentFlowApi, PaymentGatewayDatabase, SqliteDatabase};
use log::*;
use tokio::task::JoinHandle;

use crate::delivery::{deliver_notification, RetryQueue};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPass {
    /// Parked notifications that reached the store on this pass
    pub redelivered: usize,
    /// Parked notifications that failed again and went back in the queue
    pub reparked: usize,
    /// Parked notifications that were given up on
    pub dropped: usize,
    /// Stored payments that were re-driven through the flow
    pub sweep: RetrySummary,
}

/// Starts the retry worker. Do not await the returned JoinHandle, as it will run indefinitely.
pub fn start_retry_worker(
    api: PaymentFlowApi<SqliteDatabase>,
    queue: RetryQueue,
    interval: std::time::Duration,
    min_age: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        info!("🔁️ Payment retry worker started");
        loop {
            timer.tick().await;
            trace!("🔁️ Running payment retry pass");
            let pass = run_retry_pass(&api, &queue, min_age).await;
            if pass != RetryPass::default() {
                info!("🔁️ Retry pass complete. {pass:?}");
            }
        }
    })
}

/// One pass of the worker: first redeliver the parked notifications that are due, then re-drive stored payments that
/// have sat in `Pending` or `Matched` for at least `min_age`.
pub async fn run_retry_pass<B>(api: &PaymentFlowApi<B>, queue: &RetryQueue, min_age: Duration) -> RetryPass
where B: PaymentGatewayDatabase {
    let mut pass = RetryPass::default();
    for parked in queue.take_due(Instant::now()) {
        let label = parked.notification.txid().unwrap_or("<no txid>").to_string();
        match deliver_notification(api, parked.notification.clone()).await {
            Ok(delivery) => {
                debug!("🔁️ Parked notification {label} delivered. {delivery:?}");
                pass.redelivered += 1;
            },
            Err(e) => {
                warn!("🔁️ Parked notification {label} could not be delivered on attempt {}. {e}", parked.attempts + 1);
                if queue.repark(parked) {
                    pass.reparked += 1;
                } else {
                    pass.dropped += 1;
                }
            },
        }
    }
    match api.retry_stale_payments(min_age).await {
        Ok(summary) => {
            if summary.redriven > 0 {
                info!(
                    "🔁️ Re-drove {} stale payments. {} allocated, {} unmatched, {} failed, {} still erroring",
                    summary.redriven, summary.allocated, summary.unmatched, summary.failed, summary.errors
                );
            }
            pass.sweep = summary;
        },
        Err(e) => {
            error!("🔁️ Could not fetch stale payments. {e}");
        },
    }
    pass
}
