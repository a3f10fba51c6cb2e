//! Hands parsed webhook notifications to the engine, and parks the ones the store could not take.
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use fee_payment_engine::{
    payment_objects::{ClaimResult, PaymentOutcome},
    PaymentFlowApi,
    PaymentGatewayDatabase,
    PaymentGatewayError,
};
use log::*;

use crate::{helpers::Backoff, mpesa::Notification};

pub const DEFAULT_RETRY_QUEUE_CAPACITY: usize = 1_000;
pub const DEFAULT_REDELIVERY_ATTEMPTS: u32 = 10;

/// What happened to a notification once the engine had it.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// The payment was claimed and processed as far as it would go.
    Processed(PaymentOutcome),
    /// The payment was claimed, but processing stopped on a store error. The retry sweep picks it up from there.
    Deferred(String),
    /// The transaction id had already been received.
    Duplicate(String),
    /// An invalid notification was stored in `Failed` status.
    Recorded(String),
    Ignored,
}

/// Delivers a notification to the engine.
///
/// An `Err` means nothing was stored, i.e. the idempotency claim itself failed. The caller should park the
/// notification and try again later. Errors after a successful claim are not returned; the payment is already in the
/// store and the retry sweep will re-drive it.
pub async fn deliver_notification<B>(
    api: &PaymentFlowApi<B>,
    notification: Notification,
) -> Result<Delivery, PaymentGatewayError>
where
    B: PaymentGatewayDatabase,
{
    match notification {
        Notification::Payment(payment) => match api.claim_payment(payment).await? {
            ClaimResult::Duplicate(txid) => Ok(Delivery::Duplicate(txid)),
            ClaimResult::Claimed(payment) => {
                let txid = payment.txid.clone();
                match api.process_claimed_payment(payment).await {
                    Ok(outcome) => Ok(Delivery::Processed(outcome)),
                    Err(e) => {
                        warn!("🔁️ Payment {txid} was received but could not be processed yet. {e}");
                        Ok(Delivery::Deferred(txid))
                    },
                }
            },
        },
        Notification::Invalid(failed) | Notification::Unidentifiable(failed) => {
            match api.record_invalid_payment(failed).await? {
                ClaimResult::Claimed(payment) => Ok(Delivery::Recorded(payment.txid)),
                ClaimResult::Duplicate(txid) => Ok(Delivery::Duplicate(txid)),
            }
        },
        Notification::Ignored(reason) => {
            info!("🔁️ Notification ignored. {reason}");
            Ok(Delivery::Ignored)
        },
    }
}

//-------------------------------------------------  RetryQueue  -------------------------------------------------------
#[derive(Debug, Clone)]
pub struct ParkedNotification {
    pub notification: Notification,
    /// Delivery attempts made so far, including the original one
    pub attempts: u32,
    pub not_before: Instant,
}

/// An in-memory holding area for notifications that arrived while the store was unavailable.
///
/// The provider has already been told the notification was accepted, so these are our responsibility. The queue is
/// bounded; when it is full, or a notification has used up its attempts, it is logged in full at `error` level so that
/// an operator can replay it.
#[derive(Clone)]
pub struct RetryQueue {
    items: Arc<Mutex<VecDeque<ParkedNotification>>>,
    capacity: usize,
    backoff: Backoff,
}

impl Default for RetryQueue {
    fn default() -> Self {
        let backoff = Backoff::new(DEFAULT_REDELIVERY_ATTEMPTS, Duration::from_secs(60), Duration::from_secs(3_600));
        Self::new(DEFAULT_RETRY_QUEUE_CAPACITY, backoff)
    }
}

impl RetryQueue {
    pub fn new(capacity: usize, backoff: Backoff) -> Self {
        Self { items: Arc::new(Mutex::new(VecDeque::new())), capacity, backoff }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<ParkedNotification>> {
        // Poisoning is ignored. The queue only holds plain data.
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    /// Parks a notification after its first failed delivery. Returns false if it had to be dropped.
    pub fn park(&self, notification: Notification) -> bool {
        self.park_at(ParkedNotification { notification, attempts: 1, not_before: Instant::now() })
    }

    /// Parks a notification again after another failed delivery. Returns false if it was dropped.
    pub fn repark(&self, mut parked: ParkedNotification) -> bool {
        parked.attempts += 1;
        parked.not_before = Instant::now();
        self.park_at(parked)
    }

    fn park_at(&self, mut parked: ParkedNotification) -> bool {
        let label = parked.notification.txid().unwrap_or("<no txid>").to_string();
        if parked.attempts >= self.backoff.max_attempts {
            error!(
                "🧾️ Giving up on notification {label} after {} attempts. It must be replayed by hand: {:?}",
                parked.attempts, parked.notification
            );
            return false;
        }
        let mut queue = self.queue();
        if queue.len() >= self.capacity {
            error!("🧾️ The retry queue is full. Notification {label} must be replayed by hand: {:?}", parked.notification);
            return false;
        }
        parked.not_before += self.backoff.delay_for(parked.attempts);
        debug!("🧾️ Parked notification {label} (attempt {}). {} in the queue.", parked.attempts, queue.len() + 1);
        queue.push_back(parked);
        true
    }

    /// Removes and returns every notification that is due for another attempt at `now`.
    pub fn take_due(&self, now: Instant) -> Vec<ParkedNotification> {
        let mut queue = self.queue();
        let (due, waiting): (VecDeque<_>, VecDeque<_>) = queue.drain(..).partition(|p| p.not_before <= now);
        *queue = waiting;
        due.into()
    }
}
