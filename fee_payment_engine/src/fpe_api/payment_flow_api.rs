use std::fmt::Debug;

use chrono::Duration;
use log::*;

use crate::{
    config::EngineConfig,
    db::traits::{AllocationResult, ApplyOnce, CreditApplication, PaymentGatewayDatabase, PaymentGatewayError},
    db_types::{FailedPayment, MatchFailure, MatchFailureReason, NewFeeAssignment, NewPayment, Payment, PaymentStatus},
    events::{EventProducers, PaymentAllocatedEvent, PaymentFailedEvent, PaymentUnmatchedEvent},
    fpe_api::payment_objects::{ClaimResult, FeeAssignmentResult, PaymentOutcome, RetrySummary},
    helpers::{AccountMatcher, MatchOutcome, StudentLocks},
};

/// `PaymentFlowApi` drives a payment notification from the idempotency guard through matching and allocation, and
/// handles manual resolution of unmatched payments and explicit credit application.
///
/// Every allocation for a student happens while holding that student's lock, so concurrent payments for the same
/// student are applied one after the other. Payments for different students proceed in parallel.
#[derive(Clone)]
pub struct PaymentFlowApi<B> {
    db: B,
    producers: EventProducers,
    locks: StudentLocks,
    matcher: AccountMatcher,
    config: EngineConfig,
}

impl<B> Debug for PaymentFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentFlowApi ({})", self.config.currency)
    }
}

impl<B> PaymentFlowApi<B> {
    pub fn new(db: B, producers: EventProducers) -> Self {
        let config = EngineConfig::default();
        let matcher = AccountMatcher::new(&config.reference_prefixes);
        Self { db, producers, locks: StudentLocks::new(), matcher, config }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.matcher = AccountMatcher::new(&config.reference_prefixes);
        self.config = config;
        self
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn matcher(&self) -> &AccountMatcher {
        &self.matcher
    }
}

impl<B> PaymentFlowApi<B>
where B: PaymentGatewayDatabase
{
    /// The idempotency guard. Claims the provider transaction id before anything else happens.
    ///
    /// A repeated transaction id is not an error; it yields [`ClaimResult::Duplicate`] and nothing is written.
    pub async fn claim_payment(&self, payment: NewPayment) -> Result<ClaimResult, PaymentGatewayError> {
        let txid = payment.txid.clone();
        match self.db.claim_payment(payment).await {
            Ok(payment) => Ok(ClaimResult::Claimed(payment)),
            Err(PaymentGatewayError::PaymentAlreadyExists(_)) => {
                info!("🔄️💰️ Payment {txid} has already been received. Ignoring the duplicate delivery.");
                Ok(ClaimResult::Duplicate(txid))
            },
            Err(e) => Err(e),
        }
    }

    /// Stores a notification that failed validation in `Failed` status, so operators can see it.
    ///
    /// This goes through the same idempotency guard as valid payments.
    pub async fn record_invalid_payment(&self, payment: FailedPayment) -> Result<ClaimResult, PaymentGatewayError> {
        let txid = payment.txid.clone();
        match self.db.record_failed_payment(payment).await {
            Ok(payment) => {
                warn!(
                    "🔄️❌️ Notification {txid} failed validation: {}",
                    payment.reason.as_deref().unwrap_or_default()
                );
                self.call_payment_failed_hook(&payment).await;
                Ok(ClaimResult::Claimed(payment))
            },
            Err(PaymentGatewayError::PaymentAlreadyExists(_)) => {
                info!("🔄️❌️ Invalid notification {txid} has already been recorded.");
                Ok(ClaimResult::Duplicate(txid))
            },
            Err(e) => Err(e),
        }
    }

    /// Claims and then processes a new payment. See [`Self::process_claimed_payment`].
    pub async fn process_new_payment(&self, payment: NewPayment) -> Result<PaymentOutcome, PaymentGatewayError> {
        match self.claim_payment(payment).await? {
            ClaimResult::Claimed(payment) => self.process_claimed_payment(payment).await,
            ClaimResult::Duplicate(txid) => Ok(PaymentOutcome::Duplicate(txid)),
        }
    }

    /// Moves a stored payment as far through the flow as it will go.
    ///
    /// * `Pending` payments are matched against the student set. A match is allocated; anything else goes to the
    ///   unmatched queue.
    /// * `Matched` payments (interrupted before allocation) are allocated to their student.
    /// * Payments in any other status are reported as they stand.
    ///
    /// On a transient error the payment keeps its status, and the retry worker will pick it up again later.
    pub async fn process_claimed_payment(&self, payment: Payment) -> Result<PaymentOutcome, PaymentGatewayError> {
        let txid = payment.txid.clone();
        match (payment.status, payment.student_id) {
            (PaymentStatus::Pending, _) => self.match_and_allocate(payment).await,
            (PaymentStatus::Matched | PaymentStatus::Allocated, Some(student_id)) => {
                self.allocate(&txid, student_id).await
            },
            (PaymentStatus::Unmatched, _) => {
                let failure = stored_failure(&payment);
                Ok(PaymentOutcome::Unmatched(payment, failure))
            },
            (PaymentStatus::Failed, _) => Ok(PaymentOutcome::Failed(payment)),
            (status, None) => {
                error!("🔄️💰️ Payment {txid} is {status} but is not linked to a student. This should not happen.");
                Err(PaymentGatewayError::DatabaseError(format!("Payment {txid} is {status} without a student")))
            },
        }
    }

    async fn match_and_allocate(&self, payment: Payment) -> Result<PaymentOutcome, PaymentGatewayError> {
        let txid = payment.txid.clone();
        if !payment.currency.eq_ignore_ascii_case(&self.config.currency) {
            let reason = format!(
                "CurrencyMismatch: payment is in {}, fees are billed in {}",
                payment.currency, self.config.currency
            );
            return self.fail_payment(&txid, &reason).await;
        }
        let students = self.db.fetch_student_index().await?;
        match self.matcher.match_reference(payment.account_reference.as_deref(), &students) {
            MatchOutcome::Matched(student) => {
                debug!("🔄️💰️ Payment {txid} matched to {} (#{})", student.admission_no, student.id);
                self.db.mark_matched(&txid, student.id).await?;
                self.allocate(&txid, student.id).await
            },
            MatchOutcome::Unmatched(failure) => {
                info!(
                    "🔄️❓️ Payment {txid} with reference {:?} could not be matched: {failure}",
                    payment.account_reference
                );
                let payment = self.db.mark_unmatched(&txid, &failure).await?;
                self.call_payment_unmatched_hook(&payment, &failure).await;
                Ok(PaymentOutcome::Unmatched(payment, failure))
            },
        }
    }

    /// Runs the apply-once allocation under the student's lock.
    async fn allocate(&self, txid: &str, student_id: i64) -> Result<PaymentOutcome, PaymentGatewayError> {
        let guard = self.locks.lock(student_id).await;
        let result = self.db.allocate_payment(txid, student_id).await;
        drop(guard);
        match result {
            Ok(ApplyOnce::Applied(result)) => {
                debug!(
                    "🔄️💰️ Payment {txid} allocated. {} to fees, {} to credit. Outstanding: {}",
                    result.applied_to_fees(),
                    result.credit_generated,
                    result.outstanding_balance
                );
                self.call_payment_allocated_hook(&result).await;
                Ok(PaymentOutcome::Allocated(result))
            },
            Ok(ApplyOnce::AlreadyApplied(result)) => Ok(PaymentOutcome::AlreadyAllocated(result)),
            Err(PaymentGatewayError::CurrencyMismatch { payment, expected, .. }) => {
                let reason = format!("CurrencyMismatch: payment is in {payment}, fees are billed in {expected}");
                self.fail_payment(txid, &reason).await
            },
            Err(e) => {
                warn!("🔄️💰️ Could not allocate payment {txid} to student #{student_id}: {e}");
                Err(e)
            },
        }
    }

    async fn fail_payment(&self, txid: &str, reason: &str) -> Result<PaymentOutcome, PaymentGatewayError> {
        warn!("🔄️❌️ Payment {txid} failed: {reason}");
        let payment = self.db.mark_failed(txid, reason).await?;
        self.call_payment_failed_hook(&payment).await;
        Ok(PaymentOutcome::Failed(payment))
    }

    /// Manually links an unmatched payment to a student and allocates it.
    ///
    /// Resolution is idempotent: resolving a payment that has already been allocated returns the existing allocation.
    /// Resolving a failed payment, or resolving to a student that does not exist, is an error.
    pub async fn resolve_unmatched(&self, txid: &str, student_id: i64) -> Result<PaymentOutcome, PaymentGatewayError> {
        let payment =
            self.db.fetch_payment(txid).await?.ok_or_else(|| PaymentGatewayError::PaymentNotFound(txid.to_string()))?;
        match payment.status {
            PaymentStatus::Failed => {
                return Err(PaymentGatewayError::IllegalStatusTransition {
                    txid: txid.to_string(),
                    from: PaymentStatus::Failed,
                    to: PaymentStatus::Matched,
                })
            },
            PaymentStatus::Allocated | PaymentStatus::Matched => {
                if payment.student_id != Some(student_id) {
                    warn!(
                        "🔄️🧑‍🎓️ Payment {txid} is already {} to student {:?}. Ignoring the request to resolve it to \
                         #{student_id}.",
                        payment.status, payment.student_id
                    );
                }
                return self.process_claimed_payment(payment).await;
            },
            PaymentStatus::Pending | PaymentStatus::Unmatched => {},
        }
        self.db.fetch_student(student_id).await?.ok_or(PaymentGatewayError::StudentNotFound(student_id))?;
        match self.db.mark_matched(txid, student_id).await {
            Ok(_) => {
                info!("🔄️🧑‍🎓️ Payment {txid} manually resolved to student #{student_id}");
                self.allocate(txid, student_id).await
            },
            // Somebody else resolved it first. Report what they did.
            Err(PaymentGatewayError::IllegalStatusTransition { from, .. })
                if matches!(from, PaymentStatus::Matched | PaymentStatus::Allocated) =>
            {
                let payment = self
                    .db
                    .fetch_payment(txid)
                    .await?
                    .ok_or_else(|| PaymentGatewayError::PaymentNotFound(txid.to_string()))?;
                self.process_claimed_payment(payment).await
            },
            Err(e) => Err(e),
        }
    }

    /// Applies the student's credit balance to their outstanding fees in the billing currency.
    pub async fn apply_credit(&self, student_id: i64) -> Result<CreditApplication, PaymentGatewayError> {
        let _guard = self.locks.lock(student_id).await;
        let application = self.db.apply_credit(student_id, &self.config.currency).await?;
        if !application.is_empty() {
            debug!("🔄️💳️ Applied {} of credit for student #{student_id}", application.applied);
        }
        Ok(application)
    }

    /// Creates a fee assignment. If auto-apply is enabled and the student has credit, the credit is applied at once.
    pub async fn assign_fee(&self, assignment: NewFeeAssignment) -> Result<FeeAssignmentResult, PaymentGatewayError> {
        let student_id = assignment.student_id;
        let student =
            self.db.fetch_student(student_id).await?.ok_or(PaymentGatewayError::StudentNotFound(student_id))?;
        let assignment = self.db.insert_fee_assignment(assignment).await?;
        if !(self.config.auto_apply_credit && student.credit_balance.is_positive()) {
            return Ok(FeeAssignmentResult { assignment, credit_applied: None });
        }
        let application = self.apply_credit(student_id).await?;
        // Re-read the assignment, since the credit may have been applied to it
        let id = assignment.id;
        let assignment =
            self.db.fetch_fee_assignments(student_id).await?.into_iter().find(|a| a.id == id).ok_or_else(|| {
                PaymentGatewayError::DatabaseError(format!("Fee assignment #{id} disappeared after credit application"))
            })?;
        Ok(FeeAssignmentResult { assignment, credit_applied: Some(application) })
    }

    /// Runs the account matcher against the current student set without recording anything.
    pub async fn check_reference(&self, reference: Option<&str>) -> Result<MatchOutcome, PaymentGatewayError> {
        let students = self.db.fetch_student_index().await?;
        Ok(self.matcher.match_reference(reference, &students))
    }

    /// Re-drives payments that were interrupted mid-flow (left `Pending` or `Matched` for at least `min_age`).
    pub async fn retry_stale_payments(&self, min_age: Duration) -> Result<RetrySummary, PaymentGatewayError> {
        let stale = self.db.fetch_stale_payments(min_age).await?;
        let mut summary = RetrySummary::default();
        for payment in stale {
            let txid = payment.txid.clone();
            let outcome = self.process_claimed_payment(payment).await;
            if let Err(e) = &outcome {
                warn!("🔄️🔁️ Retry of payment {txid} failed again: {e}");
            }
            summary.record(&outcome);
        }
        Ok(summary)
    }

    async fn call_payment_allocated_hook(&self, result: &AllocationResult) {
        for emitter in &self.producers.payment_allocated_producer {
            debug!("🔄️📬️ Notifying payment allocated hook subscribers");
            let event = PaymentAllocatedEvent::new(
                result.payment.clone(),
                result.student.clone(),
                result.records.clone(),
                result.credit_generated,
                result.outstanding_balance,
            );
            emitter.publish_event(event).await;
        }
    }

    async fn call_payment_unmatched_hook(&self, payment: &Payment, failure: &MatchFailure) {
        for emitter in &self.producers.payment_unmatched_producer {
            debug!("🔄️📬️ Notifying payment unmatched hook subscribers");
            emitter.publish_event(PaymentUnmatchedEvent::new(payment.clone(), failure.clone())).await;
        }
    }

    async fn call_payment_failed_hook(&self, payment: &Payment) {
        for emitter in &self.producers.payment_failed_producer {
            debug!("🔄️📬️ Notifying payment failed hook subscribers");
            emitter.publish_event(PaymentFailedEvent::new(payment.clone())).await;
        }
    }
}

/// Rebuilds the match failure stored on an unmatched payment.
fn stored_failure(payment: &Payment) -> MatchFailure {
    let reason = payment.reason.as_deref().and_then(|r| r.parse().ok()).unwrap_or(MatchFailureReason::NotFound);
    MatchFailure::new(reason).with_candidates(payment.candidates().to_vec())
}
