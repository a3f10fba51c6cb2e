use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    db::traits::{AllocationResult, CreditApplication, Pagination},
    db_types::{
        AllocationRecord,
        FeeAssignment,
        MatchCandidate,
        MatchFailure,
        Money,
        Payment,
        PaymentChannel,
        PaymentStatus,
        Student,
    },
};

/// What the idempotency guard made of a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimResult {
    /// First delivery. The payment has been stored and may now be processed.
    Claimed(Payment),
    /// The transaction id has been seen before. Nothing was written.
    Duplicate(String),
}

impl ClaimResult {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, ClaimResult::Duplicate(_))
    }
}

/// Where a payment ended up after a pass through the flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentOutcome {
    Allocated(AllocationResult),
    /// The payment had already been allocated by an earlier delivery or resolution. This is that allocation.
    AlreadyAllocated(AllocationResult),
    Unmatched(Payment, MatchFailure),
    Failed(Payment),
    Duplicate(String),
}

impl PaymentOutcome {
    pub fn status(&self) -> Option<PaymentStatus> {
        match self {
            PaymentOutcome::Allocated(_) | PaymentOutcome::AlreadyAllocated(_) => Some(PaymentStatus::Allocated),
            PaymentOutcome::Unmatched(..) => Some(PaymentStatus::Unmatched),
            PaymentOutcome::Failed(_) => Some(PaymentStatus::Failed),
            PaymentOutcome::Duplicate(_) => None,
        }
    }

    pub fn allocation(&self) -> Option<&AllocationResult> {
        match self {
            PaymentOutcome::Allocated(r) | PaymentOutcome::AlreadyAllocated(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeAssignmentResult {
    pub assignment: FeeAssignment,
    /// Set when existing credit was applied straight away
    pub credit_applied: Option<CreditApplication>,
}

/// Counts from one sweep of the retry worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySummary {
    pub redriven: usize,
    pub allocated: usize,
    pub unmatched: usize,
    pub failed: usize,
    pub errors: usize,
}

impl RetrySummary {
    pub fn record(&mut self, outcome: &Result<PaymentOutcome, crate::PaymentGatewayError>) {
        self.redriven += 1;
        match outcome {
            Ok(PaymentOutcome::Allocated(_) | PaymentOutcome::AlreadyAllocated(_)) => self.allocated += 1,
            Ok(PaymentOutcome::Unmatched(..)) => self.unmatched += 1,
            Ok(PaymentOutcome::Failed(_)) => self.failed += 1,
            Ok(PaymentOutcome::Duplicate(_)) => {},
            Err(_) => self.errors += 1,
        }
    }
}

/// An entry in the unmatched queue, as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmatchedPayment {
    pub txid: String,
    pub channel: PaymentChannel,
    pub account_reference: Option<String>,
    pub amount: Money,
    pub currency: String,
    pub payer: String,
    pub payer_name: Option<String>,
    pub paid_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub candidates: Vec<MatchCandidate>,
}

impl From<Payment> for UnmatchedPayment {
    fn from(payment: Payment) -> Self {
        let candidates = payment.candidates().to_vec();
        Self {
            txid: payment.txid,
            channel: payment.channel,
            account_reference: payment.account_reference,
            amount: payment.amount,
            currency: payment.currency,
            payer: payment.payer,
            payer_name: payment.payer_name,
            paid_at: payment.paid_at,
            reason: payment.reason,
            candidates,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub size: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, pagination: Pagination) -> Self {
        Self { items, total, page: pagination.page, size: pagination.size }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetail {
    pub payment: Payment,
    pub allocations: Vec<AllocationRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentStatement {
    pub student: Student,
    pub fee_assignments: Vec<FeeAssignment>,
    pub outstanding_balance: Money,
    pub payments: Vec<Payment>,
    pub allocations: Vec<AllocationRecord>,
}
