use serde::{Deserialize, Serialize};

use crate::db_types::{AllocationRecord, MatchFailure, Money, Payment, Student};

/// Published after an allocation has been committed. This is what the notification dispatcher listens to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAllocatedEvent {
    pub payment: Payment,
    /// The student record as it stood after the allocation was committed
    pub student: Student,
    pub records: Vec<AllocationRecord>,
    pub credit_generated: Money,
    /// Sum of the student's remaining fee balances after this payment
    pub outstanding_balance: Money,
}

impl PaymentAllocatedEvent {
    pub fn new(
        payment: Payment,
        student: Student,
        records: Vec<AllocationRecord>,
        credit_generated: Money,
        outstanding_balance: Money,
    ) -> Self {
        Self { payment, student, records, credit_generated, outstanding_balance }
    }

    pub fn amount_applied_to_fees(&self) -> Money {
        self.payment.amount - self.credit_generated
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentUnmatchedEvent {
    pub payment: Payment,
    pub failure: MatchFailure,
}

impl PaymentUnmatchedEvent {
    pub fn new(payment: Payment, failure: MatchFailure) -> Self {
        Self { payment, failure }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailedEvent {
    pub payment: Payment,
}

impl PaymentFailedEvent {
    pub fn new(payment: Payment) -> Self {
        Self { payment }
    }

    pub fn reason(&self) -> &str {
        self.payment.reason.as_deref().unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    PaymentAllocated(PaymentAllocatedEvent),
    PaymentUnmatched(PaymentUnmatchedEvent),
    PaymentFailed(PaymentFailedEvent),
}
