use chrono::Duration;
use thiserror::Error;

use crate::{
    db::traits::{ApplyOnce, CreditApplication, StudentApiError, StudentManagement},
    db_types::{
        FailedPayment,
        FeeAssignment,
        MatchFailure,
        NewFeeAssignment,
        NewPayment,
        NewStudent,
        Payment,
        PaymentStatus,
        Student,
    },
};

/// This trait defines the highest level of behaviour for backends supporting the fee payment engine.
///
/// This behaviour includes:
/// * Claiming provider transaction ids (the idempotency guard)
/// * Moving payments through their status machine
/// * Applying payments to fee assignments, once, atomically
/// * Applying student credit
#[allow(async_fn_in_trait)]
pub trait PaymentGatewayDatabase: Clone + StudentManagement {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Claims the payment's transaction id by inserting it in `Pending` status.
    ///
    /// This is an atomic insert-or-detect-conflict. If the transaction id has been seen before, nothing is written and
    /// [`PaymentGatewayError::PaymentAlreadyExists`] is returned.
    async fn claim_payment(&self, payment: NewPayment) -> Result<Payment, PaymentGatewayError>;

    /// Records a notification that failed validation directly in `Failed` status.
    ///
    /// Like [`Self::claim_payment`], this claims the transaction id, so redeliveries are detected as duplicates.
    async fn record_failed_payment(&self, payment: FailedPayment) -> Result<Payment, PaymentGatewayError>;

    /// Links the payment to a student. Allowed from `Pending` and `Unmatched` (manual resolution).
    async fn mark_matched(&self, txid: &str, student_id: i64) -> Result<Payment, PaymentGatewayError>;

    /// Parks a `Pending` payment in the unmatched queue along with the failure reason and candidate students.
    async fn mark_unmatched(&self, txid: &str, failure: &MatchFailure) -> Result<Payment, PaymentGatewayError>;

    /// Moves a non-terminal payment to `Failed`.
    async fn mark_failed(&self, txid: &str, reason: &str) -> Result<Payment, PaymentGatewayError>;

    /// The apply-once allocation primitive.
    ///
    /// In a single transaction:
    /// * claims the payment row by moving it from `Pending` or `Matched` to `Allocated`,
    /// * applies the amount to the student's outstanding fee assignments (earliest due date first),
    /// * converts any remainder into student credit,
    /// * writes the allocation audit records.
    ///
    /// If the payment is already `Allocated`, nothing is written and the existing result is returned as
    /// [`ApplyOnce::AlreadyApplied`]. On any error the transaction is rolled back and the payment keeps its status.
    async fn allocate_payment(&self, txid: &str, student_id: i64) -> Result<ApplyOnce, PaymentGatewayError>;

    /// Applies the student's credit balance to their outstanding fee assignments, earliest due date first.
    ///
    /// Credit is held in `currency`. Assignments billed in any other currency are left untouched.
    async fn apply_credit(&self, student_id: i64, currency: &str) -> Result<CreditApplication, PaymentGatewayError>;

    async fn insert_student(&self, student: NewStudent) -> Result<Student, PaymentGatewayError>;

    async fn insert_fee_assignment(&self, assignment: NewFeeAssignment) -> Result<FeeAssignment, PaymentGatewayError>;

    /// Payments that have sat in `Pending` or `Matched` for longer than `min_age`. These were interrupted mid-flow and
    /// need to be driven to completion.
    async fn fetch_stale_payments(&self, min_age: Duration) -> Result<Vec<Payment>, PaymentGatewayError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), PaymentGatewayError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum PaymentGatewayError {
    #[error("We have an internal database engine (configuration/uptime etc.) : {0}")]
    DatabaseError(String),
    #[error("Cannot insert payment, since it already exists with txid {0}")]
    PaymentAlreadyExists(String),
    #[error("The requested payment does not exist for txid {0}")]
    PaymentNotFound(String),
    #[error("The requested student id {0} does not exist")]
    StudentNotFound(i64),
    #[error("A student with admission number {0} already exists")]
    StudentAlreadyExists(String),
    #[error("Payment {txid} cannot move from {from} to {to}")]
    IllegalStatusTransition { txid: String, from: PaymentStatus, to: PaymentStatus },
    #[error("Payment {txid} is matched to student #{matched}, so it cannot be allocated to student #{requested}")]
    StudentMismatch { txid: String, matched: i64, requested: i64 },
    #[error("Payment {txid} is in {payment} but the outstanding fees are in {expected}")]
    CurrencyMismatch { txid: String, payment: String, expected: String },
    #[error("Payment amounts must be positive, but {0} was given")]
    NonPositiveAmount(String),
    #[error("Balances changed while allocating {0}. Nothing was applied; the allocation can be retried.")]
    AllocationConflict(String),
    #[error("{0}")]
    StudentError(#[from] StudentApiError),
    #[error("{0} are not supported yet")]
    UnsupportedAction(String),
}

impl PaymentGatewayError {
    /// Errors after which retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PaymentGatewayError::DatabaseError(_) |
                PaymentGatewayError::AllocationConflict(_) |
                PaymentGatewayError::StudentError(StudentApiError::DatabaseError(_))
        )
    }
}

impl From<sqlx::Error> for PaymentGatewayError {
    fn from(e: sqlx::Error) -> Self {
        PaymentGatewayError::DatabaseError(e.to_string())
    }
}
