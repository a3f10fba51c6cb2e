use thiserror::Error;

use crate::{
    db::traits::Pagination,
    db_types::{AllocationRecord, FeeAssignment, Payment, PaymentStatus, Student, StudentIndexEntry},
};

#[derive(Debug, Clone, Error)]
pub enum StudentApiError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("User error constructing query: {0}")]
    QueryError(String),
}

impl From<sqlx::Error> for StudentApiError {
    fn from(e: sqlx::Error) -> Self {
        StudentApiError::DatabaseError(e.to_string())
    }
}

/// Read-only queries over students, their fee assignments, payments and the allocation audit trail.
///
/// Anything that changes money lives on [`crate::PaymentGatewayDatabase`] instead.
#[allow(async_fn_in_trait)]
pub trait StudentManagement {
    async fn fetch_student(&self, student_id: i64) -> Result<Option<Student>, StudentApiError>;

    /// Case-insensitive lookup on the admission number.
    async fn fetch_student_by_admission_no(&self, admission_no: &str) -> Result<Option<Student>, StudentApiError>;

    /// The (id, admission number) pairs of every student. This is the set the account matcher works against.
    async fn fetch_student_index(&self) -> Result<Vec<StudentIndexEntry>, StudentApiError>;

    /// All fee assignments for the student, in allocation order.
    async fn fetch_fee_assignments(&self, student_id: i64) -> Result<Vec<FeeAssignment>, StudentApiError>;

    /// Fee assignments with a positive balance, in allocation order.
    async fn fetch_outstanding_assignments(&self, student_id: i64) -> Result<Vec<FeeAssignment>, StudentApiError>;

    async fn fetch_payment(&self, txid: &str) -> Result<Option<Payment>, StudentApiError>;

    /// Payments in the given status, oldest first.
    async fn fetch_payments_by_status(
        &self,
        status: PaymentStatus,
        page: Pagination,
    ) -> Result<Vec<Payment>, StudentApiError>;

    async fn count_payments_by_status(&self, status: PaymentStatus) -> Result<i64, StudentApiError>;

    async fn fetch_payments_for_student(&self, student_id: i64) -> Result<Vec<Payment>, StudentApiError>;

    async fn fetch_allocations_for_payment(&self, txid: &str) -> Result<Vec<AllocationRecord>, StudentApiError>;

    async fn fetch_allocations_for_student(&self, student_id: i64) -> Result<Vec<AllocationRecord>, StudentApiError>;
}
