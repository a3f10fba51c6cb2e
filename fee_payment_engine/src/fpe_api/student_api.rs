use std::fmt::Debug;

use crate::{
    db::traits::{StudentApiError, StudentManagement},
    db_types::{Money, Student},
    fpe_api::payment_objects::{PaymentDetail, StudentStatement},
};

/// Read-only queries for operators: student statements and payment details.
pub struct StudentApi<B> {
    db: B,
}

impl<B> Debug for StudentApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StudentApi")
    }
}

impl<B> StudentApi<B>
where B: StudentManagement
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    pub async fn student_by_id(&self, student_id: i64) -> Result<Option<Student>, StudentApiError> {
        self.db.fetch_student(student_id).await
    }

    pub async fn student_by_admission_no(&self, admission_no: &str) -> Result<Option<Student>, StudentApiError> {
        self.db.fetch_student_by_admission_no(admission_no).await
    }

    /// The student, every fee assignment with its balance, and the full payment and allocation history.
    pub async fn statement(&self, admission_no: &str) -> Result<Option<StudentStatement>, StudentApiError> {
        let Some(student) = self.db.fetch_student_by_admission_no(admission_no).await? else {
            return Ok(None);
        };
        let fee_assignments = self.db.fetch_fee_assignments(student.id).await?;
        let outstanding_balance = fee_assignments.iter().map(|a| a.balance()).sum::<Money>();
        let payments = self.db.fetch_payments_for_student(student.id).await?;
        let allocations = self.db.fetch_allocations_for_student(student.id).await?;
        Ok(Some(StudentStatement { student, fee_assignments, outstanding_balance, payments, allocations }))
    }

    pub async fn payment_detail(&self, txid: &str) -> Result<Option<PaymentDetail>, StudentApiError> {
        let Some(payment) = self.db.fetch_payment(txid).await? else {
            return Ok(None);
        };
        let allocations = self.db.fetch_allocations_for_payment(txid).await?;
        Ok(Some(PaymentDetail { payment, allocations }))
    }
}
