use fee_payment_engine::{
    db_types::{AllocationRecord, FeeAssignment, Payment, PaymentStatus, Student, StudentIndexEntry},
    Pagination,
    StudentApiError,
    StudentManagement,
};
use mockall::mock;

mock! {
    pub StudentStore {}
    impl StudentManagement for StudentStore {
        async fn fetch_student(&self, student_id: i64) -> Result<Option<Student>, StudentApiError>;
        async fn fetch_student_by_admission_no(&self, admission_no: &str) -> Result<Option<Student>, StudentApiError>;
        async fn fetch_student_index(&self) -> Result<Vec<StudentIndexEntry>, StudentApiError>;
        async fn fetch_fee_assignments(&self, student_id: i64) -> Result<Vec<FeeAssignment>, StudentApiError>;
        async fn fetch_outstanding_assignments(&self, student_id: i64) -> Result<Vec<FeeAssignment>, StudentApiError>;
        async fn fetch_payment(&self, txid: &str) -> Result<Option<Payment>, StudentApiError>;
        async fn fetch_payments_by_status(&self, status: PaymentStatus, page: Pagination) -> Result<Vec<Payment>, StudentApiError>;
        async fn count_payments_by_status(&self, status: PaymentStatus) -> Result<i64, StudentApiError>;
        async fn fetch_payments_for_student(&self, student_id: i64) -> Result<Vec<Payment>, StudentApiError>;
        async fn fetch_allocations_for_payment(&self, txid: &str) -> Result<Vec<AllocationRecord>, StudentApiError>;
        async fn fetch_allocations_for_student(&self, student_id: i64) -> Result<Vec<AllocationRecord>, StudentApiError>;
    }
}
