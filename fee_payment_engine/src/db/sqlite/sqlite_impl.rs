//! `SqliteDatabase` is the SQLite implementation of the fee payment engine's store traits.
use std::fmt::Debug;

use chrono::Duration;
use log::*;
use sqlx::{SqliteConnection, SqlitePool};

use super::{allocations, db_url, fee_assignments, new_pool, payments, payments::StatusChange, students};
use crate::{
    db::traits::{
        AllocationResult,
        ApplyOnce,
        CreditApplication,
        Pagination,
        PaymentGatewayDatabase,
        PaymentGatewayError,
        StudentApiError,
        StudentManagement,
    },
    db_types::{
        AllocationRecord,
        AllocationType,
        FailedPayment,
        FeeAssignment,
        MatchFailure,
        Money,
        NewAllocationRecord,
        NewFeeAssignment,
        NewPayment,
        NewStudent,
        Payment,
        PaymentStatus,
        Student,
        StudentIndexEntry,
    },
    helpers::plan_allocation,
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl PaymentGatewayDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn claim_payment(&self, payment: NewPayment) -> Result<Payment, PaymentGatewayError> {
        if !payment.amount.is_positive() {
            return Err(PaymentGatewayError::NonPositiveAmount(payment.amount.to_string()));
        }
        let mut conn = self.pool.acquire().await?;
        let payment = payments::idempotent_insert(payment, &mut conn).await?;
        debug!("🗃️ Payment {} for {} claimed ({})", payment.txid, payment.amount, payment.channel);
        Ok(payment)
    }

    async fn record_failed_payment(&self, payment: FailedPayment) -> Result<Payment, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let payment = payments::insert_failed(payment, &mut conn).await?;
        debug!("🗃️ Invalid notification recorded as failed payment {}", payment.txid);
        Ok(payment)
    }

    async fn mark_matched(&self, txid: &str, student_id: i64) -> Result<Payment, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let change = StatusChange::default().with_student(student_id);
        let payment = payments::transition(txid, PaymentStatus::Matched, change, &mut conn).await?;
        debug!("🗃️ Payment {txid} matched to student #{student_id}");
        Ok(payment)
    }

    async fn mark_unmatched(&self, txid: &str, failure: &MatchFailure) -> Result<Payment, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let reason = failure.reason.to_string();
        let change = StatusChange::default().with_reason(&reason).with_candidates(&failure.candidates);
        let payment = payments::transition(txid, PaymentStatus::Unmatched, change, &mut conn).await?;
        debug!("🗃️ Payment {txid} moved to the unmatched queue: {failure}");
        Ok(payment)
    }

    async fn mark_failed(&self, txid: &str, reason: &str) -> Result<Payment, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let change = StatusChange::default().with_reason(reason);
        let payment = payments::transition(txid, PaymentStatus::Failed, change, &mut conn).await?;
        debug!("🗃️ Payment {txid} marked as failed: {reason}");
        Ok(payment)
    }

    async fn allocate_payment(&self, txid: &str, student_id: i64) -> Result<ApplyOnce, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        // Claiming the row is the first statement, so the transaction holds the write lock from here on.
        let change = StatusChange::default().with_student(student_id);
        let claimed = payments::try_transition(txid, PaymentStatus::Allocated, change, &mut tx).await?;
        let payment = match claimed {
            Some(payment) => payment,
            None => {
                let existing = payments::fetch_payment(txid, &mut tx)
                    .await?
                    .ok_or_else(|| PaymentGatewayError::PaymentNotFound(txid.to_string()))?;
                if existing.status == PaymentStatus::Allocated {
                    debug!("🗃️ Payment {txid} has already been allocated. Returning the existing allocation.");
                    let result = existing_allocation(existing, &mut tx).await?;
                    return Ok(ApplyOnce::AlreadyApplied(result));
                }
                if let Some(matched) = existing.student_id.filter(|id| *id != student_id) {
                    warn!("🗃️ Payment {txid} is matched to student #{matched}. Not allocating it to #{student_id}.");
                    return Err(PaymentGatewayError::StudentMismatch {
                        txid: txid.to_string(),
                        matched,
                        requested: student_id,
                    });
                }
                return Err(PaymentGatewayError::IllegalStatusTransition {
                    txid: txid.to_string(),
                    from: existing.status,
                    to: PaymentStatus::Allocated,
                });
            },
        };
        if !payment.amount.is_positive() {
            return Err(PaymentGatewayError::NonPositiveAmount(payment.amount.to_string()));
        }
        let student = students::fetch_student(student_id, &mut tx)
            .await?
            .ok_or(PaymentGatewayError::StudentNotFound(student_id))?;
        let outstanding = fee_assignments::fetch_outstanding_assignments(student_id, &mut tx).await?;
        if let Some(other) = outstanding.iter().find(|a| !a.currency.eq_ignore_ascii_case(&payment.currency)) {
            return Err(PaymentGatewayError::CurrencyMismatch {
                txid: txid.to_string(),
                payment: payment.currency.clone(),
                expected: other.currency.clone(),
            });
        }
        let plan = plan_allocation(&outstanding, payment.amount);
        trace!(
            "🗃️ Allocation plan for {txid}: {} assignments, {} applied, {} left over",
            plan.allocations.len(),
            plan.total_applied(),
            plan.remainder
        );
        let mut records = Vec::with_capacity(plan.allocations.len() + 1);
        for step in &plan.allocations {
            fee_assignments::apply_to_assignment(step.fee_assignment_id, step.amount, step.previous_paid, &mut tx)
                .await?;
            let record = NewAllocationRecord::fee(txid, student_id, step.fee_assignment_id, step.amount);
            records.push(allocations::insert_allocation(record, &mut tx).await?);
        }
        let student = if plan.remainder.is_positive() {
            let updated = students::adjust_credit(student_id, plan.remainder, &mut tx).await?;
            let record = NewAllocationRecord::credit(txid, student_id, plan.remainder);
            records.push(allocations::insert_allocation(record, &mut tx).await?);
            debug!("🗃️ {} of payment {txid} carried forward as credit for student #{student_id}", plan.remainder);
            updated
        } else {
            student
        };
        let outstanding_balance = fee_assignments::outstanding_total(student_id, &mut tx).await?;
        tx.commit().await?;
        info!(
            "🗃️ Payment {txid} ({}) allocated to student #{student_id} across {} fee assignments",
            payment.amount,
            plan.allocations.len()
        );
        Ok(ApplyOnce::Applied(AllocationResult {
            payment,
            student,
            records,
            credit_generated: plan.remainder,
            outstanding_balance,
        }))
    }

    async fn apply_credit(&self, student_id: i64, currency: &str) -> Result<CreditApplication, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let student = students::lock_for_update(student_id, &mut tx)
            .await?
            .ok_or(PaymentGatewayError::StudentNotFound(student_id))?;
        let (outstanding, foreign): (Vec<_>, Vec<_>) =
            fee_assignments::fetch_outstanding_assignments(student_id, &mut tx)
                .await?
                .into_iter()
                .partition(|a| a.currency.eq_ignore_ascii_case(currency));
        for a in &foreign {
            warn!(
                "🗃️ Fee assignment #{} is billed in {}, but credit is held in {currency}. Skipping it.",
                a.id, a.currency
            );
        }
        let plan = plan_allocation(&outstanding, student.credit_balance);
        if plan.allocations.is_empty() {
            let outstanding_balance = fee_assignments::outstanding_total(student_id, &mut tx).await?;
            trace!("🗃️ No credit to apply for student #{student_id}");
            return Ok(CreditApplication { student, records: vec![], applied: Money::zero(), outstanding_balance });
        }
        let mut records = Vec::with_capacity(plan.allocations.len());
        for step in &plan.allocations {
            fee_assignments::apply_to_assignment(step.fee_assignment_id, step.amount, step.previous_paid, &mut tx)
                .await?;
            let record = NewAllocationRecord::credit_application(student_id, step.fee_assignment_id, step.amount);
            records.push(allocations::insert_allocation(record, &mut tx).await?);
        }
        let applied = plan.total_applied();
        let student = students::adjust_credit(student_id, -applied, &mut tx).await?;
        let outstanding_balance = fee_assignments::outstanding_total(student_id, &mut tx).await?;
        tx.commit().await?;
        info!("🗃️ Applied {applied} of credit to {} fee assignments for student #{student_id}", records.len());
        Ok(CreditApplication { student, records, applied, outstanding_balance })
    }

    async fn insert_student(&self, student: NewStudent) -> Result<Student, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let student = students::insert_student(student, &mut conn).await?;
        debug!("🗃️ Student #{} ({}) saved", student.id, student.admission_no);
        Ok(student)
    }

    async fn insert_fee_assignment(&self, assignment: NewFeeAssignment) -> Result<FeeAssignment, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let assignment = fee_assignments::insert_fee_assignment(assignment, &mut conn).await?;
        debug!(
            "🗃️ Fee assignment #{} of {} saved for student #{}",
            assignment.id, assignment.amount_due, assignment.student_id
        );
        Ok(assignment)
    }

    async fn fetch_stale_payments(&self, min_age: Duration) -> Result<Vec<Payment>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let stale = payments::fetch_stale_payments(min_age, &mut conn).await?;
        Ok(stale)
    }

    async fn close(&mut self) -> Result<(), PaymentGatewayError> {
        self.pool.close().await;
        Ok(())
    }
}

/// Rebuilds the result of an allocation that has already been committed.
async fn existing_allocation(
    payment: Payment,
    conn: &mut SqliteConnection,
) -> Result<AllocationResult, PaymentGatewayError> {
    let student_id = payment
        .student_id
        .ok_or_else(|| PaymentGatewayError::DatabaseError(format!("Allocated payment {} has no student", payment.txid)))?;
    let student =
        students::fetch_student(student_id, conn).await?.ok_or(PaymentGatewayError::StudentNotFound(student_id))?;
    let records = allocations::fetch_allocations_for_payment(&payment.txid, conn).await?;
    let credit_generated =
        records.iter().filter(|r| r.allocation_type == AllocationType::Credit).map(|r| r.amount).sum::<Money>();
    let outstanding_balance = fee_assignments::outstanding_total(student_id, conn).await?;
    Ok(AllocationResult { payment, student, records, credit_generated, outstanding_balance })
}

impl StudentManagement for SqliteDatabase {
    async fn fetch_student(&self, student_id: i64) -> Result<Option<Student>, StudentApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(students::fetch_student(student_id, &mut conn).await?)
    }

    async fn fetch_student_by_admission_no(&self, admission_no: &str) -> Result<Option<Student>, StudentApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(students::fetch_student_by_admission_no(admission_no, &mut conn).await?)
    }

    async fn fetch_student_index(&self) -> Result<Vec<StudentIndexEntry>, StudentApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(students::fetch_student_index(&mut conn).await?)
    }

    async fn fetch_fee_assignments(&self, student_id: i64) -> Result<Vec<FeeAssignment>, StudentApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(fee_assignments::fetch_fee_assignments(student_id, &mut conn).await?)
    }

    async fn fetch_outstanding_assignments(&self, student_id: i64) -> Result<Vec<FeeAssignment>, StudentApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(fee_assignments::fetch_outstanding_assignments(student_id, &mut conn).await?)
    }

    async fn fetch_payment(&self, txid: &str) -> Result<Option<Payment>, StudentApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::fetch_payment(txid, &mut conn).await?)
    }

    async fn fetch_payments_by_status(
        &self,
        status: PaymentStatus,
        page: Pagination,
    ) -> Result<Vec<Payment>, StudentApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::fetch_payments_by_status(status, page, &mut conn).await?)
    }

    async fn count_payments_by_status(&self, status: PaymentStatus) -> Result<i64, StudentApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::count_payments_by_status(status, &mut conn).await?)
    }

    async fn fetch_payments_for_student(&self, student_id: i64) -> Result<Vec<Payment>, StudentApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::fetch_payments_for_student(student_id, &mut conn).await?)
    }

    async fn fetch_allocations_for_payment(&self, txid: &str) -> Result<Vec<AllocationRecord>, StudentApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(allocations::fetch_allocations_for_payment(txid, &mut conn).await?)
    }

    async fn fetch_allocations_for_student(&self, student_id: i64) -> Result<Vec<AllocationRecord>, StudentApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(allocations::fetch_allocations_for_student(student_id, &mut conn).await?)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object, using `FPG_DATABASE_URL` (or the default) as the database URL.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("🗃️ Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Runs any outstanding schema migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./src/db/sqlite/migrations").run(&self.pool).await
    }
}
