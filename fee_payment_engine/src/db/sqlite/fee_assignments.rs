use sqlx::SqliteConnection;

use crate::{
    db::traits::PaymentGatewayError,
    db_types::{FeeAssignment, Money, NewFeeAssignment},
};

/// Allocation order: earliest due date first, missing due dates last, then creation order.
const ALLOCATION_ORDER: &str = "ORDER BY due_date IS NULL, due_date ASC, id ASC";

pub async fn insert_fee_assignment(
    assignment: NewFeeAssignment,
    conn: &mut SqliteConnection,
) -> Result<FeeAssignment, PaymentGatewayError> {
    let student_id = assignment.student_id;
    let result = sqlx::query_as(
        r#"
            INSERT INTO fee_assignments (student_id, fee_structure, term, year, amount_due, currency, due_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *;
        "#,
    )
    .bind(assignment.student_id)
    .bind(assignment.fee_structure)
    .bind(assignment.term)
    .bind(assignment.year)
    .bind(assignment.amount_due)
    .bind(assignment.currency)
    .bind(assignment.due_date)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_foreign_key_violation() => PaymentGatewayError::StudentNotFound(student_id),
        _ => PaymentGatewayError::from(e),
    })?;
    Ok(result)
}

pub async fn fetch_fee_assignments(
    student_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<FeeAssignment>, sqlx::Error> {
    let q = format!("SELECT * FROM fee_assignments WHERE student_id = ? {ALLOCATION_ORDER}");
    sqlx::query_as(&q).bind(student_id).fetch_all(conn).await
}

pub async fn fetch_outstanding_assignments(
    student_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<FeeAssignment>, sqlx::Error> {
    let q = format!("SELECT * FROM fee_assignments WHERE student_id = ? AND amount_paid < amount_due {ALLOCATION_ORDER}");
    sqlx::query_as(&q).bind(student_id).fetch_all(conn).await
}

/// The sum of the student's remaining fee balances.
pub async fn outstanding_total(student_id: i64, conn: &mut SqliteConnection) -> Result<Money, sqlx::Error> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount_due - amount_paid), 0) FROM fee_assignments WHERE student_id = ?",
    )
    .bind(student_id)
    .fetch_one(conn)
    .await?;
    Ok(Money::from(total))
}

/// Increases `amount_paid` on the assignment by `amount`.
///
/// The update only goes through if `amount_paid` still equals `previous_paid` and the new total does not exceed the
/// amount due. Otherwise somebody else changed the assignment since the plan was made, and
/// [`PaymentGatewayError::AllocationConflict`] is returned so that the surrounding transaction is abandoned.
pub async fn apply_to_assignment(
    assignment_id: i64,
    amount: Money,
    previous_paid: Money,
    conn: &mut SqliteConnection,
) -> Result<(), PaymentGatewayError> {
    let result = sqlx::query(
        r#"
            UPDATE fee_assignments SET amount_paid = amount_paid + $1
            WHERE id = $2 AND amount_paid = $3 AND amount_paid + $1 <= amount_due
        "#,
    )
    .bind(amount)
    .bind(assignment_id)
    .bind(previous_paid)
    .execute(conn)
    .await?;
    if result.rows_affected() == 1 {
        Ok(())
    } else {
        Err(PaymentGatewayError::AllocationConflict(format!("fee assignment #{assignment_id}")))
    }
}
