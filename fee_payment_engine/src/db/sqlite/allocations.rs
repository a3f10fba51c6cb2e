use sqlx::SqliteConnection;

use crate::{
    db::traits::PaymentGatewayError,
    db_types::{AllocationRecord, NewAllocationRecord},
};

/// Appends an audit record. Records can never be updated or deleted (the table has triggers forbidding both).
pub async fn insert_allocation(
    record: NewAllocationRecord,
    conn: &mut SqliteConnection,
) -> Result<AllocationRecord, PaymentGatewayError> {
    let result = sqlx::query_as(
        r#"
            INSERT INTO allocations (payment_txid, student_id, fee_assignment_id, amount, allocation_type)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(record.payment_txid)
    .bind(record.student_id)
    .bind(record.fee_assignment_id)
    .bind(record.amount)
    .bind(record.allocation_type.to_string())
    .fetch_one(conn)
    .await?;
    Ok(result)
}

pub async fn fetch_allocations_for_payment(
    txid: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<AllocationRecord>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM allocations WHERE payment_txid = ? ORDER BY id ASC").bind(txid).fetch_all(conn).await
}

pub async fn fetch_allocations_for_student(
    student_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<AllocationRecord>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM allocations WHERE student_id = ? ORDER BY id ASC")
        .bind(student_id)
        .fetch_all(conn)
        .await
}
