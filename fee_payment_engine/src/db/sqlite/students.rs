use sqlx::SqliteConnection;

use crate::{
    db::traits::PaymentGatewayError,
    db_types::{Money, NewStudent, Student, StudentIndexEntry},
};

pub async fn insert_student(student: NewStudent, conn: &mut SqliteConnection) -> Result<Student, PaymentGatewayError> {
    let admission_no = student.admission_no.trim().to_string();
    let result = sqlx::query_as(
        r#"
            INSERT INTO students (admission_no, full_name, current_class, fee_group, phone, email)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(&admission_no)
    .bind(student.full_name)
    .bind(student.current_class)
    .bind(student.fee_group)
    .bind(student.phone)
    .bind(student.email)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => {
            PaymentGatewayError::StudentAlreadyExists(admission_no.clone())
        },
        _ => PaymentGatewayError::from(e),
    })?;
    Ok(result)
}

pub async fn fetch_student(student_id: i64, conn: &mut SqliteConnection) -> Result<Option<Student>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM students WHERE id = ?").bind(student_id).fetch_optional(conn).await
}

/// The admission number column is `COLLATE NOCASE`, so this lookup ignores case.
pub async fn fetch_student_by_admission_no(
    admission_no: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Student>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM students WHERE admission_no = ?")
        .bind(admission_no.trim())
        .fetch_optional(conn)
        .await
}

pub async fn fetch_student_index(conn: &mut SqliteConnection) -> Result<Vec<StudentIndexEntry>, sqlx::Error> {
    sqlx::query_as("SELECT id, admission_no FROM students ORDER BY id").fetch_all(conn).await
}

/// Takes the store's write lock up front and returns the student's current row.
///
/// SQLite refuses to upgrade a read transaction to a write transaction while another writer is active, so
/// transactions that read before they write start with this no-op update instead of a plain select.
pub async fn lock_for_update(student_id: i64, conn: &mut SqliteConnection) -> Result<Option<Student>, sqlx::Error> {
    sqlx::query_as("UPDATE students SET credit_balance = credit_balance WHERE id = ? RETURNING *")
        .bind(student_id)
        .fetch_optional(conn)
        .await
}

/// Adds `delta` (which may be negative) to the student's credit balance.
///
/// The update is refused if it would take the balance below zero, in which case
/// [`PaymentGatewayError::AllocationConflict`] is returned.
pub async fn adjust_credit(
    student_id: i64,
    delta: Money,
    conn: &mut SqliteConnection,
) -> Result<Student, PaymentGatewayError> {
    let student = sqlx::query_as(
        r#"
            UPDATE students SET credit_balance = credit_balance + $1
            WHERE id = $2 AND credit_balance + $1 >= 0
            RETURNING *;
        "#,
    )
    .bind(delta)
    .bind(student_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| PaymentGatewayError::AllocationConflict(format!("credit adjustment for student #{student_id}")))?;
    Ok(student)
}
