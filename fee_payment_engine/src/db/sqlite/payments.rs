use chrono::Duration;
use log::*;
use sqlx::{types::Json, SqliteConnection};

use crate::{
    db::traits::{Pagination, PaymentGatewayError},
    db_types::{FailedPayment, MatchCandidate, NewPayment, Payment, PaymentStatus},
};

/// Inserts the payment in `Pending` status. The unique index on `txid` makes this the idempotency guard: a second
/// insert with the same transaction id fails with [`PaymentGatewayError::PaymentAlreadyExists`].
pub async fn idempotent_insert(payment: NewPayment, conn: &mut SqliteConnection) -> Result<Payment, PaymentGatewayError> {
    let txid = payment.txid.clone();
    let result = sqlx::query_as(
        r#"
            INSERT INTO payments (txid, channel, account_reference, amount, currency, payer, payer_name, paid_at,
                raw_payload, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'Pending')
            RETURNING *;
        "#,
    )
    .bind(payment.txid)
    .bind(payment.channel.to_string())
    .bind(payment.account_reference)
    .bind(payment.amount)
    .bind(payment.currency)
    .bind(payment.payer)
    .bind(payment.payer_name)
    .bind(payment.paid_at)
    .bind(payment.raw_payload)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => PaymentGatewayError::PaymentAlreadyExists(txid),
        _ => PaymentGatewayError::from(e),
    })?;
    Ok(result)
}

/// Records a notification that failed validation, directly in `Failed` status. The transaction id is claimed just like
/// [`idempotent_insert`] does.
pub async fn insert_failed(payment: FailedPayment, conn: &mut SqliteConnection) -> Result<Payment, PaymentGatewayError> {
    let txid = payment.txid.clone();
    let result = sqlx::query_as(
        r#"
            INSERT INTO payments (txid, channel, account_reference, payer, currency, raw_payload, status, reason)
            VALUES ($1, $2, $3, $4, $5, $6, 'Failed', $7)
            RETURNING *;
        "#,
    )
    .bind(payment.txid)
    .bind(payment.channel.to_string())
    .bind(payment.account_reference)
    .bind(payment.payer.unwrap_or_default())
    .bind(payment.currency)
    .bind(payment.raw_payload)
    .bind(payment.reason)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => PaymentGatewayError::PaymentAlreadyExists(txid),
        _ => PaymentGatewayError::from(e),
    })?;
    Ok(result)
}

/// Optional fields written alongside a status change. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct StatusChange<'a> {
    pub student_id: Option<i64>,
    pub reason: Option<&'a str>,
    pub candidates: Option<&'a [MatchCandidate]>,
}

impl<'a> StatusChange<'a> {
    pub fn with_student(mut self, student_id: i64) -> Self {
        self.student_id = Some(student_id);
        self
    }

    pub fn with_reason(mut self, reason: &'a str) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn with_candidates(mut self, candidates: &'a [MatchCandidate]) -> Self {
        self.candidates = Some(candidates);
        self
    }
}

/// Moves the payment to `to`, but only from a status that is allowed to transition there.
///
/// The check and the update are a single conditional statement, so two racing callers cannot both make the same
/// transition. If the payment is not in an eligible status, [`PaymentGatewayError::IllegalStatusTransition`] is
/// returned (or [`PaymentGatewayError::PaymentNotFound`] if it does not exist).
pub async fn transition(
    txid: &str,
    to: PaymentStatus,
    change: StatusChange<'_>,
    conn: &mut SqliteConnection,
) -> Result<Payment, PaymentGatewayError> {
    match try_transition(txid, to, change, conn).await? {
        Some(payment) => Ok(payment),
        None => {
            let existing = fetch_payment(txid, conn).await?;
            let payment = existing.ok_or_else(|| PaymentGatewayError::PaymentNotFound(txid.to_string()))?;
            debug!("🗃️ Payment {txid} cannot move from {} to {to}", payment.status);
            Err(PaymentGatewayError::IllegalStatusTransition { txid: txid.to_string(), from: payment.status, to })
        },
    }
}

/// Like [`transition`], but returns `None` instead of an error if the payment is not in an eligible status.
///
/// A payment already linked to a student is never moved on behalf of a different student. That also yields `None`.
pub async fn try_transition(
    txid: &str,
    to: PaymentStatus,
    change: StatusChange<'_>,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, PaymentGatewayError> {
    let eligible = eligible_sources(to);
    if eligible.is_empty() {
        return Ok(None);
    }
    let q = format!(
        r#"
            UPDATE payments SET
                status = $1,
                student_id = COALESCE($2, student_id),
                reason = COALESCE($3, reason),
                candidates = COALESCE($4, candidates)
            WHERE txid = $5 AND status IN ({eligible})
                AND ($2 IS NULL OR student_id IS NULL OR student_id = $2)
            RETURNING *;
        "#
    );
    let payment = sqlx::query_as(&q)
        .bind(to.to_string())
        .bind(change.student_id)
        .bind(change.reason)
        .bind(change.candidates.map(Json))
        .bind(txid)
        .fetch_optional(conn)
        .await
        .map_err(|e| match (e, change.student_id) {
            (sqlx::Error::Database(err), Some(id)) if err.is_foreign_key_violation() => {
                PaymentGatewayError::StudentNotFound(id)
            },
            (e, _) => PaymentGatewayError::from(e),
        })?;
    Ok(payment)
}

/// The quoted, comma-separated list of statuses that may move to `to`.
fn eligible_sources(to: PaymentStatus) -> String {
    use PaymentStatus::*;
    [Pending, Matched, Allocated, Unmatched, Failed]
        .into_iter()
        .filter(|from| from.can_transition_to(to))
        .map(|from| format!("'{from}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub async fn fetch_payment(txid: &str, conn: &mut SqliteConnection) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payments WHERE txid = ?").bind(txid).fetch_optional(conn).await
}

pub async fn fetch_payments_by_status(
    status: PaymentStatus,
    page: Pagination,
    conn: &mut SqliteConnection,
) -> Result<Vec<Payment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payments WHERE status = ? ORDER BY id ASC LIMIT ? OFFSET ?")
        .bind(status.to_string())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(conn)
        .await
}

pub async fn count_payments_by_status(status: PaymentStatus, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE status = ?").bind(status.to_string()).fetch_one(conn).await
}

pub async fn fetch_payments_for_student(
    student_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Payment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payments WHERE student_id = ? ORDER BY id ASC").bind(student_id).fetch_all(conn).await
}

/// Payments left in `Pending` or `Matched` that have not been touched for at least `min_age`.
pub async fn fetch_stale_payments(min_age: Duration, conn: &mut SqliteConnection) -> Result<Vec<Payment>, sqlx::Error> {
    let modifier = format!("-{} seconds", min_age.num_seconds().max(0));
    sqlx::query_as(
        r#"
            SELECT * FROM payments
            WHERE status IN ('Pending', 'Matched') AND updated_at <= datetime('now', $1)
            ORDER BY id ASC
        "#,
    )
    .bind(modifier)
    .fetch_all(conn)
    .await
}
