#![allow(dead_code)]
use chrono::NaiveDate;
use fee_payment_engine::{
    db_types::{FeeAssignment, Money, NewFeeAssignment, NewPayment, NewStudent, PaymentChannel, Student},
    events::EventProducers,
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    AllocationResult,
    EngineConfig,
    PaymentFlowApi,
    PaymentGatewayDatabase,
    SqliteDatabase,
    StudentManagement,
};
use log::*;
use sqlx::{migrate::MigrateDatabase, Sqlite};

pub async fn setup() -> PaymentFlowApi<SqliteDatabase> {
    setup_with(EventProducers::default(), EngineConfig::default()).await
}

pub async fn setup_with(producers: EventProducers, config: EngineConfig) -> PaymentFlowApi<SqliteDatabase> {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    PaymentFlowApi::new(db, producers).with_config(config)
}

pub async fn tear_down(api: PaymentFlowApi<SqliteDatabase>) {
    let mut db = api.db().clone();
    let url = db.url().to_string();
    if let Err(e) = db.close().await {
        error!("🚀️ Failed to close database: {e}");
    }
    if let Err(e) = Sqlite::drop_database(&url).await {
        warn!("🚀️ Failed to remove test database {url}: {e}");
    }
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("Invalid date")
}

pub fn kes(major: i64) -> Money {
    Money::from_major(major)
}

pub async fn student(api: &PaymentFlowApi<SqliteDatabase>, admission_no: &str) -> Student {
    let new = NewStudent::new(admission_no, "Test Student").with_class("Grade 4").with_phone("254700000001");
    api.db().insert_student(new).await.expect("Error creating student")
}

/// Adds a fee assignment directly through the store, bypassing automatic credit application.
pub async fn fee(
    api: &PaymentFlowApi<SqliteDatabase>,
    student: &Student,
    term: &str,
    due: Option<&str>,
    amount: i64,
) -> FeeAssignment {
    let mut assignment = NewFeeAssignment::new(student.id, "Tuition", term, 2024, kes(amount));
    if let Some(d) = due {
        assignment = assignment.with_due_date(date(d));
    }
    api.db().insert_fee_assignment(assignment).await.expect("Error creating fee assignment")
}

pub fn c2b(txid: &str, reference: &str, amount: i64) -> NewPayment {
    NewPayment::new(txid, PaymentChannel::C2b, reference, kes(amount)).with_payer("254700000001")
}

pub async fn assignments(api: &PaymentFlowApi<SqliteDatabase>, student_id: i64) -> Vec<FeeAssignment> {
    api.db().fetch_fee_assignments(student_id).await.expect("Error fetching fee assignments")
}

pub async fn reload(api: &PaymentFlowApi<SqliteDatabase>, student_id: i64) -> Student {
    api.db().fetch_student(student_id).await.expect("Error fetching student").expect("Student should exist")
}

/// Every allocated payment is accounted for exactly: fee records plus credit add up to the payment amount.
pub fn assert_conserved(result: &AllocationResult) {
    assert_eq!(result.total_recorded(), result.payment.amount, "allocation records do not sum to the payment");
    assert_eq!(result.applied_to_fees() + result.credit_generated, result.payment.amount);
}
