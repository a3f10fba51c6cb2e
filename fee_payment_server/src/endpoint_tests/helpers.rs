use std::time::Duration;

use actix_web::{http::StatusCode, test, test::TestRequest, web, web::ServiceConfig, App};
use fee_payment_engine::{
    db_types::{FeeAssignment, Money, NewFeeAssignment, NewStudent, Payment, PaymentStatus, Student},
    events::EventProducers,
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    PaymentFlowApi,
    PaymentGatewayDatabase,
    SqliteDatabase,
    StudentApi,
    StudentManagement,
    UnmatchedQueueApi,
};
use log::*;
use serde_json::{json, Value};

use crate::{
    config::GatewayOptions,
    delivery::RetryQueue,
    routes::{
        health,
        ApplyCreditRoute,
        FailedPaymentsRoute,
        MpesaConfirmationRoute,
        MpesaManualRoute,
        MpesaStkCallbackRoute,
        MpesaValidationRoute,
        PaymentDetailRoute,
        ResolvePaymentRoute,
        StudentStatementRoute,
        UnmatchedPaymentsRoute,
    },
};

/// A complete gateway against a throw-away SQLite database.
pub struct TestContext {
    pub api: PaymentFlowApi<SqliteDatabase>,
    pub options: GatewayOptions,
    pub queue: RetryQueue,
}

impl TestContext {
    pub async fn new() -> Self {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
        let api = PaymentFlowApi::new(db, EventProducers::default());
        let options = GatewayOptions { ack_timeout: Duration::from_secs(10), ..GatewayOptions::default() };
        Self { api, options, queue: RetryQueue::default() }
    }

    pub async fn tear_down(self) {
        let mut db = self.api.db().clone();
        let path = db.url().trim_start_matches("sqlite://").to_string();
        if let Err(e) = db.close().await {
            error!("🚀️ Failed to close database: {e}");
        }
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("🚀️ Failed to remove test database {path}: {e}");
        }
    }

    pub fn with_options(mut self, options: GatewayOptions) -> Self {
        self.options = options;
        self
    }

    fn configure(&self, cfg: &mut ServiceConfig) {
        let db = self.api.db().clone();
        cfg.app_data(web::Data::new(self.api.clone()))
            .app_data(web::Data::new(UnmatchedQueueApi::new(db.clone())))
            .app_data(web::Data::new(StudentApi::new(db)))
            .app_data(web::Data::new(self.options))
            .app_data(web::Data::new(self.queue.clone()))
            .service(health)
            .service(
                web::scope("/webhooks/mpesa")
                    .service(MpesaConfirmationRoute::<SqliteDatabase>::new())
                    .service(MpesaManualRoute::<SqliteDatabase>::new())
                    .service(MpesaStkCallbackRoute::<SqliteDatabase>::new())
                    .service(MpesaValidationRoute::<SqliteDatabase>::new()),
            )
            .service(
                web::scope("/api")
                    .service(UnmatchedPaymentsRoute::<SqliteDatabase>::new())
                    .service(ResolvePaymentRoute::<SqliteDatabase>::new())
                    .service(FailedPaymentsRoute::<SqliteDatabase>::new())
                    .service(PaymentDetailRoute::<SqliteDatabase>::new())
                    .service(StudentStatementRoute::<SqliteDatabase>::new())
                    .service(ApplyCreditRoute::<SqliteDatabase>::new()),
            );
    }

    pub async fn send(&self, req: TestRequest) -> (StatusCode, String) {
        let app = test::init_service(App::new().configure(|cfg| self.configure(cfg))).await;
        let res = test::call_service(&app, req.to_request()).await;
        let status = res.status();
        let body = test::read_body(res).await;
        let body = String::from_utf8_lossy(&body).into_owned();
        debug!("🚀️ Response: {status} {body}");
        (status, body)
    }

    pub async fn post(&self, path: &str, body: &str) -> (StatusCode, String) {
        let req = TestRequest::post().uri(path).insert_header(("Content-Type", "application/json")).set_payload(body.to_string());
        self.send(req).await
    }

    pub async fn get(&self, path: &str) -> (StatusCode, String) {
        self.send(TestRequest::get().uri(path)).await
    }

    /// Posts a webhook and returns the provider acknowledgment.
    pub async fn webhook(&self, route: &str, body: &str) -> Value {
        let (status, body) = self.post(&format!("/webhooks/mpesa/{route}"), body).await;
        assert_eq!(status, StatusCode::OK, "Webhooks must always answer 200");
        serde_json::from_str(&body).expect("Acknowledgment is not JSON")
    }

    pub async fn student(&self, admission_no: &str) -> Student {
        let new = NewStudent::new(admission_no, "Test Student").with_class("Form 1").with_phone("254700000001");
        self.api.db().insert_student(new).await.expect("Error creating student")
    }

    pub async fn fee(&self, student: &Student, term: &str, amount: i64) -> FeeAssignment {
        let assignment = NewFeeAssignment::new(student.id, "Tuition", term, 2024, Money::from_major(amount));
        self.api.db().insert_fee_assignment(assignment).await.expect("Error creating fee assignment")
    }

    pub async fn payment(&self, txid: &str) -> Option<Payment> {
        self.api.db().fetch_payment(txid).await.expect("Error fetching payment")
    }

    pub async fn status(&self, txid: &str) -> Option<PaymentStatus> {
        self.payment(txid).await.map(|p| p.status)
    }

    pub async fn assignments(&self, student_id: i64) -> Vec<FeeAssignment> {
        self.api.db().fetch_fee_assignments(student_id).await.expect("Error fetching fee assignments")
    }

    pub async fn count(&self, status: PaymentStatus) -> i64 {
        self.api.db().count_payments_by_status(status).await.expect("Error counting payments")
    }
}

pub fn accepted() -> Value {
    json!({ "ResultCode": 0, "ResultDesc": "Accepted" })
}

pub fn c2b_body(txid: &str, reference: &str, amount: &str) -> String {
    json!({
        "TransactionType": "Pay Bill",
        "TransID": txid,
        "TransTime": "20240115143000",
        "TransAmount": amount,
        "BusinessShortCode": "600638",
        "BillRefNumber": reference,
        "MSISDN": "254708374149",
        "FirstName": "Jane",
        "LastName": "Wanjiru"
    })
    .to_string()
}

pub fn stk_body(result_code: i64, receipt: &str, reference: Option<&str>, amount: i64) -> String {
    let mut items = vec![
        json!({ "Name": "Amount", "Value": amount }),
        json!({ "Name": "MpesaReceiptNumber", "Value": receipt }),
        json!({ "Name": "TransactionDate", "Value": 20240115143000u64 }),
        json!({ "Name": "PhoneNumber", "Value": 254708374149u64 }),
    ];
    if let Some(r) = reference {
        items.push(json!({ "Name": "AccountReference", "Value": r }));
    }
    let mut callback = json!({
        "MerchantRequestID": "29115-34620561-1",
        "CheckoutRequestID": "ws_CO_191220191020363925",
        "ResultCode": result_code,
        "ResultDesc": "The service request is processed successfully.",
    });
    if result_code == 0 {
        callback["CallbackMetadata"] = json!({ "Item": items });
    }
    json!({ "Body": { "stkCallback": callback } }).to_string()
}

/// Waits until the payment reaches `status`, for work that finishes after the acknowledgment.
pub async fn wait_for_status(ctx: &TestContext, txid: &str, status: PaymentStatus) -> bool {
    for _ in 0..100 {
        if ctx.status(txid).await == Some(status) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
