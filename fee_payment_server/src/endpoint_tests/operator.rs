use actix_web::{http::StatusCode, test, test::TestRequest, web, App};
use fee_payment_engine::{
    db_types::{Money, PaymentStatus},
    payment_objects::{Page, PaymentDetail, PaymentOutcome, StudentStatement, UnmatchedPayment},
    CreditApplication,
    StudentApi,
    StudentApiError,
    UnmatchedQueueApi,
};
use serde_json::json;

use super::{
    helpers::{c2b_body, TestContext},
    mocks::MockStudentStore,
};
use crate::routes::{FailedPaymentsRoute, StudentStatementRoute, UnmatchedPaymentsRoute};

#[actix_web::test]
async fn resolve_an_unmatched_payment() {
    let ctx = TestContext::new().await;
    let student = ctx.student("ADM4512").await;
    ctx.fee(&student, "Term 1", 5000).await;
    ctx.webhook("confirmation", &c2b_body("QK4512B001", "WRONG", "3000")).await;

    let (status, body) = ctx.get("/api/unmatched").await;
    assert_eq!(status, StatusCode::OK);
    let page: Page<UnmatchedPayment> = serde_json::from_str(&body).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].txid, "QK4512B001");
    assert_eq!(page.items[0].account_reference.as_deref(), Some("WRONG"));

    let request = json!({ "student_id": student.id }).to_string();
    let (status, body) = ctx.post("/api/unmatched/QK4512B001/resolve", &request).await;
    assert_eq!(status, StatusCode::OK);
    let PaymentOutcome::Allocated(result) = serde_json::from_str(&body).unwrap() else {
        panic!("Expected the payment to be allocated. {body}");
    };
    assert_eq!(result.student.id, student.id);
    assert_eq!(result.outstanding_balance, Money::from_major(2000));

    // Resolving again changes nothing
    let (status, body) = ctx.post("/api/unmatched/QK4512B001/resolve", &request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(matches!(serde_json::from_str(&body).unwrap(), PaymentOutcome::AlreadyAllocated(_)));
    assert_eq!(ctx.assignments(student.id).await[0].balance(), Money::from_major(2000));

    let (_, body) = ctx.get("/api/unmatched").await;
    let page: Page<UnmatchedPayment> = serde_json::from_str(&body).unwrap();
    assert_eq!(page.total, 0);
    ctx.tear_down().await;
}

#[actix_web::test]
async fn resolution_errors() {
    let ctx = TestContext::new().await;
    let student = ctx.student("ADM4512").await;
    ctx.webhook("confirmation", &c2b_body("QK4512B002", "WRONG", "3000")).await;
    ctx.webhook("confirmation", &c2b_body("QK4512B003", "ADM4512", "0")).await;
    assert_eq!(ctx.status("QK4512B003").await, Some(PaymentStatus::Failed));

    let request = json!({ "student_id": student.id }).to_string();
    let (status, _) = ctx.post("/api/unmatched/NOSUCHTX/resolve", &request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = ctx.post("/api/unmatched/QK4512B002/resolve", &json!({ "student_id": 9999 }).to_string()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(ctx.status("QK4512B002").await, Some(PaymentStatus::Unmatched));
    let (status, _) = ctx.post("/api/unmatched/QK4512B003/resolve", &request).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = ctx.post("/api/unmatched/QK4512B002/resolve", "{\"student\": 1}").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    ctx.tear_down().await;
}

#[actix_web::test]
async fn failed_payments_are_listed() {
    let ctx = TestContext::new().await;
    ctx.webhook("confirmation", "garbage").await;
    ctx.webhook("confirmation", &c2b_body("QK4512B004", "ADM4512", "abc")).await;
    let (status, body) = ctx.get("/api/failed?page=0&size=1").await;
    assert_eq!(status, StatusCode::OK);
    let page: Page<fee_payment_engine::db_types::Payment> = serde_json::from_str(&body).unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.size, 1);
    ctx.tear_down().await;
}

#[actix_web::test]
async fn payment_detail_and_statement() {
    let ctx = TestContext::new().await;
    let student = ctx.student("ADM4512").await;
    ctx.fee(&student, "Term 1", 3000).await;
    ctx.fee(&student, "Term 2", 3000).await;
    ctx.webhook("confirmation", &c2b_body("QK4512B005", "ADM4512", "4000")).await;

    let (status, body) = ctx.get("/api/payments/QK4512B005").await;
    assert_eq!(status, StatusCode::OK);
    let detail: PaymentDetail = serde_json::from_str(&body).unwrap();
    assert_eq!(detail.payment.status, PaymentStatus::Allocated);
    assert_eq!(detail.allocations.len(), 2);
    let (status, _) = ctx.get("/api/payments/NOSUCHTX").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = ctx.get("/api/students/ADM4512/statement").await;
    assert_eq!(status, StatusCode::OK);
    let statement: StudentStatement = serde_json::from_str(&body).unwrap();
    assert_eq!(statement.outstanding_balance, Money::from_major(2000));
    assert_eq!(statement.payments.len(), 1);
    assert_eq!(statement.fee_assignments.len(), 2);
    let (status, _) = ctx.get("/api/students/ADM0000/statement").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    ctx.tear_down().await;
}

#[actix_web::test]
async fn credit_is_applied_on_request() {
    let ctx = TestContext::new().await;
    let student = ctx.student("ADM4512").await;
    ctx.fee(&student, "Term 1", 1000).await;
    ctx.webhook("confirmation", &c2b_body("QK4512B006", "ADM4512", "1500")).await;
    // Inserted directly, so nothing applies the credit automatically
    ctx.fee(&student, "Term 2", 300).await;

    let (status, body) = ctx.post(&format!("/api/students/{}/apply_credit", student.id), "").await;
    assert_eq!(status, StatusCode::OK);
    let application: CreditApplication = serde_json::from_str(&body).unwrap();
    assert_eq!(application.applied, Money::from_major(300));
    assert_eq!(application.student.credit_balance, Money::from_major(200));
    assert_eq!(application.outstanding_balance, Money::zero());

    let (_, body) = ctx.post(&format!("/api/students/{}/apply_credit", student.id), "").await;
    let application: CreditApplication = serde_json::from_str(&body).unwrap();
    assert!(application.is_empty());

    let (status, _) = ctx.post("/api/students/9999/apply_credit", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    ctx.tear_down().await;
}

//----------------------------------------------   Store errors  ----------------------------------------------------

#[actix_web::test]
async fn store_errors_map_to_status_codes() {
    let mut store = MockStudentStore::new();
    store
        .expect_count_payments_by_status()
        .returning(|_| Err(StudentApiError::DatabaseError("disk full".to_string())));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(UnmatchedQueueApi::new(store)))
            .service(FailedPaymentsRoute::<MockStudentStore>::new())
            .service(UnmatchedPaymentsRoute::<MockStudentStore>::new()),
    )
    .await;
    let res = test::call_service(&app, TestRequest::get().uri("/failed").to_request()).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = test::read_body(res).await;
    assert!(String::from_utf8_lossy(&body).contains("disk full"));

    let mut store = MockStudentStore::new();
    store.expect_fetch_student_by_admission_no().returning(|adm| {
        if adm.contains('*') {
            Err(StudentApiError::QueryError("wildcards are not allowed".to_string()))
        } else {
            Ok(None)
        }
    });
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(StudentApi::new(store)))
            .service(StudentStatementRoute::<MockStudentStore>::new()),
    )
    .await;
    let res = test::call_service(&app, TestRequest::get().uri("/students/ADM1/statement").to_request()).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let res = test::call_service(&app, TestRequest::get().uri("/students/ADM*/statement").to_request()).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
