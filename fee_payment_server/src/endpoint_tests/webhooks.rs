use std::time::Duration;

use fee_payment_engine::{
    db_types::{MatchFailureReason, Money, NewPayment, PaymentChannel, PaymentStatus},
    Pagination,
    StudentManagement,
    UnmatchedQueueApi,
};
use serde_json::json;

use super::helpers::{accepted, c2b_body, stk_body, wait_for_status, TestContext};
use crate::{
    config::GatewayOptions,
    delivery::RetryQueue,
    helpers::Backoff,
    mpesa::Notification,
    retry_worker::run_retry_pass,
};

#[actix_web::test]
async fn c2b_confirmation_is_allocated() {
    let ctx = TestContext::new().await;
    let student = ctx.student("ADM4512").await;
    ctx.fee(&student, "Term 1", 5000).await;
    let ack = ctx.webhook("confirmation", &c2b_body("QK4512A001", "ADM4512", "4000.00")).await;
    assert_eq!(ack, accepted());
    assert_eq!(ctx.status("QK4512A001").await, Some(PaymentStatus::Allocated));
    let fees = ctx.assignments(student.id).await;
    assert_eq!(fees[0].balance(), Money::from_major(1000));
    let payment = ctx.payment("QK4512A001").await.unwrap();
    assert_eq!(payment.payer, "254708374149");
    assert_eq!(payment.payer_name.as_deref(), Some("Jane Wanjiru"));
    ctx.tear_down().await;
}

#[actix_web::test]
async fn redelivery_is_acknowledged_but_not_applied_twice() {
    let ctx = TestContext::new().await;
    let student = ctx.student("ADM4512").await;
    ctx.fee(&student, "Term 1", 5000).await;
    let body = c2b_body("QK4512A002", "ADM4512", "4000");
    assert_eq!(ctx.webhook("confirmation", &body).await, accepted());
    assert_eq!(ctx.webhook("confirmation", &body).await, accepted());
    let records = ctx.api.db().fetch_allocations_for_payment("QK4512A002").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(ctx.assignments(student.id).await[0].balance(), Money::from_major(1000));
    ctx.tear_down().await;
}

#[actix_web::test]
async fn unknown_reference_is_accepted_and_queued() {
    let ctx = TestContext::new().await;
    ctx.student("ADM4512").await;
    let ack = ctx.webhook("confirmation", &c2b_body("QK4512A003", "ADM9999", "1500")).await;
    assert_eq!(ack, accepted());
    assert_eq!(ctx.status("QK4512A003").await, Some(PaymentStatus::Unmatched));
    ctx.tear_down().await;
}

#[actix_web::test]
async fn unreadable_body_is_rejected_but_kept() {
    let ctx = TestContext::new().await;
    let ack = ctx.webhook("confirmation", "this is not json").await;
    assert_eq!(ack["ResultCode"], 1);
    assert!(ack["ResultDesc"].as_str().unwrap().starts_with("Rejected."));
    let failed = UnmatchedQueueApi::new(ctx.api.db().clone()).list_failed(Pagination::default()).await.unwrap();
    assert_eq!(failed.total, 1);
    let payment = &failed.items[0];
    assert!(payment.txid.starts_with("invalid-"));
    assert_eq!(payment.raw_payload.as_deref(), Some("this is not json"));
    ctx.tear_down().await;
}

#[actix_web::test]
async fn identifiable_but_invalid_payload_is_failed() {
    let ctx = TestContext::new().await;
    ctx.student("ADM4512").await;
    let ack = ctx.webhook("confirmation", &c2b_body("QK4512A004", "ADM4512", "-5")).await;
    assert_eq!(ack, accepted());
    let payment = ctx.payment("QK4512A004").await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert!(payment.reason.is_some());
    // The provider retrying the same broken notification is a duplicate, not a second failure
    assert_eq!(ctx.webhook("confirmation", &c2b_body("QK4512A004", "ADM4512", "-5")).await, accepted());
    assert_eq!(ctx.count(PaymentStatus::Failed).await, 1);
    ctx.tear_down().await;
}

#[actix_web::test]
async fn stk_callbacks() {
    let ctx = TestContext::new().await;
    let student = ctx.student("ADM4512").await;
    ctx.fee(&student, "Term 1", 5000).await;
    // Cancelled by the payer: acknowledged, nothing recorded
    assert_eq!(ctx.webhook("stk_callback", &stk_body(1032, "", None, 0)).await, accepted());
    for status in [PaymentStatus::Pending, PaymentStatus::Unmatched, PaymentStatus::Failed] {
        assert_eq!(ctx.count(status).await, 0);
    }
    assert_eq!(ctx.webhook("stk_callback", &stk_body(0, "NLJ7RT61SV", Some("ADM4512"), 2000)).await, accepted());
    assert_eq!(ctx.status("NLJ7RT61SV").await, Some(PaymentStatus::Allocated));
    assert_eq!(ctx.webhook("stk_callback", &stk_body(0, "NLJ7RT61SW", None, 2000)).await, accepted());
    let payment = ctx.payment("NLJ7RT61SW").await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Unmatched);
    assert_eq!(payment.reason.as_deref(), Some(MatchFailureReason::MissingReference.to_string().as_str()));
    ctx.tear_down().await;
}

#[actix_web::test]
async fn manual_confirmation() {
    let ctx = TestContext::new().await;
    let student = ctx.student("ADM4512").await;
    ctx.fee(&student, "Term 1", 5000).await;
    let body = json!({
        "transaction_id": "BANK-2024-0001",
        "amount": "2500",
        "account_reference": " adm-4512 ",
        "payer": "Bursar",
        "timestamp": "2024-01-15T09:00:00+03:00"
    });
    assert_eq!(ctx.webhook("manual", &body.to_string()).await, accepted());
    let payment = ctx.payment("BANK-2024-0001").await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Allocated);
    assert_eq!(payment.channel, PaymentChannel::Manual);
    assert_eq!(payment.currency, "KES");
    assert_eq!(ctx.assignments(student.id).await[0].balance(), Money::from_major(2500));
    ctx.tear_down().await;
}

#[actix_web::test]
async fn validation_is_lenient_by_default() {
    let ctx = TestContext::new().await;
    ctx.student("ADM4512").await;
    let ack = ctx.webhook("validation", &c2b_body("", "NOBODY", "100")).await;
    assert_eq!(ack, accepted());
    assert_eq!(ctx.count(PaymentStatus::Pending).await, 0);
    ctx.tear_down().await;
}

#[actix_web::test]
async fn strict_validation_rejects_unknown_accounts() {
    let options = GatewayOptions { strict_validation: true, ack_timeout: Duration::from_secs(10), ..Default::default() };
    let ctx = TestContext::new().await.with_options(options);
    ctx.student("ADM4512").await;
    assert_eq!(ctx.webhook("validation", &c2b_body("", "adm 4512", "100")).await, accepted());
    let ack = ctx.webhook("validation", &c2b_body("", "NOBODY", "100")).await;
    assert_eq!(ack["ResultCode"], 1);
    assert_eq!(ctx.webhook("validation", "{{{").await["ResultCode"], 1);
    for status in [PaymentStatus::Pending, PaymentStatus::Unmatched, PaymentStatus::Failed] {
        assert_eq!(ctx.count(status).await, 0);
    }
    ctx.tear_down().await;
}

#[actix_web::test]
async fn slow_processing_does_not_hold_up_the_ack() {
    let options = GatewayOptions { ack_timeout: Duration::ZERO, ..Default::default() };
    let ctx = TestContext::new().await.with_options(options);
    let student = ctx.student("ADM4512").await;
    ctx.fee(&student, "Term 1", 5000).await;
    let ack = ctx.webhook("confirmation", &c2b_body("QK4512A005", "ADM4512", "1000")).await;
    assert_eq!(ack, accepted());
    assert!(wait_for_status(&ctx, "QK4512A005", PaymentStatus::Allocated).await);
    ctx.tear_down().await;
}

#[actix_web::test]
async fn store_outage_parks_the_notification() {
    let ctx = TestContext::new().await;
    ctx.api.db().pool().close().await;
    let ack = ctx.webhook("confirmation", &c2b_body("QK4512A006", "ADM4512", "1000")).await;
    assert_eq!(ack, accepted());
    assert_eq!(ctx.queue.len(), 1);
    let parked = ctx.queue.take_due(std::time::Instant::now() + Duration::from_secs(86_400));
    assert_eq!(parked[0].notification.txid(), Some("QK4512A006"));
    ctx.tear_down().await;
}

#[actix_web::test]
async fn parked_notifications_are_redelivered() {
    let mut ctx = TestContext::new().await;
    ctx.queue = RetryQueue::new(10, Backoff::new(5, Duration::ZERO, Duration::ZERO));
    let student = ctx.student("ADM4512").await;
    ctx.fee(&student, "Term 1", 5000).await;
    let payment = NewPayment::new("QK4512A007", PaymentChannel::C2b, "ADM4512", Money::from_major(500))
        .with_payer("254708374149");
    assert!(ctx.queue.park(Notification::Payment(payment)));
    let pass = run_retry_pass(&ctx.api, &ctx.queue, chrono::Duration::zero()).await;
    assert_eq!(pass.redelivered, 1);
    assert_eq!(pass.reparked, 0);
    assert_eq!(pass.sweep.redriven, 0);
    assert!(ctx.queue.is_empty());
    assert_eq!(ctx.status("QK4512A007").await, Some(PaymentStatus::Allocated));
    ctx.tear_down().await;
}

#[actix_web::test]
async fn stale_payments_are_swept() {
    let ctx = TestContext::new().await;
    let student = ctx.student("ADM4512").await;
    ctx.fee(&student, "Term 1", 5000).await;
    // Claimed, but processing never happened
    let payment = NewPayment::new("QK4512A008", PaymentChannel::C2b, "ADM4512", Money::from_major(700))
        .with_payer("254708374149");
    ctx.api.claim_payment(payment).await.unwrap();
    assert_eq!(ctx.status("QK4512A008").await, Some(PaymentStatus::Pending));
    let pass = run_retry_pass(&ctx.api, &ctx.queue, chrono::Duration::zero()).await;
    assert_eq!(pass.sweep.redriven, 1);
    assert_eq!(pass.sweep.allocated, 1);
    assert_eq!(ctx.status("QK4512A008").await, Some(PaymentStatus::Allocated));
    ctx.tear_down().await;
}
