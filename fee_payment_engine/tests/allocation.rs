use fee_payment_engine::{
    db_types::{AllocationType, Money, NewFeeAssignment, NewPayment, PaymentChannel, PaymentStatus},
    payment_objects::PaymentOutcome,
    AllocationResult,
    PaymentGatewayDatabase,
    StudentManagement,
};

mod support;
use support::*;

fn allocated(outcome: PaymentOutcome) -> AllocationResult {
    match outcome {
        PaymentOutcome::Allocated(result) => result,
        other => panic!("Expected the payment to be allocated, but got {other:?}"),
    }
}

#[tokio::test]
async fn earliest_due_date_is_paid_first() {
    let api = setup().await;
    let s = student(&api, "ADM1001").await;
    let term2 = fee(&api, &s, "Term2", Some("2024-04-15"), 5_000).await;
    let term1 = fee(&api, &s, "Term1", Some("2024-01-15"), 3_000).await;

    let result = allocated(api.process_new_payment(c2b("QK100001", "ADM1001", 4_000)).await.unwrap());
    assert_conserved(&result);
    assert_eq!(result.payment.status, PaymentStatus::Allocated);
    assert_eq!(result.payment.student_id, Some(s.id));
    assert_eq!(result.credit_generated, Money::zero());
    assert_eq!(result.outstanding_balance, kes(4_000));
    assert_eq!(result.records.len(), 2);
    assert_eq!(result.records[0].fee_assignment_id, Some(term1.id));
    assert_eq!(result.records[0].amount, kes(3_000));
    assert_eq!(result.records[1].fee_assignment_id, Some(term2.id));
    assert_eq!(result.records[1].amount, kes(1_000));

    let fees = assignments(&api, s.id).await;
    assert_eq!(fees[0].id, term1.id);
    assert_eq!(fees[0].balance(), Money::zero());
    assert_eq!(fees[1].balance(), kes(4_000));
    assert_eq!(reload(&api, s.id).await.credit_balance, Money::zero());
    tear_down(api).await;
}

#[tokio::test]
async fn overpayment_becomes_credit() {
    let api = setup().await;
    let s = student(&api, "ADM1002").await;
    fee(&api, &s, "Term1", Some("2024-01-15"), 3_000).await;
    fee(&api, &s, "Term2", None, 2_000).await;

    let payment = NewPayment::new("QK100002", PaymentChannel::C2b, "adm1002", Money::from(523_450));
    let result = allocated(api.process_new_payment(payment).await.unwrap());
    assert_conserved(&result);
    assert_eq!(result.credit_generated, Money::from(23_450));
    assert_eq!(result.outstanding_balance, Money::zero());
    let credit = result.records.last().unwrap();
    assert_eq!(credit.allocation_type, AllocationType::Credit);
    assert_eq!(credit.fee_assignment_id, None);
    assert_eq!(credit.amount, Money::from(23_450));

    assert!(assignments(&api, s.id).await.iter().all(|a| a.balance() == Money::zero()));
    assert_eq!(reload(&api, s.id).await.credit_balance, Money::from(23_450));
    tear_down(api).await;
}

#[tokio::test]
async fn nothing_outstanding_means_everything_is_credit() {
    let api = setup().await;
    let s = student(&api, "ADM1003").await;
    let result = allocated(api.process_new_payment(c2b("QK100003", "ADM1003", 750)).await.unwrap());
    assert_conserved(&result);
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].allocation_type, AllocationType::Credit);
    assert_eq!(reload(&api, s.id).await.credit_balance, kes(750));
    tear_down(api).await;
}

#[tokio::test]
async fn existing_credit_is_not_consumed_by_a_payment() {
    let api = setup().await;
    let s = student(&api, "ADM1004").await;
    allocated(api.process_new_payment(c2b("QK100004", "ADM1004", 1_000)).await.unwrap());
    fee(&api, &s, "Term1", Some("2024-01-15"), 3_000).await;

    let result = allocated(api.process_new_payment(c2b("QK100005", "ADM1004", 500)).await.unwrap());
    assert_eq!(result.applied_to_fees(), kes(500));
    assert_eq!(result.outstanding_balance, kes(2_500));
    assert_eq!(reload(&api, s.id).await.credit_balance, kes(1_000));
    tear_down(api).await;
}

#[tokio::test]
async fn explicit_credit_application() {
    let api = setup().await;
    let s = student(&api, "ADM1005").await;
    allocated(api.process_new_payment(c2b("QK100006", "ADM1005", 4_500)).await.unwrap());
    let term1 = fee(&api, &s, "Term1", Some("2024-01-15"), 3_000).await;
    let term2 = fee(&api, &s, "Term2", Some("2024-04-15"), 3_000).await;

    let application = api.apply_credit(s.id).await.unwrap();
    assert_eq!(application.applied, kes(4_500));
    assert_eq!(application.outstanding_balance, kes(1_500));
    assert_eq!(application.student.credit_balance, Money::zero());
    assert_eq!(application.records.len(), 2);
    assert!(application.records.iter().all(|r| r.allocation_type == AllocationType::CreditApplication));
    assert!(application.records.iter().all(|r| r.payment_txid.is_none()));
    assert_eq!(application.records[0].fee_assignment_id, Some(term1.id));
    assert_eq!(application.records[1].fee_assignment_id, Some(term2.id));
    assert_eq!(application.records[1].amount, kes(1_500));

    // Nothing left to apply
    let again = api.apply_credit(s.id).await.unwrap();
    assert!(again.is_empty());
    assert_eq!(again.applied, Money::zero());
    tear_down(api).await;
}

#[tokio::test]
async fn new_fee_assignment_applies_credit_automatically() {
    let api = setup().await;
    let s = student(&api, "ADM1006").await;
    allocated(api.process_new_payment(c2b("QK100007", "ADM1006", 1_200)).await.unwrap());

    let result = api.assign_fee(NewFeeAssignment::new(s.id, "Transport", "Term1", 2024, kes(1_000))).await.unwrap();
    let application = result.credit_applied.expect("credit should have been applied");
    assert_eq!(application.applied, kes(1_000));
    assert_eq!(result.assignment.amount_paid, kes(1_000));
    assert_eq!(result.assignment.balance(), Money::zero());
    assert_eq!(reload(&api, s.id).await.credit_balance, kes(200));
    tear_down(api).await;
}

#[tokio::test]
async fn auto_apply_can_be_switched_off() {
    let config = fee_payment_engine::EngineConfig::default().with_auto_apply_credit(false);
    let api = setup_with(Default::default(), config).await;
    let s = student(&api, "ADM1007").await;
    allocated(api.process_new_payment(c2b("QK100008", "ADM1007", 1_200)).await.unwrap());
    let result = api.assign_fee(NewFeeAssignment::new(s.id, "Transport", "Term1", 2024, kes(1_000))).await.unwrap();
    assert!(result.credit_applied.is_none());
    assert_eq!(result.assignment.balance(), kes(1_000));
    assert_eq!(reload(&api, s.id).await.credit_balance, kes(1_200));
    tear_down(api).await;
}

#[tokio::test]
async fn currency_mismatch_fails_the_payment() {
    let api = setup().await;
    let s = student(&api, "ADM1008").await;
    fee(&api, &s, "Term1", Some("2024-01-15"), 3_000).await;

    let payment = c2b("QK100009", "ADM1008", 100).with_currency("USD");
    let outcome = api.process_new_payment(payment).await.unwrap();
    let PaymentOutcome::Failed(payment) = outcome else { panic!("Expected a failed payment, got {outcome:?}") };
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert!(payment.reason.unwrap().starts_with("CurrencyMismatch"));
    assert_eq!(assignments(&api, s.id).await[0].amount_paid, Money::zero());
    assert!(api.db().fetch_allocations_for_payment("QK100009").await.unwrap().is_empty());
    tear_down(api).await;
}

#[tokio::test]
async fn assignments_in_another_currency_fail_the_allocation() {
    let api = setup().await;
    let s = student(&api, "ADM1009").await;
    let usd = NewFeeAssignment::new(s.id, "Exam", "Term1", 2024, kes(50)).with_currency("USD");
    api.db().insert_fee_assignment(usd).await.unwrap();

    let outcome = api.process_new_payment(c2b("QK100010", "ADM1009", 100)).await.unwrap();
    assert_eq!(outcome.status(), Some(PaymentStatus::Failed));
    let stored = api.db().fetch_payment("QK100010").await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Failed);
    assert_eq!(reload(&api, s.id).await.credit_balance, Money::zero());
    tear_down(api).await;
}

#[tokio::test]
async fn credit_is_never_applied_across_currencies() {
    let api = setup().await;
    let s = student(&api, "ADM1012").await;
    allocated(api.process_new_payment(c2b("QK100013", "ADM1012", 1_000)).await.unwrap());
    assert_eq!(reload(&api, s.id).await.credit_balance, kes(1_000));

    // Auto-apply on a new assignment skips the foreign-currency fee
    let usd = NewFeeAssignment::new(s.id, "Exam", "Term1", 2024, kes(50)).with_currency("USD");
    let result = api.assign_fee(usd).await.unwrap();
    let application = result.credit_applied.expect("auto-apply should have run");
    assert!(application.is_empty());
    assert_eq!(application.applied, Money::zero());
    assert_eq!(result.assignment.amount_paid, Money::zero());
    assert_eq!(reload(&api, s.id).await.credit_balance, kes(1_000));

    // An explicit request leaves it alone too, but still pays fees in the billing currency
    let term1 = fee(&api, &s, "Term1", Some("2024-01-15"), 300).await;
    let application = api.apply_credit(s.id).await.unwrap();
    assert_eq!(application.applied, kes(300));
    assert_eq!(application.records.len(), 1);
    assert_eq!(application.records[0].fee_assignment_id, Some(term1.id));
    assert_eq!(application.student.credit_balance, kes(700));
    let fees = assignments(&api, s.id).await;
    let usd = fees.iter().find(|a| a.currency == "USD").unwrap();
    assert_eq!(usd.amount_paid, Money::zero());
    tear_down(api).await;
}

#[tokio::test]
async fn paid_fee_assignments_cannot_be_deleted() {
    let api = setup().await;
    let s = student(&api, "ADM1010").await;
    let term1 = fee(&api, &s, "Term1", Some("2024-01-15"), 3_000).await;
    allocated(api.process_new_payment(c2b("QK100011", "ADM1010", 10)).await.unwrap());
    let deleted = sqlx::query("DELETE FROM fee_assignments WHERE id = ?").bind(term1.id).execute(api.db().pool()).await;
    assert!(deleted.is_err());
    let tampered = sqlx::query("DELETE FROM allocations").execute(api.db().pool()).await;
    assert!(tampered.is_err());
    tear_down(api).await;
}
