use chrono::NaiveDate;
use cucumber::{gherkin::Step, given, then, when};
use fee_payment_engine::{
    db_types::{MatchFailureReason, Money, NewFeeAssignment, NewPayment, NewStudent, PaymentChannel, PaymentStatus},
    payment_objects::PaymentOutcome,
    PaymentGatewayDatabase,
    StudentManagement,
};

use crate::cucumber::FeeWorld;

fn money(value: &str) -> Money {
    value.parse().unwrap_or_else(|e| panic!("{value} is not a valid amount: {e}"))
}

#[given(expr = "a student {word} named {string}")]
async fn add_student(world: &mut FeeWorld, admission_no: String, name: String) {
    let student = NewStudent::new(admission_no, name).with_phone("254700000001");
    world.api().db().insert_student(student).await.expect("Error creating student");
}

/// | term  | fee     | amount | due        |
#[given(expr = "student {word} is billed")]
async fn bill_student(world: &mut FeeWorld, step: &Step, admission_no: String) {
    let student = world.student(&admission_no).await;
    let table = step.table.as_ref().expect("A table of fees is required");
    for row in table.rows.iter().skip(1) {
        let [term, fee, amount, due] = [&row[0], &row[1], &row[2], &row[3]];
        let mut assignment = NewFeeAssignment::new(student.id, fee.as_str(), term.as_str(), 2024, money(amount));
        if !due.is_empty() {
            let due = NaiveDate::parse_from_str(due, "%Y-%m-%d").expect("Invalid due date");
            assignment = assignment.with_due_date(due);
        }
        world.api().db().insert_fee_assignment(assignment).await.expect("Error creating fee assignment");
    }
}

#[when(expr = "student {word} is assigned a {word} fee of {word} for {word}")]
async fn assign_fee(world: &mut FeeWorld, admission_no: String, fee: String, amount: String, term: String) {
    let student = world.student(&admission_no).await;
    let assignment = NewFeeAssignment::new(student.id, fee, term, 2024, money(&amount));
    world.api().assign_fee(assignment).await.expect("Error assigning fee");
}

#[when(expr = "M-Pesa confirms payment {word} of {word} with reference {string}")]
async fn receive_payment(world: &mut FeeWorld, txid: String, amount: String, reference: String) {
    let payment = NewPayment::new(txid, PaymentChannel::C2b, reference, money(&amount)).with_payer("254711111111");
    let outcome = world.api().process_new_payment(payment).await.expect("Error processing payment");
    world.last_outcome = Some(outcome);
}

#[when(expr = "payment {word} is resolved to student {word}")]
async fn resolve(world: &mut FeeWorld, txid: String, admission_no: String) {
    let student = world.student(&admission_no).await;
    let outcome = world.api().resolve_unmatched(&txid, student.id).await.expect("Error resolving payment");
    world.last_outcome = Some(outcome);
}

#[when(expr = "credit is applied for student {word}")]
async fn apply_credit(world: &mut FeeWorld, admission_no: String) {
    let student = world.student(&admission_no).await;
    world.api().apply_credit(student.id).await.expect("Error applying credit");
}

#[then(expr = "payment {word} is {word}")]
async fn check_payment_status(world: &mut FeeWorld, txid: String, status: String) {
    let expected: PaymentStatus = status.parse().expect("Not a payment status");
    assert_eq!(world.payment_status(&txid).await, expected);
}

#[then("the delivery is acknowledged as a duplicate")]
async fn check_duplicate(world: &mut FeeWorld) {
    assert!(matches!(world.last_outcome, Some(PaymentOutcome::Duplicate(_))), "{:?}", world.last_outcome);
}

#[then(expr = "the payment is unmatched because of {word}")]
async fn check_unmatched_reason(world: &mut FeeWorld, reason: String) {
    let expected: MatchFailureReason = reason.parse().expect("Not a match failure reason");
    match &world.last_outcome {
        Some(PaymentOutcome::Unmatched(_, failure)) => assert_eq!(failure.reason, expected),
        other => panic!("Expected an unmatched payment, got {other:?}"),
    }
}

#[then(expr = "student {word} is suggested")]
async fn check_suggestion(world: &mut FeeWorld, admission_no: String) {
    let Some(PaymentOutcome::Unmatched(_, failure)) = &world.last_outcome else {
        panic!("Expected an unmatched payment, got {:?}", world.last_outcome);
    };
    assert!(failure.candidates.iter().any(|c| c.admission_no == admission_no), "{failure:?}");
}

#[then(expr = "the {word} fee for student {word} has a balance of {word}")]
async fn check_fee_balance(world: &mut FeeWorld, term: String, admission_no: String, balance: String) {
    let student = world.student(&admission_no).await;
    let fees = world.api().db().fetch_fee_assignments(student.id).await.expect("Error fetching fees");
    let fee = fees.iter().find(|f| f.term == term).unwrap_or_else(|| panic!("No {term} fee for {admission_no}"));
    assert_eq!(fee.balance(), money(&balance), "Balance of the {term} fee is incorrect");
}

#[then(expr = "student {word} has a credit balance of {word}")]
async fn check_credit(world: &mut FeeWorld, admission_no: String, credit: String) {
    let student = world.student(&admission_no).await;
    assert_eq!(student.credit_balance, money(&credit), "Credit balance is incorrect");
}

#[then(expr = "payment {word} has {int} allocation record(s)")]
async fn check_allocation_count(world: &mut FeeWorld, txid: String, count: usize) {
    let records = world.api().db().fetch_allocations_for_payment(&txid).await.expect("Error fetching allocations");
    assert_eq!(records.len(), count);
}
