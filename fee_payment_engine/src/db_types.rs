use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
pub use fpg_common::Money;
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid conversion: {0}")]
pub struct ConversionError(String);

//--------------------------------------        Student        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Student {
    pub id: i64,
    /// The school's admission number. Unique and immutable; payers quote it as the account reference.
    pub admission_no: String,
    pub full_name: String,
    pub current_class: String,
    pub fee_group: String,
    /// Unapplied funds carried forward. Never negative.
    pub credit_balance: Money,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStudent {
    pub admission_no: String,
    pub full_name: String,
    pub current_class: String,
    pub fee_group: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl NewStudent {
    pub fn new<S: Into<String>>(admission_no: S, full_name: S) -> Self {
        Self {
            admission_no: admission_no.into(),
            full_name: full_name.into(),
            current_class: String::default(),
            fee_group: String::default(),
            phone: None,
            email: None,
        }
    }

    pub fn with_class<S: Into<String>>(mut self, class: S) -> Self {
        self.current_class = class.into();
        self
    }

    pub fn with_fee_group<S: Into<String>>(mut self, group: S) -> Self {
        self.fee_group = group.into();
        self
    }

    pub fn with_phone<S: Into<String>>(mut self, phone: S) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_email<S: Into<String>>(mut self, email: S) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// The minimal projection of a student that the account matcher works on.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct StudentIndexEntry {
    pub id: i64,
    pub admission_no: String,
}

impl StudentIndexEntry {
    pub fn new<S: Into<String>>(id: i64, admission_no: S) -> Self {
        Self { id, admission_no: admission_no.into() }
    }
}

impl From<&Student> for StudentIndexEntry {
    fn from(student: &Student) -> Self {
        Self { id: student.id, admission_no: student.admission_no.clone() }
    }
}

//--------------------------------------     FeeAssignment     ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct FeeAssignment {
    /// Row id. Doubles as the creation order used to break due-date ties.
    pub id: i64,
    pub student_id: i64,
    pub fee_structure: String,
    pub term: String,
    pub year: i64,
    pub amount_due: Money,
    /// Only ever increases.
    pub amount_paid: Money,
    pub currency: String,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeeAssignment {
    pub fn balance(&self) -> Money {
        self.amount_due - self.amount_paid
    }

    pub fn is_outstanding(&self) -> bool {
        self.balance().is_positive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFeeAssignment {
    pub student_id: i64,
    pub fee_structure: String,
    pub term: String,
    pub year: i64,
    pub amount_due: Money,
    pub currency: String,
    pub due_date: Option<NaiveDate>,
}

impl NewFeeAssignment {
    pub fn new<S: Into<String>>(student_id: i64, fee_structure: S, term: S, year: i64, amount_due: Money) -> Self {
        Self {
            student_id,
            fee_structure: fee_structure.into(),
            term: term.into(),
            year,
            amount_due,
            currency: fpg_common::DEFAULT_CURRENCY_CODE.to_string(),
            due_date: None,
        }
    }

    pub fn with_due_date(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_currency<S: Into<String>>(mut self, currency: S) -> Self {
        self.currency = currency.into();
        self
    }
}

//--------------------------------------     PaymentStatus     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Claimed by the idempotency guard, not yet matched.
    Pending,
    /// Linked to a student; allocation has not been committed yet.
    Matched,
    /// Funds applied. Terminal.
    Allocated,
    /// Could not be linked to a student automatically. Waiting for an operator.
    Unmatched,
    /// Malformed or otherwise unprocessable. Terminal; needs manual remediation.
    Failed,
}

impl PaymentStatus {
    /// Whether the one-directional status machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Matched | Allocated | Unmatched | Failed) |
                (Matched, Allocated | Failed) |
                (Unmatched, Matched | Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Allocated | PaymentStatus::Failed)
    }
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "Pending"),
            PaymentStatus::Matched => write!(f, "Matched"),
            PaymentStatus::Allocated => write!(f, "Allocated"),
            PaymentStatus::Unmatched => write!(f, "Unmatched"),
            PaymentStatus::Failed => write!(f, "Failed"),
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "matched" => Ok(Self::Matched),
            "allocated" => Ok(Self::Allocated),
            "unmatched" => Ok(Self::Unmatched),
            "failed" => Ok(Self::Failed),
            _ => Err(ConversionError(format!("Invalid payment status: {s}"))),
        }
    }
}

//--------------------------------------     PaymentChannel    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentChannel {
    /// Paybill / till completion notification
    C2b,
    /// Push prompt (STK) result callback
    Stk,
    /// Bursar-entered confirmation
    Manual,
}

impl Display for PaymentChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentChannel::C2b => write!(f, "C2b"),
            PaymentChannel::Stk => write!(f, "Stk"),
            PaymentChannel::Manual => write!(f, "Manual"),
        }
    }
}

//--------------------------------------     MatchFailure      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchFailureReason {
    /// The account reference was blank after trimming.
    EmptyReference,
    /// The provider did not send an account reference at all.
    MissingReference,
    /// No student's admission number matched.
    NotFound,
    /// More than one student matched. Never guessed.
    Ambiguous,
}

impl Display for MatchFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchFailureReason::EmptyReference => write!(f, "EmptyReference"),
            MatchFailureReason::MissingReference => write!(f, "MissingReference"),
            MatchFailureReason::NotFound => write!(f, "NotFound"),
            MatchFailureReason::Ambiguous => write!(f, "Ambiguous"),
        }
    }
}

impl FromStr for MatchFailureReason {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EmptyReference" => Ok(Self::EmptyReference),
            "MissingReference" => Ok(Self::MissingReference),
            "NotFound" => Ok(Self::NotFound),
            "Ambiguous" => Ok(Self::Ambiguous),
            s => Err(ConversionError(format!("Invalid match failure reason: {s}"))),
        }
    }
}

/// A student suggested to the operator when a payment could not be matched automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub student_id: i64,
    pub admission_no: String,
}

impl From<&StudentIndexEntry> for MatchCandidate {
    fn from(entry: &StudentIndexEntry) -> Self {
        Self { student_id: entry.id, admission_no: entry.admission_no.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFailure {
    pub reason: MatchFailureReason,
    pub candidates: Vec<MatchCandidate>,
}

impl MatchFailure {
    pub fn new(reason: MatchFailureReason) -> Self {
        Self { reason, candidates: vec![] }
    }

    pub fn with_candidates(mut self, candidates: Vec<MatchCandidate>) -> Self {
        self.candidates = candidates;
        self
    }
}

impl Display for MatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} candidates)", self.reason, self.candidates.len())
    }
}

//--------------------------------------        Payment        ---------------------------------------------------------
/// An incoming payment notification, as recorded by the idempotency guard.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    /// The provider transaction id. This is the idempotency key.
    pub txid: String,
    pub channel: PaymentChannel,
    /// The raw account reference, exactly as the payer typed it. `None` if the provider did not send one.
    pub account_reference: Option<String>,
    pub amount: Money,
    pub currency: String,
    /// Payer phone number or other provider identifier
    pub payer: String,
    pub payer_name: Option<String>,
    /// The provider's transaction time
    pub paid_at: DateTime<Utc>,
    pub status: PaymentStatus,
    pub student_id: Option<i64>,
    /// Unmatched or failure reason, for operator triage
    pub reason: Option<String>,
    pub candidates: Option<Json<Vec<MatchCandidate>>>,
    pub raw_payload: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn candidates(&self) -> &[MatchCandidate] {
        self.candidates.as_ref().map(|c| c.0.as_slice()).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPayment {
    pub txid: String,
    pub channel: PaymentChannel,
    /// `None` when the provider did not send a reference at all (e.g. some STK callbacks).
    pub account_reference: Option<String>,
    pub amount: Money,
    pub currency: String,
    pub payer: String,
    pub payer_name: Option<String>,
    pub paid_at: DateTime<Utc>,
    pub raw_payload: Option<String>,
}

impl NewPayment {
    pub fn new<S: Into<String>>(txid: S, channel: PaymentChannel, account_reference: S, amount: Money) -> Self {
        Self {
            txid: txid.into(),
            channel,
            account_reference: Some(account_reference.into()),
            amount,
            currency: fpg_common::DEFAULT_CURRENCY_CODE.to_string(),
            payer: String::default(),
            payer_name: None,
            paid_at: Utc::now(),
            raw_payload: None,
        }
    }

    pub fn with_payer<S: Into<String>>(mut self, payer: S) -> Self {
        self.payer = payer.into();
        self
    }

    pub fn with_payer_name<S: Into<String>>(mut self, name: S) -> Self {
        self.payer_name = Some(name.into());
        self
    }

    pub fn with_currency<S: Into<String>>(mut self, currency: S) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_paid_at(mut self, paid_at: DateTime<Utc>) -> Self {
        self.paid_at = paid_at;
        self
    }

    pub fn with_raw_payload<S: Into<String>>(mut self, raw: S) -> Self {
        self.raw_payload = Some(raw.into());
        self
    }

    pub fn without_reference(mut self) -> Self {
        self.account_reference = None;
        self
    }
}

/// A notification that failed gateway validation. It is recorded directly in `Failed` status so that operators can
/// see it and so that a redelivery is recognised as a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPayment {
    pub txid: String,
    pub channel: PaymentChannel,
    pub reason: String,
    pub account_reference: Option<String>,
    pub payer: Option<String>,
    pub currency: String,
    pub raw_payload: Option<String>,
}

impl FailedPayment {
    pub fn new<S: Into<String>>(txid: S, channel: PaymentChannel, reason: S) -> Self {
        Self {
            txid: txid.into(),
            channel,
            reason: reason.into(),
            account_reference: None,
            payer: None,
            currency: fpg_common::DEFAULT_CURRENCY_CODE.to_string(),
            raw_payload: None,
        }
    }

    /// A synthetic id for notifications that carried no usable transaction id.
    pub fn synthetic_txid() -> String {
        format!("invalid-{:016x}", rand::random::<u64>())
    }

    pub fn with_account_reference<S: Into<String>>(mut self, reference: S) -> Self {
        self.account_reference = Some(reference.into());
        self
    }

    pub fn with_payer<S: Into<String>>(mut self, payer: S) -> Self {
        self.payer = Some(payer.into());
        self
    }

    pub fn with_currency<S: Into<String>>(mut self, currency: S) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_raw_payload<S: Into<String>>(mut self, raw: S) -> Self {
        self.raw_payload = Some(raw.into());
        self
    }
}

//--------------------------------------    AllocationType     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationType {
    /// Part of a payment applied to a fee assignment
    Fee,
    /// Overpayment carried forward as student credit
    Credit,
    /// Existing credit applied to a fee assignment
    CreditApplication,
}

impl Display for AllocationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocationType::Fee => write!(f, "Fee"),
            AllocationType::Credit => write!(f, "Credit"),
            AllocationType::CreditApplication => write!(f, "CreditApplication"),
        }
    }
}

//--------------------------------------   AllocationRecord    ---------------------------------------------------------
/// An append-only audit entry.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub id: i64,
    /// `None` for credit applications, which are not funded by a single payment
    pub payment_txid: Option<String>,
    pub student_id: i64,
    /// `None` for `Credit` records
    pub fee_assignment_id: Option<i64>,
    pub amount: Money,
    pub allocation_type: AllocationType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAllocationRecord {
    pub payment_txid: Option<String>,
    pub student_id: i64,
    pub fee_assignment_id: Option<i64>,
    pub amount: Money,
    pub allocation_type: AllocationType,
}

impl NewAllocationRecord {
    pub fn fee(txid: &str, student_id: i64, fee_assignment_id: i64, amount: Money) -> Self {
        Self {
            payment_txid: Some(txid.to_string()),
            student_id,
            fee_assignment_id: Some(fee_assignment_id),
            amount,
            allocation_type: AllocationType::Fee,
        }
    }

    pub fn credit(txid: &str, student_id: i64, amount: Money) -> Self {
        Self {
            payment_txid: Some(txid.to_string()),
            student_id,
            fee_assignment_id: None,
            amount,
            allocation_type: AllocationType::Credit,
        }
    }

    pub fn credit_application(student_id: i64, fee_assignment_id: i64, amount: Money) -> Self {
        Self {
            payment_txid: None,
            student_id,
            fee_assignment_id: Some(fee_assignment_id),
            amount,
            allocation_type: AllocationType::CreditApplication,
        }
    }
}
