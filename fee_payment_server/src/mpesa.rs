//! M-Pesa notification payloads and their conversion into engine payments.
//!
//! Providers are not always consistent about field types (amounts arrive as strings or numbers, phone numbers as
//! numbers), so every field is read leniently as a JSON value and validated here. A body becomes one of:
//! * a valid payment, ready for the idempotency guard,
//! * an invalid but identifiable notification, recorded as `Failed` under its own transaction id,
//! * an unidentifiable body, recorded as `Failed` under a synthetic id and rejected with `ResultCode 1`,
//! * an event that records nothing at all (a cancelled STK prompt).
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use fee_payment_engine::db_types::{FailedPayment, Money, NewPayment, PaymentChannel};
use fpg_common::DEFAULT_CURRENCY_CODE;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// M-Pesa settles in Kenyan shillings.
pub const MPESA_CURRENCY: &str = DEFAULT_CURRENCY_CODE;
const TRANS_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentValidationError {
    #[error("{0} is missing")]
    MissingField(&'static str),
    #[error("{field} is invalid. {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("The amount must be positive, but was {0}")]
    NonPositiveAmount(Money),
}

/// What a webhook body turned out to be.
#[derive(Debug, Clone)]
pub enum Notification {
    Payment(NewPayment),
    /// Carries a transaction id, but failed validation.
    Invalid(FailedPayment),
    /// Carries no usable transaction id. Stored under a synthetic id.
    Unidentifiable(FailedPayment),
    /// A provider event that records nothing, such as a cancelled STK prompt.
    Ignored(String),
}

impl Notification {
    /// `1` tells the provider the body was rejected. Everything else is accepted for processing.
    pub fn result_code(&self) -> i32 {
        match self {
            Notification::Unidentifiable(_) => 1,
            _ => 0,
        }
    }

    pub fn txid(&self) -> Option<&str> {
        match self {
            Notification::Payment(p) => Some(&p.txid),
            Notification::Invalid(f) | Notification::Unidentifiable(f) => Some(&f.txid),
            Notification::Ignored(_) => None,
        }
    }
}

//--------------------------------------------     C2B confirmation     ------------------------------------------------
#[derive(Debug, Clone, Default, Deserialize)]
pub struct C2bConfirmation {
    #[serde(rename = "TransactionType")]
    pub transaction_type: Option<Value>,
    #[serde(rename = "TransID")]
    pub trans_id: Option<Value>,
    #[serde(rename = "TransTime")]
    pub trans_time: Option<Value>,
    #[serde(rename = "TransAmount")]
    pub trans_amount: Option<Value>,
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: Option<Value>,
    #[serde(rename = "BillRefNumber")]
    pub bill_ref_number: Option<Value>,
    #[serde(rename = "MSISDN")]
    pub msisdn: Option<Value>,
    #[serde(rename = "FirstName")]
    pub first_name: Option<Value>,
    #[serde(rename = "MiddleName")]
    pub middle_name: Option<Value>,
    #[serde(rename = "LastName")]
    pub last_name: Option<Value>,
}

impl C2bConfirmation {
    pub fn txid(&self) -> Option<String> {
        text(&self.trans_id)
    }

    /// The reference exactly as typed. An empty string is kept, so that it can be told apart from a missing one.
    pub fn account_reference(&self) -> Option<String> {
        raw_text(&self.bill_ref_number)
    }

    pub fn payer_name(&self) -> Option<String> {
        let names = [&self.first_name, &self.middle_name, &self.last_name].into_iter().filter_map(text).collect::<Vec<_>>();
        (!names.is_empty()).then(|| names.join(" "))
    }

    pub fn to_new_payment(&self, utc_offset_hours: i32) -> Result<NewPayment, PaymentValidationError> {
        let txid = self.txid().ok_or(PaymentValidationError::MissingField("TransID"))?;
        let amount = parse_amount(&self.trans_amount, "TransAmount")?;
        let paid_at = parse_trans_time(&self.trans_time, "TransTime", utc_offset_hours)?;
        let payer = text(&self.msisdn).ok_or(PaymentValidationError::MissingField("MSISDN"))?;
        let payment = new_payment(txid, PaymentChannel::C2b, self.account_reference(), amount)
            .with_payer(payer)
            .with_paid_at(paid_at)
            .with_currency(MPESA_CURRENCY);
        Ok(match self.payer_name() {
            Some(name) => payment.with_payer_name(name),
            None => payment,
        })
    }
}

pub fn parse_c2b(body: &[u8], utc_offset_hours: i32) -> Notification {
    let raw = String::from_utf8_lossy(body).into_owned();
    let confirmation = match decode::<C2bConfirmation>(body) {
        Ok(c) => c,
        Err(reason) => return unidentifiable(PaymentChannel::C2b, reason, raw),
    };
    let Some(txid) = confirmation.txid() else {
        return unidentifiable(PaymentChannel::C2b, "TransID is missing".to_string(), raw);
    };
    match confirmation.to_new_payment(utc_offset_hours) {
        Ok(payment) => Notification::Payment(payment.with_raw_payload(raw)),
        Err(e) => {
            let failed = failed_payment(txid, PaymentChannel::C2b, &e, confirmation.account_reference())
                .with_currency(MPESA_CURRENCY)
                .with_raw_payload(raw);
            let failed = match text(&confirmation.msisdn) {
                Some(payer) => failed.with_payer(payer),
                None => failed,
            };
            Notification::Invalid(failed)
        },
    }
}

/// Decodes the body of a validation request. Only the account reference is of interest.
pub fn parse_c2b_validation(body: &[u8]) -> Result<C2bConfirmation, String> {
    decode::<C2bConfirmation>(body)
}

//--------------------------------------------    Manual confirmation   ------------------------------------------------
/// A payment confirmed by the bursar, e.g. from a paper M-Pesa statement.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManualConfirmation {
    pub transaction_id: Option<Value>,
    pub amount: Option<Value>,
    pub account_reference: Option<Value>,
    pub payer: Option<Value>,
    pub payer_name: Option<Value>,
    /// RFC 3339. Falls back to the time of receipt.
    pub timestamp: Option<Value>,
    pub currency: Option<Value>,
}

impl ManualConfirmation {
    pub fn to_new_payment(&self, default_currency: &str) -> Result<NewPayment, PaymentValidationError> {
        let txid = text(&self.transaction_id).ok_or(PaymentValidationError::MissingField("transaction_id"))?;
        let amount = parse_amount(&self.amount, "amount")?;
        let currency = text(&self.currency).map(|c| c.to_ascii_uppercase()).unwrap_or_else(|| default_currency.into());
        let paid_at = text(&self.timestamp)
            .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let mut payment = new_payment(txid, PaymentChannel::Manual, raw_text(&self.account_reference), amount)
            .with_currency(currency)
            .with_paid_at(paid_at);
        if let Some(payer) = text(&self.payer) {
            payment = payment.with_payer(payer);
        }
        if let Some(name) = text(&self.payer_name) {
            payment = payment.with_payer_name(name);
        }
        Ok(payment)
    }
}

pub fn parse_manual(body: &[u8], default_currency: &str) -> Notification {
    let raw = String::from_utf8_lossy(body).into_owned();
    let confirmation = match decode::<ManualConfirmation>(body) {
        Ok(c) => c,
        Err(reason) => return unidentifiable(PaymentChannel::Manual, reason, raw),
    };
    let Some(txid) = text(&confirmation.transaction_id) else {
        return unidentifiable(PaymentChannel::Manual, "transaction_id is missing".to_string(), raw);
    };
    match confirmation.to_new_payment(default_currency) {
        Ok(payment) => Notification::Payment(payment.with_raw_payload(raw)),
        Err(e) => {
            let reference = raw_text(&confirmation.account_reference);
            Notification::Invalid(failed_payment(txid, PaymentChannel::Manual, &e, reference).with_raw_payload(raw))
        },
    }
}

//--------------------------------------------       STK callback       ------------------------------------------------
#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: Option<Value>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: Option<Value>,
    #[serde(rename = "ResultCode")]
    pub result_code: Option<Value>,
    #[serde(rename = "ResultDesc")]
    pub result_desc: Option<Value>,
    #[serde(rename = "CallbackMetadata")]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<Value>,
}

impl StkCallback {
    fn item(&self, name: &str) -> Option<Value> {
        self.callback_metadata.as_ref()?.items.iter().find(|i| i.name == name).and_then(|i| i.value.clone())
    }

    pub fn receipt_number(&self) -> Option<String> {
        text(&self.item("MpesaReceiptNumber"))
    }

    pub fn to_new_payment(&self, utc_offset_hours: i32) -> Result<NewPayment, PaymentValidationError> {
        let txid = self.receipt_number().ok_or(PaymentValidationError::MissingField("MpesaReceiptNumber"))?;
        let amount = parse_amount(&self.item("Amount"), "Amount")?;
        let paid_at = parse_trans_time(&self.item("TransactionDate"), "TransactionDate", utc_offset_hours)?;
        let payer = text(&self.item("PhoneNumber")).ok_or(PaymentValidationError::MissingField("PhoneNumber"))?;
        let reference = raw_text(&self.item("AccountReference"));
        Ok(new_payment(txid, PaymentChannel::Stk, reference, amount)
            .with_payer(payer)
            .with_paid_at(paid_at)
            .with_currency(MPESA_CURRENCY))
    }
}

pub fn parse_stk(body: &[u8], utc_offset_hours: i32) -> Notification {
    let raw = String::from_utf8_lossy(body).into_owned();
    let callback = match decode::<StkCallbackEnvelope>(body) {
        Ok(envelope) => envelope.body.stk_callback,
        Err(reason) => return unidentifiable(PaymentChannel::Stk, reason, raw),
    };
    let result_code = match text(&callback.result_code).map(|c| c.parse::<i64>()) {
        Some(Ok(code)) => code,
        _ => return unidentifiable(PaymentChannel::Stk, "ResultCode is missing or invalid".to_string(), raw),
    };
    if result_code != 0 {
        let checkout = text(&callback.checkout_request_id).unwrap_or_else(|| "(unknown)".into());
        let desc = text(&callback.result_desc).unwrap_or_default();
        return Notification::Ignored(format!("STK request {checkout} did not complete ({result_code}). {desc}"));
    }
    let Some(txid) = callback.receipt_number() else {
        return unidentifiable(PaymentChannel::Stk, "MpesaReceiptNumber is missing".to_string(), raw);
    };
    match callback.to_new_payment(utc_offset_hours) {
        Ok(payment) => Notification::Payment(payment.with_raw_payload(raw)),
        Err(e) => {
            let reference = raw_text(&callback.item("AccountReference"));
            let failed = failed_payment(txid, PaymentChannel::Stk, &e, reference)
                .with_currency(MPESA_CURRENCY)
                .with_raw_payload(raw);
            Notification::Invalid(failed)
        },
    }
}

//--------------------------------------------         Helpers          ------------------------------------------------
fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, String> {
    serde_json::from_slice::<T>(body).map_err(|e| format!("Unreadable payload. {e}"))
}

fn unidentifiable(channel: PaymentChannel, reason: String, raw: String) -> Notification {
    let failed = FailedPayment::new(FailedPayment::synthetic_txid(), channel, reason).with_raw_payload(raw);
    Notification::Unidentifiable(failed)
}

fn failed_payment(
    txid: String,
    channel: PaymentChannel,
    error: &PaymentValidationError,
    reference: Option<String>,
) -> FailedPayment {
    let failed = FailedPayment::new(txid, channel, error.to_string());
    match reference {
        Some(r) => failed.with_account_reference(r),
        None => failed,
    }
}

fn new_payment(txid: String, channel: PaymentChannel, reference: Option<String>, amount: Money) -> NewPayment {
    match reference {
        Some(r) => NewPayment::new(txid, channel, r, amount),
        None => NewPayment::new(txid, channel, String::new(), amount).without_reference(),
    }
}

/// A trimmed, non-empty string. Numbers are accepted, since providers send ids and phone numbers as either.
fn text(value: &Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn raw_text(value: &Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

pub fn parse_amount(value: &Option<Value>, field: &'static str) -> Result<Money, PaymentValidationError> {
    let amount = match value {
        None | Some(Value::Null) => return Err(PaymentValidationError::MissingField(field)),
        Some(Value::String(s)) => s.parse::<Money>(),
        Some(Value::Number(n)) => n.to_string().parse::<Money>(),
        Some(v) => return Err(PaymentValidationError::InvalidField { field, reason: format!("{v} is not a number") }),
    }
    .map_err(|e| PaymentValidationError::InvalidField { field, reason: e.to_string() })?;
    if amount.is_positive() {
        Ok(amount)
    } else {
        Err(PaymentValidationError::NonPositiveAmount(amount))
    }
}

/// Provider timestamps are `YYYYMMDDHHMMSS` in local time at the given offset.
pub fn parse_trans_time(
    value: &Option<Value>,
    field: &'static str,
    utc_offset_hours: i32,
) -> Result<DateTime<Utc>, PaymentValidationError> {
    let s = text(value).ok_or(PaymentValidationError::MissingField(field))?;
    let invalid = |reason: String| PaymentValidationError::InvalidField { field, reason };
    let naive = NaiveDateTime::parse_from_str(&s, TRANS_TIME_FORMAT).map_err(|e| invalid(format!("'{s}': {e}")))?;
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600)
        .ok_or_else(|| invalid(format!("{utc_offset_hours} is not a valid UTC offset")))?;
    let local = offset.from_local_datetime(&naive).single().ok_or_else(|| invalid(format!("'{s}' is ambiguous")))?;
    Ok(local.with_timezone(&Utc))
}
