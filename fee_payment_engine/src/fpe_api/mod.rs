//! # Fee payment engine public API
//!
//! * [`payment_flow_api`] drives payment notifications through the idempotency guard, account matching and
//!   allocation. It also handles manual resolution and credit application.
//! * [`unmatched_queue_api`] lists the payments that need an operator.
//! * [`student_api`] provides student statements and payment details.
//!
//! Every API is created by handing it a store backend that implements the traits it needs:
//!
//! ```rust,ignore
//! use fee_payment_engine::{events::EventProducers, PaymentFlowApi, SqliteDatabase};
//! let db = SqliteDatabase::new_with_url("sqlite://data/fee_store.db", 25).await?;
//! let api = PaymentFlowApi::new(db, EventProducers::default());
//! let outcome = api.process_new_payment(payment).await?;
//! ```
pub mod payment_flow_api;
pub mod payment_objects;
pub mod student_api;
pub mod unmatched_queue_api;
