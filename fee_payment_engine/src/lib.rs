//! Fee Payment Engine
//!
//! The fee payment engine reconciles mobile-money payment notifications against school fee obligations. It is
//! provider-agnostic: the HTTP surface that receives provider webhooks lives in `fee_payment_server`.
//!
//! The library is divided into these sections:
//! 1. Storage ([`mod@db`]). The store traits define what a backend must provide; SQLite is the supported backend. The
//!    data types used by the store are defined in [`db_types`] and are public.
//! 2. The public API ([`mod@fpe_api`]). [`PaymentFlowApi`] takes a payment from the idempotency guard through account
//!    matching and allocation. [`UnmatchedQueueApi`] and [`StudentApi`] serve operators.
//! 3. Pure helpers ([`helpers`]): the account matcher, the allocation planner and the per-student lock map.
//!
//! The engine publishes events when a payment is allocated, parked as unmatched or failed. Side effects such as payer
//! notifications subscribe to these via [`events::EventHooks`], so they can never hold up or roll back a financial
//! write.
mod db;

mod config;
pub mod db_types;
pub mod events;
mod fpe_api;
pub mod helpers;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use config::EngineConfig;
#[cfg(feature = "sqlite")]
pub use db::sqlite::SqliteDatabase;
pub use db::traits::{
    AllocationResult,
    ApplyOnce,
    CreditApplication,
    Pagination,
    PaymentGatewayDatabase,
    PaymentGatewayError,
    StudentApiError,
    StudentManagement,
};
pub use fpe_api::{
    payment_flow_api::PaymentFlowApi,
    payment_objects,
    student_api::StudentApi,
    unmatched_queue_api::UnmatchedQueueApi,
};
