//! # Store contracts
//!
//! These traits define what a storage backend must provide for the fee payment engine.
//!
//! * [`PaymentGatewayDatabase`] covers every operation that moves money or changes a payment's status. Each method is
//!   atomic.
//! * [`StudentManagement`] provides read-only queries over students, fee assignments, payments and the allocation audit
//!   trail.
mod data_objects;
mod payment_gateway_database;
mod student_management;

pub use data_objects::{AllocationResult, ApplyOnce, CreditApplication, Pagination};
pub use payment_gateway_database::{PaymentGatewayDatabase, PaymentGatewayError};
pub use student_management::{StudentApiError, StudentManagement};
