//! # Fee payment gateway server
//! This crate hosts the HTTP surface of the fee payment gateway. It is responsible for:
//! * Receiving M-Pesa payment notifications, converting them into engine payments and always answering the provider
//!   with its acknowledgment envelope in time.
//! * Parking notifications that could not be stored and re-driving stale payments ([`retry_worker`]).
//! * Sending payment confirmations to parents ([`notifications`]).
//! * The operator API for the unmatched queue, failed payments and student statements.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/webhooks/mpesa/{confirmation,manual,stk_callback,validation}`: Provider webhooks.
//! * `/api/...`: Operator routes. Authentication is left to the reverse proxy in front of the server.
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod delivery;
pub mod errors;
pub mod helpers;
pub mod mpesa;
pub mod notifications;
pub mod retry_worker;
pub mod routes;
pub mod server;

#[cfg(test)]
mod endpoint_tests;
