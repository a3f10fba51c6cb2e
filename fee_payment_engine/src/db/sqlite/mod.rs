//! # SQLite backend
//!
//! The low-level store functions in this module are plain async functions that accept a `&mut SqliteConnection`.
//! Callers obtain a connection from the pool, or open a transaction, and call through to them without any other
//! changes. [`SqliteDatabase`] composes them into the atomic operations required by the store traits.
use std::{env, str::FromStr};

use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Error as SqlxError,
    SqlitePool,
};

pub mod allocations;
pub mod fee_assignments;
pub mod payments;
mod sqlite_impl;
pub mod students;

pub use sqlite_impl::SqliteDatabase;

const SQLITE_DB_URL: &str = "sqlite://data/fee_store.db";

pub fn db_url() -> String {
    let result = env::var("FPG_DATABASE_URL").unwrap_or_else(|_| {
        info!("🗃️ FPG_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("🗃️ Using database URL: {result}");
    result
}

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    Ok(pool)
}
