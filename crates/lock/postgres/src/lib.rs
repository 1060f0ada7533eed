//! `PostgreSQL` backend for Tollgate locks.
//!
//! Each lock is one row keyed by `(store_id, lock_key)`. Expiry is judged by
//! the database clock, so clients with skewed clocks still agree on whether
//! a record is live.

mod config;
mod migrations;
mod store;

pub use config::PostgresConfig;
pub use migrations::run_migrations;
pub use store::PostgresLockStore;
