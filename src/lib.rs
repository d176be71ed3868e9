//! Postgres Query Executor Library
//!
//! A connection-pooled, transactional executor for one Postgres endpoint.
//! Each statement runs in its own transaction with positional parameters
//! and returns rows as JSON records.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Config, DatabaseConfig};
pub use db::{ConnectionPool, QueryExecutor};
pub use error::{DbError, DbResult};
pub use models::{FetchMode, QueryOutput, QueryParam, QuerySpec, Record};
