//! Database access layer.
//!
//! This module provides database access functionality:
//! - Connection pool management
//! - Query execution
//! - Placeholder scanning and parameter binding
//! - Client-side interpolation for endpoints without extended protocol support
//! - Type mappings

pub mod executor;
pub mod interpolate;
pub mod params;
pub mod placeholders;
pub mod pool;
pub mod types;

pub use executor::QueryExecutor;
pub use placeholders::{ParsedStatement, PlaceholderStyle};
pub use pool::{ConnectionLease, ConnectionPool, PoolStatus};
