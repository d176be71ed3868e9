//! Data models for the query executor.
//!
//! This module re-exports all model types used throughout the crate.

pub mod query;

pub use query::{FetchMode, QueryOutput, QueryParam, QuerySpec, Record};
