//! Error types for the query executor.
//!
//! All failures surface as a single [`DbError`] enum built with `thiserror`.
//! Each variant carries enough context for the caller to act on it: query
//! failures keep the statement and parameters that produced them, connection
//! failures carry a suggestion pointing at the likely cause.

use crate::config::DEFAULT_ACQUIRE_TIMEOUT_SECS;
use crate::models::QueryParam;
use thiserror::Error;

/// SQLSTATE raised by the server when `statement_timeout` cancels a statement.
const SQLSTATE_QUERY_CANCELED: &str = "57014";

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Configuration { message: String, suggestion: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Query failed: {message} (statement: {statement})")]
    Query {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        statement: String,
        params: Vec<QueryParam>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error with a helpful suggestion.
    pub fn configuration(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a query error carrying the statement and its parameters.
    pub fn query(
        message: impl Into<String>,
        sql_state: Option<String>,
        statement: impl Into<String>,
        params: &[QueryParam],
    ) -> Self {
        Self::Query {
            message: message.into(),
            sql_state,
            statement: statement.into(),
            params: params.to_vec(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wrap a driver error raised while running `statement`.
    ///
    /// Server-side errors become [`DbError::Query`] with the statement and
    /// parameters attached; transport failures stay connection errors.
    /// A statement cancelled by `statement_timeout` becomes a timeout.
    pub fn from_statement(
        err: sqlx::Error,
        statement: &str,
        params: &[QueryParam],
        statement_timeout_secs: Option<u64>,
    ) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                if code.as_deref() == Some(SQLSTATE_QUERY_CANCELED) {
                    if let Some(secs) = statement_timeout_secs {
                        return DbError::timeout("statement execution", secs);
                    }
                }
                DbError::query(db_err.message(), code, statement, params)
            }
            sqlx::Error::ColumnDecode { index, source } => DbError::query(
                format!("Failed to decode column {}: {}", index, source),
                None,
                statement,
                params,
            ),
            sqlx::Error::Decode(source) => DbError::query(
                format!("Decode error: {}", source),
                None,
                statement,
                params,
            ),
            other => DbError::from(other),
        }
    }

    /// Short name of the error category, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Connection { .. } => "connection",
            Self::Query { .. } => "query",
            Self::Timeout { .. } => "timeout",
            Self::Internal { .. } => "internal",
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Configuration { suggestion, .. } => Some(suggestion),
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// SQLSTATE reported by the server for a failed statement.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Query { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Parameters bound to the statement that failed.
    pub fn params(&self) -> Option<&[QueryParam]> {
        match self {
            Self::Query { params, .. } => Some(params),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// The executor never retries on its own; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::configuration(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::Query {
                    message: db_err.message().to_string(),
                    sql_state: code,
                    statement: String::new(),
                    params: Vec::new(),
                }
            }
            sqlx::Error::PoolTimedOut => {
                DbError::timeout("connection pool acquire", DEFAULT_ACQUIRE_TIMEOUT_SECS)
            }
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Create a new executor")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify the sslmode setting and server certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::internal(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
