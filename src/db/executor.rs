//! Query execution engine.
//!
//! This module provides query execution with:
//! - Positional parameters (`?` or `$n`), validated before any connection is taken
//! - One transaction per statement, committed on success and rolled back on failure
//! - A server-side statement timeout per transaction
//! - Result shaping by [`FetchMode`]
//!
//! # Transports
//!
//! - Statements without parameters are sent unmodified over the simple query
//!   protocol, so they may contain several `;`-separated statements.
//! - With `bind_mode=native` (the default) parameters are bound over the
//!   extended protocol; `?` placeholders are rewritten to `$n` first.
//! - With `bind_mode=interpolated` parameters are rendered as escaped literals
//!   and the result is sent over the simple query protocol.

use crate::config::{BindMode, DatabaseConfig};
use crate::db::interpolate::interpolate;
use crate::db::params::bind_all;
use crate::db::placeholders::ParsedStatement;
use crate::db::pool::{ConnectionPool, PoolStatus};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{FetchMode, QueryOutput, QueryParam, QuerySpec, Record};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Connection, Executor};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A statement ready to send.
#[derive(Debug)]
enum Prepared<'a> {
    /// Sent as-is over the simple query protocol
    Text(Cow<'a, str>),
    /// Sent over the extended protocol with bound parameters
    Bound {
        sql: Cow<'a, str>,
        params: &'a [QueryParam],
    },
}

/// Validate placeholders against `params` and pick the transport.
fn prepare<'a>(
    statement: &'a str,
    params: &'a [QueryParam],
    bind_mode: BindMode,
) -> DbResult<Prepared<'a>> {
    if statement.trim().is_empty() {
        return Err(DbError::query("Statement is empty", None, statement, params));
    }

    // An empty parameter list means none were supplied
    if params.is_empty() {
        return Ok(Prepared::Text(Cow::Borrowed(statement)));
    }

    let parsed = ParsedStatement::parse(statement)
        .map_err(|e| DbError::query(e, None, statement, params))?;
    if parsed.param_count() != params.len() {
        return Err(DbError::query(
            format!(
                "Statement expects {} parameters but {} were supplied",
                parsed.param_count(),
                params.len()
            ),
            None,
            statement,
            params,
        ));
    }

    match bind_mode {
        BindMode::Native => Ok(Prepared::Bound {
            sql: parsed.to_native(),
            params,
        }),
        BindMode::Interpolated => {
            let sql = interpolate(&parsed, params)
                .map_err(|e| DbError::query(e, None, statement, params))?;
            Ok(Prepared::Text(Cow::Owned(sql)))
        }
    }
}

/// Runs statements against a [`ConnectionPool`].
///
/// Cheap to clone; clones share the same pool.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    pool: Arc<ConnectionPool>,
}

impl QueryExecutor {
    /// Create an executor with its own pool. No connection is opened yet.
    pub fn new(config: DatabaseConfig) -> Self {
        Self::with_pool(Arc::new(ConnectionPool::new(config)))
    }

    /// Create an executor over an existing pool.
    pub fn with_pool(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// Create an executor configured from `POSTGRES_URL`.
    ///
    /// Fails with a configuration error, before any network activity, when
    /// the variable is missing or malformed.
    pub fn from_env() -> DbResult<Self> {
        Ok(Self::new(DatabaseConfig::from_env()?))
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Open the pool now instead of on the first statement.
    pub async fn initialize(&self) -> DbResult<()> {
        self.pool.initialize().await
    }

    /// Close the pool. Later statements fail with a connection error.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await
    }

    pub async fn status(&self) -> PoolStatus {
        self.pool.status().await
    }

    /// Run a [`QuerySpec`].
    pub async fn run(&self, spec: &QuerySpec) -> DbResult<QueryOutput> {
        self.execute(&spec.statement, &spec.params, spec.fetch_mode)
            .await
    }

    /// Execute one statement in its own transaction.
    ///
    /// The transaction is committed when the statement and result decoding
    /// succeed, whatever the fetch mode, and rolled back otherwise. The
    /// connection returns to the pool on every path.
    pub async fn execute(
        &self,
        statement: &str,
        params: &[QueryParam],
        fetch_mode: FetchMode,
    ) -> DbResult<QueryOutput> {
        let start = Instant::now();
        let config = self.pool.config();
        let statement_timeout = config.pool_options.statement_timeout_or_default();

        debug!(
            sql = %statement,
            params = ?params.len(),
            fetch_mode = %fetch_mode,
            bind_mode = %config.bind_mode,
            timeout_secs = ?statement_timeout.map(|t| t.as_secs()),
            "Executing statement"
        );

        let result = async {
            let prepared = prepare(statement, params, config.bind_mode)?;
            let mut lease = self.pool.acquire().await?;
            let result = run_in_transaction(
                lease.connection(),
                &prepared,
                fetch_mode,
                statement_timeout,
                statement,
                params,
            )
            .await;
            lease.release();
            result
        }
        .await;

        let execution_time_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(output) => debug!(
                execution_time_ms,
                rows = output_size(output),
                "Statement completed"
            ),
            Err(e) => warn!(
                kind = e.kind(),
                sql_state = ?e.sql_state(),
                execution_time_ms,
                error = %e,
                "Statement failed"
            ),
        }
        result
    }

    /// Execute and return every row.
    pub async fn fetch_all(&self, statement: &str, params: &[QueryParam]) -> DbResult<Vec<Record>> {
        let output = self.execute(statement, params, FetchMode::All).await?;
        Ok(output.into_rows().unwrap_or_default())
    }

    /// Execute and return the first row, if any.
    pub async fn fetch_optional(
        &self,
        statement: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<Record>> {
        let output = self.execute(statement, params, FetchMode::One).await?;
        Ok(output.into_row().flatten())
    }

    /// Execute for effect and return the number of rows affected.
    pub async fn execute_statement(&self, statement: &str, params: &[QueryParam]) -> DbResult<u64> {
        let output = self.execute(statement, params, FetchMode::None).await?;
        Ok(output.rows_affected().unwrap_or(0))
    }
}

fn output_size(output: &QueryOutput) -> u64 {
    match output {
        QueryOutput::Rows(rows) => rows.len() as u64,
        QueryOutput::Row(row) => u64::from(row.is_some()),
        QueryOutput::Done { rows_affected } => *rows_affected,
    }
}

// =============================================================================
// Transaction handling
// =============================================================================

async fn run_in_transaction(
    conn: &mut PgConnection,
    prepared: &Prepared<'_>,
    fetch_mode: FetchMode,
    statement_timeout: Option<Duration>,
    statement: &str,
    params: &[QueryParam],
) -> DbResult<QueryOutput> {
    let timeout_secs = statement_timeout.map(|t| t.as_secs());
    let to_error = |e: sqlx::Error| DbError::from_statement(e, statement, params, timeout_secs);

    let mut tx = conn.begin().await.map_err(to_error)?;

    let result = async {
        if let Some(timeout) = statement_timeout {
            let set_timeout = format!("SET LOCAL statement_timeout = {}", timeout.as_millis());
            (&mut *tx).execute(set_timeout.as_str()).await?;
        }
        fetch(&mut tx, prepared, fetch_mode).await
    }
    .await;

    match result {
        Ok(output) => {
            tx.commit().await.map_err(to_error)?;
            Ok(output)
        }
        Err(e) => {
            let err = to_error(e);
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}

async fn fetch(
    conn: &mut PgConnection,
    prepared: &Prepared<'_>,
    fetch_mode: FetchMode,
) -> Result<QueryOutput, sqlx::Error> {
    match prepared {
        Prepared::Text(sql) => {
            let sql: &str = sql;
            match fetch_mode {
                FetchMode::All => rows_output(conn.fetch_all(sql).await?),
                FetchMode::One => row_output(conn.fetch_optional(sql).await?),
                FetchMode::None => Ok(QueryOutput::Done {
                    rows_affected: conn.execute(sql).await?.rows_affected(),
                }),
            }
        }
        Prepared::Bound { sql, params } => {
            let query = bind_all(sql, params);
            match fetch_mode {
                FetchMode::All => rows_output(query.fetch_all(conn).await?),
                FetchMode::One => row_output(query.fetch_optional(conn).await?),
                FetchMode::None => Ok(QueryOutput::Done {
                    rows_affected: query.execute(conn).await?.rows_affected(),
                }),
            }
        }
    }
}

fn rows_output(rows: Vec<PgRow>) -> Result<QueryOutput, sqlx::Error> {
    let records = rows
        .iter()
        .map(RowToJson::to_record)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(QueryOutput::Rows(records))
}

fn row_output(row: Option<PgRow>) -> Result<QueryOutput, sqlx::Error> {
    Ok(QueryOutput::Row(row.as_ref().map(RowToJson::to_record).transpose()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(prepared: &Prepared<'_>) -> String {
        match prepared {
            Prepared::Text(sql) => sql.to_string(),
            Prepared::Bound { .. } => panic!("expected simple protocol statement"),
        }
    }

    #[test]
    fn test_no_params_sends_statement_unmodified() {
        let sql = "SELECT '?' ; SELECT $1";
        let prepared = prepare(sql, &[], BindMode::Native).unwrap();
        assert_eq!(text_of(&prepared), sql);
    }

    #[test]
    fn test_native_rewrites_question_marks() {
        let params = vec![QueryParam::Int(1), QueryParam::String("x".into())];
        let prepared = prepare("SELECT ? AS a, ? AS b", &params, BindMode::Native).unwrap();
        match prepared {
            Prepared::Bound { sql, params: bound } => {
                assert_eq!(sql, "SELECT $1 AS a, $2 AS b");
                assert_eq!(bound, params.as_slice());
            }
            Prepared::Text(_) => panic!("expected bound statement"),
        }
    }

    #[test]
    fn test_interpolated_renders_literals() {
        let params = vec![QueryParam::String("O'Brien".into()), QueryParam::Null];
        let prepared = prepare(
            "UPDATE t SET name = ? WHERE note IS ?",
            &params,
            BindMode::Interpolated,
        )
        .unwrap();
        assert_eq!(
            text_of(&prepared),
            "UPDATE t SET name = 'O''Brien' WHERE note IS NULL"
        );
    }

    #[test]
    fn test_param_count_mismatch_is_query_error() {
        let params = vec![QueryParam::Int(1)];
        let err = prepare("SELECT ?, ?", &params, BindMode::Native).unwrap_err();
        assert!(matches!(err, DbError::Query { .. }));
        assert!(err.to_string().contains("expects 2 parameters but 1"));
        assert_eq!(err.params().map(<[QueryParam]>::len), Some(1));
    }

    #[test]
    fn test_too_many_params_is_query_error() {
        let params = vec![QueryParam::Int(1), QueryParam::Int(2)];
        let err = prepare("SELECT $1", &params, BindMode::Native).unwrap_err();
        assert!(matches!(err, DbError::Query { .. }));
    }

    #[test]
    fn test_params_without_placeholders_is_query_error() {
        let params = vec![QueryParam::Int(1)];
        assert!(prepare("SELECT 1", &params, BindMode::Interpolated).is_err());
    }

    #[test]
    fn test_empty_statement_is_query_error() {
        let err = prepare("  \n", &[], BindMode::Native).unwrap_err();
        assert!(matches!(err, DbError::Query { .. }));
    }

    #[test]
    fn test_output_size() {
        assert_eq!(output_size(&QueryOutput::Rows(vec![Record::new(); 3])), 3);
        assert_eq!(output_size(&QueryOutput::Row(None)), 0);
        assert_eq!(output_size(&QueryOutput::Done { rows_affected: 7 }), 7);
    }
}
