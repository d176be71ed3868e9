//! Postgres Query Executor - command line entry point.
//!
//! Runs one statement against the database named by `POSTGRES_URL` and
//! prints the result as JSON on stdout.

use clap::Parser;
use pg_query_executor::config::Config;
use pg_query_executor::db::QueryExecutor;
use pg_query_executor::error::{DbError, DbResult};
use pg_query_executor::models::QueryOutput;
use std::io::Write;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr so stdout carries only the result.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(config: &Config) -> DbResult<QueryOutput> {
    let db_config = config.database_config()?;
    let executor = QueryExecutor::new(db_config);

    let result = executor.run(&config.query_spec()).await;
    executor.shutdown().await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine; the environment may already be set
    let _ = dotenvy::dotenv();

    let config = Config::parse();
    init_tracing(&config);

    info!("Starting pg-query-executor v{}", env!("CARGO_PKG_VERSION"));

    let output = run(&config).await.and_then(|output| {
        serde_json::to_string_pretty(&output.to_json())
            .map_err(|e| DbError::internal(format!("Failed to serialize result: {}", e)))
    });

    match output {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            let _ = report_failure(&mut std::io::stderr(), &e);
            ExitCode::FAILURE
        }
    }
}

/// Write the error and its hint for the user.
fn report_failure(out: &mut impl Write, err: &DbError) -> std::io::Result<()> {
    writeln!(out, "Error: {}", err)?;
    if let Some(suggestion) = err.suggestion() {
        writeln!(out, "Hint: {}", suggestion)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_failure_includes_hint() {
        let err = DbError::configuration("POSTGRES_URL is not set", "Pass --url");
        let mut out = Vec::new();
        report_failure(&mut out, &err).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "Error: Configuration error: POSTGRES_URL is not set\nHint: Pass --url\n"
        );
    }
}
