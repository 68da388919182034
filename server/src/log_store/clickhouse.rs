//! Session log kept in ClickHouse.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{check_transition, LogRecord, LogStore, SessionState};
use crate::clickhouse::{quote_identifier, quote_string, string_array, ClickHouseClient};
use crate::config::ClickHouseConfig;
use crate::error::{ServerError, ServerResult};
use csvgate::session::SessionToken;

/// Makes `ALTER TABLE … UPDATE` return only once the mutation is applied.
const MUTATION_SETTINGS: &[(&str, &str)] = &[("mutations_sync", "1")];

/// A log store backed by a ClickHouse table.
#[derive(Debug, Clone)]
pub struct ClickHouseLogStore {
    client: ClickHouseClient,
    queries: LogQueries,
}

/// Statements issued against the log table.
#[derive(Debug, Clone)]
struct LogQueries {
    table: String,
}

#[derive(Debug, Deserialize)]
struct TokenRow {
    session_token: String,
}

/// A log row with timestamps as Unix seconds.
#[derive(Debug, Deserialize)]
struct LogRow {
    session_token: String,
    start_time: i64,
    end_time: Option<i64>,
    cleanup_time: Option<i64>,
    table_names: Vec<String>,
    file_names: Vec<String>,
}

impl ClickHouseLogStore {
    pub fn new(config: &ClickHouseConfig) -> ServerResult<Self> {
        Ok(Self {
            client: ClickHouseClient::new(config)?,
            queries: LogQueries::new(&config.table),
        })
    }

    async fn mutate(&self, query: String) -> ServerResult<()> {
        self.client
            .execute_with_settings(&query, MUTATION_SETTINGS)
            .await
            .map_err(ServerError::log_store_error)?;
        Ok(())
    }
}

#[async_trait]
impl LogStore for ClickHouseLogStore {
    async fn ensure_schema(&self) -> ServerResult<()> {
        self.client
            .execute(&self.queries.create_table())
            .await
            .map_err(ServerError::log_store_error)?;

        tracing::info!(table = %self.queries.table, "Log table is ready");
        Ok(())
    }

    async fn record_session_start(&self, token: &SessionToken) -> ServerResult<()> {
        if self.find_session(token).await?.is_some() {
            tracing::debug!(session = %token, "Session already has a log record");
            return Ok(());
        }

        self.client
            .execute(&self.queries.insert_session(token))
            .await
            .map_err(ServerError::log_store_error)?;
        Ok(())
    }

    async fn record_session_end(&self, token: &SessionToken) -> ServerResult<()> {
        check_transition(self, token, SessionState::Finalized).await?;
        self.mutate(self.queries.update_end(token)).await
    }

    async fn record_tables_loaded(
        &self,
        token: &SessionToken,
        table_names: &[String],
        file_names: &[String],
    ) -> ServerResult<()> {
        check_transition(self, token, SessionState::Finalized).await?;
        self.mutate(
            self.queries
                .update_tables_loaded(token, table_names, file_names),
        )
        .await
    }

    async fn record_cleanup(&self, token: &SessionToken) -> ServerResult<()> {
        check_transition(self, token, SessionState::Cleaned).await?;
        self.mutate(self.queries.update_cleanup(token)).await
    }

    async fn stale_sessions(&self, grace: Duration) -> ServerResult<Vec<String>> {
        let rows: Vec<TokenRow> = self
            .client
            .select(&self.queries.stale_sessions(grace.as_secs()))
            .await
            .map_err(ServerError::log_store_error)?;

        Ok(rows.into_iter().map(|row| row.session_token).collect())
    }

    async fn find_session(&self, token: &SessionToken) -> ServerResult<Option<LogRecord>> {
        let rows: Vec<LogRow> = self
            .client
            .select(&self.queries.find_session(token))
            .await
            .map_err(ServerError::log_store_error)?;

        rows.into_iter().next().map(LogRecord::try_from).transpose()
    }
}

impl LogQueries {
    fn new(table: &str) -> Self {
        Self {
            table: quote_identifier(table),
        }
    }

    fn create_table(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             session_token String, \
             start_time DateTime DEFAULT now(), \
             end_time Nullable(DateTime), \
             cleanup_time Nullable(DateTime), \
             table_names Array(String), \
             file_names Array(String)\
             ) ENGINE = MergeTree() ORDER BY (session_token)",
            self.table
        )
    }

    fn insert_session(&self, token: &SessionToken) -> String {
        format!(
            "INSERT INTO {} (session_token, start_time, table_names, file_names) \
             VALUES ({}, now(), [], [])",
            self.table,
            quote_string(token.as_str())
        )
    }

    fn update_end(&self, token: &SessionToken) -> String {
        format!(
            "ALTER TABLE {} UPDATE end_time = now() WHERE session_token = {}",
            self.table,
            quote_string(token.as_str())
        )
    }

    fn update_tables_loaded(
        &self,
        token: &SessionToken,
        table_names: &[String],
        file_names: &[String],
    ) -> String {
        format!(
            "ALTER TABLE {} UPDATE end_time = now(), table_names = {}, file_names = {} \
             WHERE session_token = {}",
            self.table,
            string_array(table_names),
            string_array(file_names),
            quote_string(token.as_str())
        )
    }

    fn update_cleanup(&self, token: &SessionToken) -> String {
        format!(
            "ALTER TABLE {} UPDATE cleanup_time = now() WHERE session_token = {}",
            self.table,
            quote_string(token.as_str())
        )
    }

    fn stale_sessions(&self, grace_secs: u64) -> String {
        format!(
            "SELECT DISTINCT session_token FROM {} \
             WHERE end_time IS NOT NULL AND cleanup_time IS NULL \
             AND end_time <= now() - INTERVAL {} SECOND",
            self.table, grace_secs
        )
    }

    fn find_session(&self, token: &SessionToken) -> String {
        format!(
            "SELECT session_token, \
             toUnixTimestamp(start_time) AS start_time, \
             toUnixTimestamp(end_time) AS end_time, \
             toUnixTimestamp(cleanup_time) AS cleanup_time, \
             table_names, file_names \
             FROM {} WHERE session_token = {} LIMIT 1",
            self.table,
            quote_string(token.as_str())
        )
    }
}

fn timestamp(secs: i64) -> ServerResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| ServerError::log_store_error(anyhow!("Timestamp {} is out of range", secs)))
}

impl TryFrom<LogRow> for LogRecord {
    type Error = ServerError;

    fn try_from(row: LogRow) -> ServerResult<Self> {
        Ok(Self {
            session_token: row.session_token,
            start_time: timestamp(row.start_time)?,
            end_time: row.end_time.map(timestamp).transpose()?,
            cleanup_time: row.cleanup_time.map(timestamp).transpose()?,
            table_names: row.table_names,
            file_names: row.file_names,
        })
    }
}
