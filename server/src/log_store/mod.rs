//! The session log store.
//!
//! The log store keeps one row per upload session and is the single source
//! of truth for reclamation: a session is eligible once `end_time` is set
//! and `cleanup_time` is not. The session state is never stored; it is
//! derived from those two nullable timestamps.

pub mod clickhouse;
pub mod database;

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::LogStoreConfig;
use crate::error::{ServerError, ServerResult};
use csvgate::session::SessionToken;

pub use self::clickhouse::ClickHouseLogStore;
pub use self::database::DatabaseLogStore;

/// Lifecycle state of a session as recorded by the log store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Receiving chunks, or abandoned.
    Open,

    /// Files merged (and possibly loaded); awaiting reclamation.
    Finalized,

    /// The session directory has been removed.
    Cleaned,
}

/// A row of the session log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub session_token: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub cleanup_time: Option<DateTime<Utc>>,

    /// Tables loaded from the session, parallel to `file_names`.
    pub table_names: Vec<String>,
    pub file_names: Vec<String>,
}

/// A store of session lifecycle records.
#[async_trait]
pub trait LogStore: Send + Sync + Debug {
    /// Creates the log table if it does not exist.
    async fn ensure_schema(&self) -> ServerResult<()>;

    /// Records the start of a session.
    ///
    /// Recording the same session twice leaves a single row.
    async fn record_session_start(&self, token: &SessionToken) -> ServerResult<()>;

    /// Sets `end_time` to now.
    async fn record_session_end(&self, token: &SessionToken) -> ServerResult<()>;

    /// Sets `end_time` to now along with the loaded tables and files.
    async fn record_tables_loaded(
        &self,
        token: &SessionToken,
        table_names: &[String],
        file_names: &[String],
    ) -> ServerResult<()>;

    /// Sets `cleanup_time` to now.
    async fn record_cleanup(&self, token: &SessionToken) -> ServerResult<()>;

    /// Returns the distinct tokens of finished sessions not yet cleaned up
    /// whose `end_time` is at least `grace` old.
    ///
    /// Tokens are returned as stored and may not be valid session tokens.
    async fn stale_sessions(&self, grace: Duration) -> ServerResult<Vec<String>>;

    /// Returns the record of a session.
    async fn find_session(&self, token: &SessionToken) -> ServerResult<Option<LogRecord>>;
}

impl SessionState {
    /// Derives the state from the two nullable timestamps.
    ///
    /// Returns `None` for a record that was cleaned up without ever
    /// being finished.
    pub fn from_timestamps<T>(end_time: Option<T>, cleanup_time: Option<T>) -> Option<Self> {
        match (end_time, cleanup_time) {
            (None, None) => Some(Self::Open),
            (Some(_), None) => Some(Self::Finalized),
            (Some(_), Some(_)) => Some(Self::Cleaned),
            (None, Some(_)) => None,
        }
    }

    /// Returns whether the log may move from `self` to `next`.
    ///
    /// Loading tables stamps `end_time` again, so a finalized session may
    /// be finalized once more.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Finalized)
                | (Self::Finalized, Self::Finalized)
                | (Self::Finalized, Self::Cleaned)
        )
    }
}

impl LogRecord {
    pub fn state(&self) -> ServerResult<SessionState> {
        SessionState::from_timestamps(self.end_time, self.cleanup_time).ok_or_else(|| {
            ServerError::log_store_error(anyhow!(
                "Session {} has a cleanup time but no end time",
                self.session_token
            ))
        })
    }
}

/// Checks that the recorded state of a session allows moving to `next`.
pub(crate) async fn check_transition<S>(
    store: &S,
    token: &SessionToken,
    next: SessionState,
) -> ServerResult<()>
where
    S: LogStore + ?Sized,
{
    let record = store.find_session(token).await?.ok_or_else(|| {
        ServerError::log_store_error(anyhow!("No log record for session {}", token))
    })?;

    let current = record.state()?;
    if !current.can_transition_to(next) {
        return Err(ServerError::log_store_error(anyhow!(
            "Session {} cannot move from {:?} to {:?}",
            token,
            current,
            next
        )));
    }

    Ok(())
}

/// Connects to the configured log store.
pub async fn from_config(config: &LogStoreConfig) -> ServerResult<Arc<dyn LogStore>> {
    match config {
        LogStoreConfig::ClickHouse(ch) => Ok(Arc::new(ClickHouseLogStore::new(ch)?)),
        LogStoreConfig::Database(db) => Ok(Arc::new(DatabaseLogStore::connect(&db.url).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(end: bool, cleanup: bool) -> LogRecord {
        let now = Utc::now();
        LogRecord {
            session_token: "abc".to_string(),
            start_time: now,
            end_time: end.then_some(now),
            cleanup_time: cleanup.then_some(now),
            table_names: Vec::new(),
            file_names: Vec::new(),
        }
    }

    #[test]
    fn test_state_derivation() {
        assert_eq!(record(false, false).state().unwrap(), SessionState::Open);
        assert_eq!(record(true, false).state().unwrap(), SessionState::Finalized);
        assert_eq!(record(true, true).state().unwrap(), SessionState::Cleaned);
        assert!(record(false, true).state().is_err());
    }

    #[test]
    fn test_transitions() {
        use SessionState::*;

        assert!(Open.can_transition_to(Finalized));
        assert!(Finalized.can_transition_to(Finalized));
        assert!(Finalized.can_transition_to(Cleaned));

        assert!(!Open.can_transition_to(Cleaned));
        assert!(!Cleaned.can_transition_to(Open));
        assert!(!Cleaned.can_transition_to(Finalized));
        assert!(!Finalized.can_transition_to(Open));
    }
}
