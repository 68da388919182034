#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use csvgate::session::{FileName, SessionToken};
use csvgate_server::config::Config;
use csvgate_server::error::{ServerError, ServerResult};
use csvgate_server::log_store::{DatabaseLogStore, LogRecord, LogStore};
use csvgate_server::provision::TableProvisioner;
use csvgate_server::{State, StateInner};

pub const API_TOKEN: &str = "test-token";

/// A server state over a scratch upload root and a SQLite session log.
pub struct Harness {
    pub dir: TempDir,
    pub state: State,
    pub store: Arc<DatabaseLogStore>,

    /// The log store seen by the server; can be told to fail.
    pub log: Arc<FlakyLogStore>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config("").await
    }

    /// Builds a harness, appending `extra` to the generated config.
    pub async fn with_config(extra: &str) -> Self {
        Self::build(extra, None).await
    }

    pub async fn with_provisioner(provisioner: Arc<dyn TableProvisioner>) -> Self {
        Self::build("", Some(provisioner)).await
    }

    async fn build(extra: &str, provisioner: Option<Arc<dyn TableProvisioner>>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let upload_root = dir.path().join("uploads");
        let db_url = format!("sqlite://{}?mode=rwc", dir.path().join("log.db").display());

        let config = Config::from_toml(&format!(
            r#"
api_token = "{token}"
upload_root = "{root}"

{extra}

[log_store]
type = "database"
url = "{db_url}"
"#,
            token = API_TOKEN,
            root = upload_root.display(),
            extra = extra,
            db_url = db_url,
        ))
        .unwrap();

        let store = Arc::new(DatabaseLogStore::connect(&db_url).await.unwrap());
        let log = Arc::new(FlakyLogStore::new(store.clone()));
        let log_store: Arc<dyn LogStore> = log.clone();
        let state = StateInner::with_components(config, log_store, provisioner);
        state.bootstrap().await.unwrap();

        Self {
            dir,
            state,
            store,
            log,
        }
    }

    pub fn upload_root(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }

    pub fn session_dir(&self, token: &SessionToken) -> PathBuf {
        self.state.directories.session_dir(token)
    }

    /// Creates a session holding one file.
    pub async fn create_session(&self, filename: &str, contents: &[u8]) -> SessionToken {
        self.state
            .sessions
            .create_session(&file_name(filename), contents)
            .await
            .unwrap()
    }

    /// Uploads `chunks` as chunks `1..=N` and finalizes them.
    pub async fn upload_file(&self, token: &SessionToken, filename: &str, chunks: &[&[u8]]) {
        let filename = file_name(filename);
        let total = chunks.len() as u32;

        for (i, chunk) in chunks.iter().enumerate() {
            self.state
                .sessions
                .write_chunk(token, &filename, i as u32 + 1, total, *chunk)
                .await
                .unwrap();
        }

        self.state
            .sessions
            .finalize_session(token, &filename, total)
            .await
            .unwrap();
    }

    /// Writes a file straight into a session directory.
    pub fn put_file(&self, token: &SessionToken, filename: &str, contents: &[u8]) {
        std::fs::write(self.session_dir(token).join(filename), contents).unwrap();
    }
}

pub fn file_name(name: &str) -> FileName {
    FileName::new(name.to_string()).unwrap()
}

pub fn list_dir(path: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(path)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// A provisioner that records what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingProvisioner {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl TableProvisioner for RecordingProvisioner {
    async fn drop_table(&self, table: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("drop {}", table));
        Ok(())
    }

    async fn create_table(&self, table: &str, headers: &[String]) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("create {} {}", table, headers.join(",")));
        Ok(())
    }

    async fn load_csv(&self, table: &str, path: &Path) -> Result<()> {
        let file = path.file_name().unwrap().to_string_lossy().into_owned();
        self.calls
            .lock()
            .unwrap()
            .push(format!("load {} {}", table, file));
        Ok(())
    }
}

/// A log store operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOp {
    SessionStart,
    SessionEnd,
    StaleSessions,
}

/// Wraps the SQLite log store, failing operations on request.
#[derive(Debug)]
pub struct FlakyLogStore {
    inner: Arc<DatabaseLogStore>,
    failures: Mutex<Vec<LogOp>>,
}

impl FlakyLogStore {
    pub fn new(inner: Arc<DatabaseLogStore>) -> Self {
        Self {
            inner,
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Makes the next call of `op` fail.
    pub fn fail_once(&self, op: LogOp) {
        self.failures.lock().unwrap().push(op);
    }

    fn check(&self, op: LogOp) -> ServerResult<()> {
        let mut failures = self.failures.lock().unwrap();
        match failures.iter().position(|f| *f == op) {
            Some(pos) => {
                failures.remove(pos);
                Err(ServerError::log_store_error(anyhow!("{:?} is unavailable", op)))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LogStore for FlakyLogStore {
    async fn ensure_schema(&self) -> ServerResult<()> {
        self.inner.ensure_schema().await
    }

    async fn record_session_start(&self, token: &SessionToken) -> ServerResult<()> {
        self.check(LogOp::SessionStart)?;
        self.inner.record_session_start(token).await
    }

    async fn record_session_end(&self, token: &SessionToken) -> ServerResult<()> {
        self.check(LogOp::SessionEnd)?;
        self.inner.record_session_end(token).await
    }

    async fn record_tables_loaded(
        &self,
        token: &SessionToken,
        table_names: &[String],
        file_names: &[String],
    ) -> ServerResult<()> {
        self.inner
            .record_tables_loaded(token, table_names, file_names)
            .await
    }

    async fn record_cleanup(&self, token: &SessionToken) -> ServerResult<()> {
        self.inner.record_cleanup(token).await
    }

    async fn stale_sessions(&self, grace: Duration) -> ServerResult<Vec<String>> {
        self.check(LogOp::StaleSessions)?;
        self.inner.stale_sessions(grace).await
    }

    async fn find_session(&self, token: &SessionToken) -> ServerResult<Option<LogRecord>> {
        self.inner.find_session(token).await
    }
}
