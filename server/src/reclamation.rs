//! Reclamation of finished sessions.
//!
//! Each cycle asks the log store for sessions that are finished but not
//! yet cleaned, removes their directories and marks them cleaned. The log
//! store is the only source of eligibility; directories without a
//! finished record are never touched.
//!
//! A token whose directory could not be removed is left unmarked so that
//! the next cycle picks it up again.

use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use tokio::sync::Mutex;
use tokio::time;

use crate::config::ReclamationConfig;
use crate::directory::{DirectoryStore, Removal};
use crate::error::{ServerError, ServerResult};
use crate::log_store::LogStore;
use csvgate::api::v1::reclaim::{ReclaimFailure, ReclaimResponse};
use csvgate::session::SessionToken;

/// Removes the directories of finished sessions.
#[derive(Debug)]
pub struct Reclaimer {
    directories: DirectoryStore,
    log_store: Arc<dyn LogStore>,
    config: ReclamationConfig,

    /// Keeps the scheduler and on-demand triggers from overlapping.
    cycle_lock: Mutex<()>,
}

impl Reclaimer {
    pub fn new(
        directories: DirectoryStore,
        log_store: Arc<dyn LogStore>,
        config: ReclamationConfig,
    ) -> Self {
        Self {
            directories,
            log_store,
            config,
            cycle_lock: Mutex::new(()),
        }
    }

    /// Runs cycles forever, sleeping `interval_secs` between them.
    pub async fn run_scheduler(self: Arc<Self>) {
        let interval = self.config.interval();

        tracing::info!(
            interval_secs = self.config.interval_secs,
            grace_period_secs = self.config.grace_period_secs,
            "Starting reclamation"
        );

        loop {
            self.run_cycle().await;
            time::sleep(interval).await;
        }
    }

    /// Runs a single cycle on its own task and waits for its report.
    ///
    /// The cycle completes even if the caller stops waiting.
    pub async fn spawn_cycle(self: Arc<Self>) -> ServerResult<ReclaimResponse> {
        tokio::spawn(async move { self.run_cycle().await })
            .await
            .map_err(|e| ServerError::storage_error(anyhow!("Reclamation task failed: {}", e)))
    }

    /// Runs a single reclamation cycle.
    ///
    /// Never fails as a whole: a failed stale-session query is reported in
    /// `query_failed` and every per-token failure in `failed`.
    pub async fn run_cycle(&self) -> ReclaimResponse {
        let _guard = self.cycle_lock.lock().await;
        let start = Instant::now();
        let mut report = ReclaimResponse::default();

        let tokens = match self.log_store.stale_sessions(self.config.grace_period()).await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::error!("Failed to query stale sessions: {}", e);
                report.query_failed = Some(e.to_string());
                return report;
            }
        };

        for raw in tokens {
            let token = match SessionToken::new(raw.clone()) {
                Ok(token) => token,
                Err(e) => {
                    tracing::warn!(token = %raw, "Skipping invalid session token: {}", e);
                    report.failed.push(ReclaimFailure {
                        session_token: raw,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            match self.reclaim_session(&token).await {
                Ok(Removal::Removed) => report.deleted.push(token),
                Ok(Removal::AlreadyAbsent) => report.already_absent.push(token),
                Err(e) => {
                    tracing::warn!(token = %token, "Failed to reclaim session: {}", e);
                    report.failed.push(ReclaimFailure {
                        session_token: raw,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            deleted = report.deleted.len(),
            already_absent = report.already_absent.len(),
            failed = report.failed.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Reclamation cycle completed"
        );

        report
    }

    /// Removes the directory of a session, then marks it cleaned.
    async fn reclaim_session(&self, token: &SessionToken) -> ServerResult<Removal> {
        let removal = self.directories.remove_session(token).await?;

        if removal == Removal::AlreadyAbsent {
            tracing::debug!(token = %token, "Session directory already absent");
        }

        self.log_store.record_cleanup(token).await?;
        Ok(removal)
    }
}
