#![deny(
    asm_sub_register,
    deprecated,
    missing_abi,
    unsafe_code,
    unused_macros,
    unused_must_use,
    unused_unsafe
)]
#![deny(clippy::from_over_into, clippy::needless_question_mark)]
#![cfg_attr(
    not(debug_assertions),
    deny(unused_imports, unused_mut, unused_variables,)
)]

pub mod api;
pub mod chunked_session;
pub mod clickhouse;
pub mod config;
pub mod database;
pub mod directory;
pub mod error;
pub mod grouping;
pub mod log_store;
mod middleware;
pub mod provision;
pub mod reclamation;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{extract::Extension, Router};
use tokio::net::TcpListener;

use chunked_session::ChunkedSessionManager;
use config::Config;
use directory::DirectoryStore;
use error::ServerResult;
use grouping::GroupingEngine;
use log_store::LogStore;
use provision::{ClickHouseProvisioner, TableProvisioner};
use reclamation::Reclaimer;

pub type State = Arc<StateInner>;

/// Global server state.
#[derive(Debug)]
pub struct StateInner {
    /// The server configuration.
    pub config: Config,

    /// The upload directory tree.
    pub directories: DirectoryStore,

    /// The session log.
    pub log_store: Arc<dyn LogStore>,

    pub sessions: ChunkedSessionManager,
    pub grouping: GroupingEngine,
    pub reclaimer: Arc<Reclaimer>,

    /// Target of load-tables, if configured.
    pub provisioner: Option<Arc<dyn TableProvisioner>>,
}

impl StateInner {
    /// Connects to the configured log store and provisioning target.
    pub async fn new(config: Config) -> ServerResult<State> {
        let log_store = log_store::from_config(&config.log_store).await?;

        let provisioner = match &config.provisioning {
            Some(target) => {
                let provisioner: Arc<dyn TableProvisioner> =
                    Arc::new(ClickHouseProvisioner::new(target)?);
                Some(provisioner)
            }
            None => None,
        };

        Ok(Self::with_components(config, log_store, provisioner))
    }

    /// Assembles the state from already constructed backends.
    pub fn with_components(
        config: Config,
        log_store: Arc<dyn LogStore>,
        provisioner: Option<Arc<dyn TableProvisioner>>,
    ) -> State {
        let directories = DirectoryStore::new(
            config.upload_root.clone(),
            config.chunked_upload.chunk_subdir.clone(),
        );

        let sessions = ChunkedSessionManager::new(
            directories.clone(),
            log_store.clone(),
            config.chunked_upload.clone(),
        );
        let grouping = GroupingEngine::new(directories.clone(), config.grouping.clone());
        let reclaimer = Arc::new(Reclaimer::new(
            directories.clone(),
            log_store.clone(),
            config.reclamation.clone(),
        ));

        Arc::new(Self {
            config,
            directories,
            log_store,
            sessions,
            grouping,
            reclaimer,
            provisioner,
        })
    }

    /// Creates the upload root and the log table if they are missing.
    pub async fn bootstrap(&self) -> ServerResult<()> {
        self.directories.ensure_root().await?;
        self.log_store.ensure_schema().await?;
        Ok(())
    }
}

/// Returns the application router.
pub fn router(state: State) -> Router {
    api::get_router()
        .layer(axum::middleware::from_fn(middleware::require_api_token))
        .layer(Extension(state))
}

/// Runs the API server.
pub async fn run_api_server(cli_listen: Option<SocketAddr>, state: State) -> Result<()> {
    let listen = cli_listen.unwrap_or(state.config.listen);

    let listener = TcpListener::bind(&listen).await?;
    tracing::info!("Listening on {:?}...", listener.local_addr()?);

    serve(listener, state, shutdown_signal()).await
}

/// Serves the API on a bound listener until `shutdown` completes.
pub async fn serve<F>(listener: TcpListener, state: State, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Runs the reclamation loop until the process exits.
pub async fn run_reclamation(state: State) {
    state.reclaimer.clone().run_scheduler().await;
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutting down");
}
