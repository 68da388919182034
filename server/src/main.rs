use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use csvgate_server::config;
use csvgate_server::StateInner;

/// Chunked CSV ingestion server.
#[derive(Debug, Parser)]
#[clap(version, about)]
struct Opts {
    /// Path to the config file.
    ///
    /// Defaults to $CSVGATE_SERVER_CONFIG, then ./csvgate.toml.
    #[clap(short = 'f', long)]
    config: Option<PathBuf>,

    /// Socket address to listen on.
    ///
    /// This overrides `listen` in the config.
    #[clap(short = 'l', long)]
    listen: Option<SocketAddr>,

    /// Mode to run.
    #[clap(long, default_value = "monolithic")]
    mode: ServerMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ServerMode {
    /// Run all components.
    Monolithic,

    /// Run the API server only.
    ApiServer,

    /// Run the reclamation loop only.
    Reclaimer,

    /// Run one reclamation cycle then exit.
    ReclaimOnce,

    /// Create the session log table then exit.
    DbMigrations,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::parse();
    let config = config::load_config(opts.config.as_deref()).await?;

    init_logging(config.debug);
    dump_version();

    let state = StateInner::new(config).await?;

    match opts.mode {
        ServerMode::Monolithic => {
            state.bootstrap().await?;

            if state.config.reclamation.enabled {
                tokio::spawn(csvgate_server::run_reclamation(state.clone()));
            } else {
                tracing::info!("Reclamation is disabled");
            }

            csvgate_server::run_api_server(opts.listen, state).await?;
        }
        ServerMode::ApiServer => {
            state.bootstrap().await?;
            csvgate_server::run_api_server(opts.listen, state).await?;
        }
        ServerMode::Reclaimer => {
            state.bootstrap().await?;
            csvgate_server::run_reclamation(state).await;
        }
        ServerMode::ReclaimOnce => {
            state.bootstrap().await?;
            let report = state.reclaimer.run_cycle().await;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if report.query_failed.is_some() || !report.failed.is_empty() {
                std::process::exit(1);
            }
        }
        ServerMode::DbMigrations => {
            state.log_store.ensure_schema().await?;
            eprintln!("Session log is ready.");
        }
    }

    Ok(())
}

fn init_logging(debug: bool) {
    let default = if debug {
        "info,csvgate_server=debug,csvgate=debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn dump_version() {
    #[cfg(debug_assertions)]
    eprintln!("csvgated {} (debug)", env!("CARGO_PKG_VERSION"));

    #[cfg(not(debug_assertions))]
    eprintln!("csvgated {} (release)", env!("CARGO_PKG_VERSION"));
}
