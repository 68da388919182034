use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use indicatif::MultiProgress;

use csvgate::api::v1::load_tables::{LoadTablesRequest, TableGroup};
use csvgate::session::{FileName, SessionToken};
use csvgate_client::api::ApiClient;
use csvgate_client::chunked_upload::{
    make_progress_bar, upload_file, UploadConfig, DEFAULT_JOBS,
};
use csvgate_client::size_parser::parse_nonzero_size;

/// Uploads CSV files to a csvgate server.
#[derive(Debug, Parser)]
#[clap(version, about)]
struct Opts {
    /// Base URL of the server.
    #[clap(long, env = "CSVGATE_ENDPOINT", default_value = "http://localhost:8080")]
    endpoint: String,

    /// API token.
    #[clap(long, env = "CSVGATE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload files into a session.
    Upload {
        /// Files to upload.
        #[clap(required = true)]
        files: Vec<PathBuf>,

        /// Add the files to an existing session.
        #[clap(long)]
        session: Option<SessionToken>,

        /// Size of each chunk, such as 8MiB.
        #[clap(long, default_value = "8MiB", value_parser = parse_nonzero_size)]
        chunk_size: u64,

        /// Number of chunks uploaded at once.
        #[clap(short = 'j', long, default_value_t = DEFAULT_JOBS)]
        jobs: usize,
    },

    /// Group the files of a session by header row.
    Group {
        session: SessionToken,
    },

    /// Group the files of a session and load each group into a table.
    Load {
        session: SessionToken,
    },

    /// Run a reclamation cycle on the server.
    Reclaim,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::parse();
    let api = ApiClient::new(&opts.endpoint, opts.token.as_deref())?;

    match opts.command {
        Command::Upload {
            files,
            session,
            chunk_size,
            jobs,
        } => {
            let config = UploadConfig {
                chunk_size,
                jobs,
                ..Default::default()
            };
            upload(&api, &files, session, &config).await
        }
        Command::Group { session } => {
            let response = api.group_files(&session).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Command::Load { session } => load(&api, session).await,
        Command::Reclaim => {
            let response = api.reclaim().await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
    }
}

async fn upload(
    api: &ApiClient,
    files: &[PathBuf],
    mut session: Option<SessionToken>,
    config: &UploadConfig,
) -> Result<()> {
    let mp = MultiProgress::new();

    // Files go one after another so that the first one can open the session
    for path in files {
        let name = path.display().to_string();
        let pb = make_progress_bar(&mp, &name)?;

        let outcome = upload_file(api, path, session.as_ref(), config, &pb).await?;
        pb.finish();

        session.get_or_insert(outcome.session_token);
    }

    match session {
        Some(token) => {
            eprintln!("✅ Uploaded {} file(s)", files.len());
            println!("{}", token);
            Ok(())
        }
        None => Err(anyhow!("No files were uploaded")),
    }
}

async fn load(api: &ApiClient, session: SessionToken) -> Result<()> {
    let grouped = api.group_files(&session).await?;

    for failure in &grouped.failures {
        eprintln!("⚠️ Skipping {}: {}", failure.file, failure.error);
    }

    let groups = grouped
        .groups
        .into_iter()
        .map(|group| -> Result<TableGroup> {
            let files = group
                .files
                .into_iter()
                .map(FileName::new)
                .collect::<Result<Vec<_>, _>>()?;

            Ok(TableGroup {
                group: group.group,
                files,
                headers: group.headers,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let response = api
        .load_tables(&LoadTablesRequest {
            session_token: session,
            groups,
        })
        .await?;

    for (table, file) in response.tables.iter().zip(response.files.iter()) {
        eprintln!("✅ Loaded {} into {}", file, table);
    }

    Ok(())
}
