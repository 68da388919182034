//! Table provisioning and bulk load.
//!
//! Each group of files becomes one table whose columns are the group's
//! headers, all typed as strings. The table is dropped and recreated on
//! every load, then each member file is streamed into it as CSV.

use std::collections::HashSet;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Body;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::clickhouse::{quote_identifier, ClickHouseClient};
use crate::config::ClickHouseConfig;
use crate::directory::DirectoryStore;
use crate::error::{ErrorKind, ServerError, ServerResult};
use crate::log_store::LogStore;
use csvgate::api::v1::load_tables::{LoadTablesResponse, TableGroup};
use csvgate::session::SessionToken;

const UTF8_BOM: char = '\u{feff}';

/// A store that tables can be created in and loaded into.
#[async_trait]
pub trait TableProvisioner: Send + Sync + Debug {
    async fn drop_table(&self, table: &str) -> Result<()>;

    /// Creates a table with one string column per header.
    async fn create_table(&self, table: &str, headers: &[String]) -> Result<()>;

    /// Loads a CSV file with a header row into a table.
    async fn load_csv(&self, table: &str, path: &Path) -> Result<()>;
}

/// Provisions tables in ClickHouse.
#[derive(Debug)]
pub struct ClickHouseProvisioner {
    client: ClickHouseClient,
}

impl ClickHouseProvisioner {
    pub fn new(config: &ClickHouseConfig) -> ServerResult<Self> {
        Ok(Self {
            client: ClickHouseClient::new(config)?,
        })
    }
}

#[async_trait]
impl TableProvisioner for ClickHouseProvisioner {
    async fn drop_table(&self, table: &str) -> Result<()> {
        self.client.execute(&drop_table_query(table)).await?;
        Ok(())
    }

    async fn create_table(&self, table: &str, headers: &[String]) -> Result<()> {
        self.client
            .execute(&create_table_query(table, headers))
            .await?;
        Ok(())
    }

    async fn load_csv(&self, table: &str, path: &Path) -> Result<()> {
        let file = File::open(path)
            .await
            .map_err(|e| anyhow!("Failed to open {}: {}", path.display(), e))?;

        let body = Body::wrap_stream(ReaderStream::new(file));
        self.client.insert_stream(&insert_csv_query(table), body).await
    }
}

pub fn drop_table_query(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_identifier(table))
}

pub fn create_table_query(table: &str, headers: &[String]) -> String {
    let columns: Vec<String> = headers
        .iter()
        .map(|h| format!("{} String", quote_identifier(h)))
        .collect();

    format!(
        "CREATE TABLE {} ({}) ENGINE = MergeTree() ORDER BY tuple()",
        quote_identifier(table),
        columns.join(", ")
    )
}

pub fn insert_csv_query(table: &str) -> String {
    format!("INSERT INTO {} FORMAT CSVWithNames", quote_identifier(table))
}

/// Strips byte order marks from headers and checks they can name columns.
pub fn clean_headers(headers: &[String]) -> Result<Vec<String>> {
    if headers.is_empty() {
        return Err(anyhow!("A table needs at least one column"));
    }

    let mut seen = HashSet::new();
    let mut cleaned = Vec::with_capacity(headers.len());

    for header in headers {
        let header = header.trim_start_matches(UTF8_BOM);

        if header.is_empty() {
            return Err(anyhow!("Column names must not be empty"));
        }

        if !seen.insert(header) {
            return Err(anyhow!("Duplicate column {:?}", header));
        }

        cleaned.push(header.to_owned());
    }

    Ok(cleaned)
}

/// Creates one table per group, loads its files and records the result.
///
/// Every file is checked for existence before any table is touched. A file
/// listed in several groups is recorded against the first table it was
/// loaded into.
pub async fn load_tables(
    directories: &DirectoryStore,
    provisioner: &Arc<dyn TableProvisioner>,
    log_store: &Arc<dyn LogStore>,
    token: &SessionToken,
    groups: &[TableGroup],
) -> ServerResult<LoadTablesResponse> {
    if !directories.session_exists(token).await? {
        return Err(ErrorKind::NoSuchSession.into());
    }

    if groups.is_empty() {
        return Err(ServerError::request_error(anyhow!("No groups to load")));
    }

    let mut plan = Vec::with_capacity(groups.len());
    for group in groups {
        if group.group.is_empty() {
            return Err(ServerError::request_error(anyhow!(
                "Group names must not be empty"
            )));
        }

        let headers = clean_headers(&group.headers).map_err(|e| {
            ServerError::request_error(anyhow!("Group {}: {}", group.group, e))
        })?;

        for file in &group.files {
            let path = directories.file_path(token, file);
            let exists = tokio::fs::try_exists(&path)
                .await
                .map_err(ServerError::storage_error)?;

            if !exists {
                tracing::warn!(session = %token, file = %file, "File to load is missing");
                return Err(ErrorKind::NoFilesFoundError(format!("file not found: {}", file)).into());
            }
        }

        plan.push((group, headers));
    }

    let mut tables = Vec::new();
    let mut files: Vec<String> = Vec::new();

    for (group, headers) in plan {
        let table = group.group.as_str();

        provisioner
            .drop_table(table)
            .await
            .map_err(ServerError::provisioning_error)?;
        provisioner
            .create_table(table, &headers)
            .await
            .map_err(ServerError::provisioning_error)?;

        tracing::info!(session = %token, table, columns = headers.len(), "Created table");

        for file in &group.files {
            let path = directories.file_path(token, file);
            provisioner.load_csv(table, &path).await.map_err(|e| {
                ServerError::provisioning_error(anyhow!("Failed to load {}: {:#}", file, e))
            })?;

            tracing::info!(session = %token, table, file = %file, "Loaded file");

            if !files.iter().any(|f| f == file.as_str()) {
                tables.push(table.to_owned());
                files.push(file.to_string());
            }
        }
    }

    log_store.record_tables_loaded(token, &tables, &files).await?;

    Ok(LoadTablesResponse { tables, files })
}
