//! Grouping of session files by header row.
//!
//! Every data file of a session is parsed to extract its header row and
//! count its data rows. Files are then partitioned by exact, order-sensitive
//! equality of their header rows. Parsing runs on the blocking pool with at
//! most `workers` files in flight.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Result};
use csv::{ReaderBuilder, StringRecord};
use futures::stream::{self, StreamExt};

use crate::config::GroupingConfig;
use crate::directory::DirectoryStore;
use crate::error::{ErrorKind, ServerResult};
use csvgate::api::v1::group_files::{FileFailure, FileGroup, GroupFilesResponse};
use csvgate::session::SessionToken;

const UTF8_BOM: char = '\u{feff}';

/// The header row and data row count of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSignature {
    pub headers: Vec<String>,
    pub row_count: u64,
}

/// Groups the files of a session.
#[derive(Debug, Clone)]
pub struct GroupingEngine {
    directories: DirectoryStore,
    config: GroupingConfig,
}

impl GroupingEngine {
    pub fn new(directories: DirectoryStore, config: GroupingConfig) -> Self {
        Self {
            directories,
            config,
        }
    }

    /// Partitions the data files of a session by header row.
    ///
    /// Files that cannot be parsed are reported in `failures` and left out
    /// of every group. Groups are named `filegroup_1`, `filegroup_2`, ... in
    /// the order their first member finished parsing.
    pub async fn group_files(&self, token: &SessionToken) -> ServerResult<GroupFilesResponse> {
        if !self.directories.session_exists(token).await? {
            return Err(ErrorKind::NoSuchSession.into());
        }

        let files = self
            .directories
            .list_files(token, &self.config.file_suffix)
            .await?;

        if files.is_empty() {
            tracing::warn!(session = %token, "No files to group");
            return Err(ErrorKind::NoFilesFoundError(format!(
                "no {} files in session {}",
                self.config.file_suffix, token
            ))
            .into());
        }

        let session_dir = self.directories.session_dir(token);
        let mut results = stream::iter(files)
            .map(|file| {
                let path = session_dir.join(&file);
                async move {
                    let signature = match tokio::task::spawn_blocking(move || read_signature(&path))
                        .await
                    {
                        Ok(result) => result,
                        Err(e) => Err(anyhow!("Worker failed: {}", e)),
                    };
                    (file, signature)
                }
            })
            .buffer_unordered(self.config.workers.max(1));

        let mut groups: Vec<FileGroup> = Vec::new();
        let mut index: HashMap<Vec<String>, usize> = HashMap::new();
        let mut failures = Vec::new();

        while let Some((file, signature)) = results.next().await {
            match signature {
                Ok(HeaderSignature { headers, row_count }) => {
                    tracing::debug!(session = %token, file = %file, rows = row_count, "Extracted headers");

                    let i = *index.entry(headers.clone()).or_insert_with(|| {
                        groups.push(FileGroup {
                            group: format!("filegroup_{}", groups.len() + 1),
                            files: Vec::new(),
                            headers,
                            total_row_count: 0,
                        });
                        groups.len() - 1
                    });

                    groups[i].files.push(file);
                    groups[i].total_row_count += row_count;
                }
                Err(e) => {
                    tracing::error!(session = %token, file = %file, "Failed to read headers: {:#}", e);
                    failures.push(FileFailure {
                        file,
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        for group in groups.iter_mut() {
            group.files.sort();
        }
        failures.sort_by(|a, b| a.file.cmp(&b.file));

        tracing::info!(
            session = %token,
            groups = groups.len(),
            failures = failures.len(),
            "Grouped files"
        );

        Ok(GroupFilesResponse { groups, failures })
    }
}

/// Reads the header row of a CSV file and counts the records after it.
///
/// Leading byte order marks are stripped from the header names. Records
/// may have a different number of fields than the header row.
pub fn read_signature(path: &Path) -> Result<HeaderSignature> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches(UTF8_BOM).to_owned())
        .collect();

    if headers.is_empty() {
        return Err(anyhow!("File has no header row"));
    }

    let mut record = StringRecord::new();
    let mut row_count = 0;
    while reader.read_record(&mut record)? {
        row_count += 1;
    }

    Ok(HeaderSignature { headers, row_count })
}
