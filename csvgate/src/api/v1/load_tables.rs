use serde::{Deserialize, Serialize};

use crate::session::{FileName, SessionToken};

/// Request to provision one table per group and load its files.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoadTablesRequest {
    pub session_token: SessionToken,
    pub groups: Vec<TableGroup>,
}

/// A group to be turned into a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableGroup {
    /// Name of the group, used as the table name.
    pub group: String,

    /// Files to load into the table.
    pub files: Vec<FileName>,

    /// Column names of the table.
    pub headers: Vec<String>,
}

/// Response from loading tables.
///
/// `tables` and `files` are parallel: `files[i]` was loaded into `tables[i]`.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoadTablesResponse {
    pub tables: Vec<String>,
    pub files: Vec<String>,
}
