use serde::{Deserialize, Serialize};

/// Files of a session partitioned by their header row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupFilesResponse {
    /// Groups of files sharing the exact same header sequence.
    ///
    /// Group names depend on the order in which files finished
    /// processing and are not stable across calls.
    pub groups: Vec<FileGroup>,

    /// Files that could not be read or parsed.
    pub failures: Vec<FileFailure>,
}

/// A set of files with identical headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileGroup {
    /// Name of the group, such as `filegroup_1`.
    pub group: String,

    /// Member files.
    pub files: Vec<String>,

    /// The shared header row.
    pub headers: Vec<String>,

    /// Number of data rows across all member files.
    pub total_row_count: u64,
}

/// A file excluded from grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub file: String,
    pub error: String,
}
