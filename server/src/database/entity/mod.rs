//! Database entities.

pub mod file_upload_log;
