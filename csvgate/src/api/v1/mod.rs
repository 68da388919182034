//! Version 1 of the csvgate API.

pub mod group_files;
pub mod load_tables;
pub mod reclaim;
pub mod upload_chunk;
pub mod upload_session;
