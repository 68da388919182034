//! SQL schema of the session log.

pub mod entity;
pub mod migration;
