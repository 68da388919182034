//! Client library for the csvgate server.

pub mod api;
pub mod chunked_upload;
pub mod size_parser;
pub mod version;
