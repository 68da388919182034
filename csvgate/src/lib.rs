//! The csvgate library.
//!
//! Types shared between the upload server and the command line client:
//! API payloads, header names, session tokens and file names.

#![deny(
    asm_sub_register,
    deprecated,
    missing_abi,
    unsafe_code,
    unused_macros,
    unused_must_use,
    unused_unsafe
)]
#![deny(clippy::from_str_radix_10, clippy::manual_range_contains)]

pub mod api;
pub mod error;
pub mod session;
