//! Common types shared across snare crates
//!
//! This crate provides the protocol-level enums (server mode, authentication
//! mechanism, authentication state) so that service crates agree on one
//! closed set of variants resolved at configuration time.

pub mod protocol;

pub use protocol::*;
