//! # Configuration Modules
//!
//! Loading connection descriptions and opening them into a context.

/// Connection file parsing and the `open_all` bootstrap.
pub mod config_connections;
