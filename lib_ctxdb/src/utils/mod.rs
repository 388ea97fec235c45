//! # Utilities Module
//!
//! Small helpers shared by the connection kinds.

/// Hides credentials in connection URLs before they reach a log line.
pub mod url_mask;
