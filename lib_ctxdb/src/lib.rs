//! # lib_ctxdb
//!
//! Keeps opened database, cache and document-store connections inside an
//! immutable per-request [`Context`], so code further down a call chain can
//! fetch them by name instead of having them passed along.
//!
//! This crate does no pooling, retrying or health checking. It only remembers
//! which handle was registered under which name and closes them on request.
//!
//! ```no_run
//! # async fn demo() {
//! use lib_ctxdb::connections::cache_redis::{close_redis, open_redis, redis, CacheOptions};
//! use lib_ctxdb::{close_all_connections, Context};
//!
//! let ctx = open_redis(
//!     &Context::background(),
//!     "sessions",
//!     &CacheOptions { url: "redis://127.0.0.1/".to_string() },
//! );
//! let client = redis(&ctx, "sessions").expect("registered above");
//! # drop(client);
//! let ctx = close_redis(&ctx, "sessions").await;
//! let _clean = close_all_connections(&ctx).await;
//! # }
//! ```

pub mod context;
pub mod error;
pub mod registry;

/// Driver kinds and the close-everything aggregator.
pub mod connections;

/// Connection file loading and bootstrap.
#[cfg(feature = "configs")]
pub mod configs;

/// Helpers shared by the driver kinds.
pub mod utils;

// Re-export the pieces every caller needs
pub use connections::{close_all_connections, try_close_all_connections};
pub use context::{Context, ContextKey};
pub use error::ConnectionError;
pub use registry::{ConnectionIndex, ConnectionKind, Registry};
