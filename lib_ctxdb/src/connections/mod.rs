//! # Connections Module
//!
//! The three driver kinds that can be kept in a context, each behind its own
//! feature, plus [`close_all_connections`], which releases all of them.

/// Relational connections on the sqlx `Any` driver.
#[cfg(feature = "sql")]
pub mod db_sql;

/// Redis clients, direct or sentinel failover.
#[cfg(feature = "redis")]
pub mod cache_redis;

/// MongoDB clients.
#[cfg(feature = "mongo")]
pub mod doc_mongo;

use crate::context::Context;
use crate::error::ConnectionError;

/// Closes every registered connection of every kind and returns a context
/// without them. Kinds are closed in a fixed order: sql, redis, mongo.
///
/// # Panics
/// On the first driver close failure.
pub async fn close_all_connections(ctx: &Context) -> Context {
    let ctx = ctx.clone();
    #[cfg(feature = "sql")]
    let ctx = db_sql::close_sql_all(&ctx).await;
    #[cfg(feature = "redis")]
    let ctx = cache_redis::close_redis_all(&ctx).await;
    #[cfg(feature = "mongo")]
    let ctx = doc_mongo::close_mongo_all(&ctx).await;
    ctx
}

/// Like [`close_all_connections`], but returns the first close error instead
/// of panicking. Kinds before the failing one are already closed.
pub async fn try_close_all_connections(ctx: &Context) -> Result<Context, ConnectionError> {
    let ctx = ctx.clone();
    #[cfg(feature = "sql")]
    let ctx = db_sql::SqlRegistry::try_close_all(&ctx).await?;
    #[cfg(feature = "redis")]
    let ctx = cache_redis::RedisRegistry::try_close_all(&ctx).await?;
    #[cfg(feature = "mongo")]
    let ctx = doc_mongo::MongoRegistry::try_close_all(&ctx).await?;
    Ok(ctx)
}
