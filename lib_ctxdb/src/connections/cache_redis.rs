//! # Redis Connections
//!
//! Key-value cache clients kept in a [`Context`]. A client is either a direct
//! `redis::Client` or a sentinel-backed failover client. Both are built
//! without touching the network; connections are made when the caller asks
//! the client for one.

use std::fmt;
use std::sync::Arc;

use log::info;
use redis::sentinel::{SentinelClient, SentinelServerType};
use redis::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::context::Context;
use crate::error::{fatal, ConnectionError};
use crate::registry::{ConnectionKind, Registry};
use crate::utils::url_mask::mask_url_password;

/// Options for a direct Redis client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheOptions {
    /// The redis URL (e.g., "redis://127.0.0.1/").
    pub url: String,
}

/// Options for a failover client that asks sentinels for the current master.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FailoverOptions {
    /// Service name the sentinels monitor.
    pub master_name: String,
    /// Sentinel URLs (e.g., "redis://10.0.0.1:26379").
    pub sentinel_addrs: Vec<String>,
}

/// A registered cache handle. Clones share the same client.
#[derive(Clone)]
pub enum CacheClient {
    /// A plain client bound to one server.
    Direct(Client),
    /// A sentinel client; it needs `&mut` access to resolve the master, hence the lock.
    Failover(Arc<Mutex<SentinelClient>>),
}

impl CacheClient {
    /// Whether this is a sentinel failover client.
    pub fn is_failover(&self) -> bool {
        matches!(self, CacheClient::Failover(_))
    }
}

impl fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheClient::Direct(_) => f.write_str("Direct"),
            CacheClient::Failover(_) => f.write_str("Failover"),
        }
    }
}

/// Connection kind tag for Redis.
pub struct Redis;

impl ConnectionKind for Redis {
    type Handle = CacheClient;
    const LABEL: &'static str = "redis";

    // Redis clients hold no server-side resources; releasing the registry's copy is all there is.
    async fn close(client: CacheClient) -> Result<(), ConnectionError> {
        drop(client);
        Ok(())
    }
}

/// Registry operations for Redis connections.
pub type RedisRegistry = Registry<Redis>;

/// Retrieves the client registered as `name`, or `None`.
pub fn redis(ctx: &Context, name: &str) -> Option<CacheClient> {
    RedisRegistry::lookup(ctx, name)
}

/// Returns a new context containing `client` under `name`.
pub fn with_redis(ctx: &Context, name: &str, client: CacheClient) -> Context {
    RedisRegistry::register(ctx, name, client)
}

/// Builds a direct client from `options` and registers it as `name`.
pub fn try_open_redis(
    ctx: &Context,
    name: &str,
    options: &CacheOptions,
) -> Result<Context, ConnectionError> {
    let client = Client::open(options.url.as_str())?;
    info!("Opened redis connection '{}' ({})", name, mask_url_password(&options.url));
    Ok(with_redis(ctx, name, CacheClient::Direct(client)))
}

/// Builds a direct client from `options` and registers it as `name`.
///
/// # Panics
/// If the URL is not a valid redis connection string.
pub fn open_redis(ctx: &Context, name: &str, options: &CacheOptions) -> Context {
    try_open_redis(ctx, name, options)
        .unwrap_or_else(|err| fatal("open", Redis::LABEL, name, err))
}

/// Builds a sentinel failover client from `options` and registers it as `name`.
pub fn try_open_failover_redis(
    ctx: &Context,
    name: &str,
    options: &FailoverOptions,
) -> Result<Context, ConnectionError> {
    if options.sentinel_addrs.is_empty() {
        return Err(ConnectionError::InvalidConfig(format!(
            "no sentinel addresses for redis master '{}'",
            options.master_name
        )));
    }
    let client = SentinelClient::build(
        options.sentinel_addrs.clone(),
        options.master_name.clone(),
        None,
        SentinelServerType::Master,
    )?;
    info!(
        "Opened failover redis connection '{}' (master '{}', {} sentinel(s))",
        name,
        options.master_name,
        options.sentinel_addrs.len()
    );
    Ok(with_redis(ctx, name, CacheClient::Failover(Arc::new(Mutex::new(client)))))
}

/// Builds a sentinel failover client from `options` and registers it as `name`.
///
/// # Panics
/// If no sentinel is given or a sentinel URL is invalid.
pub fn open_failover_redis(ctx: &Context, name: &str, options: &FailoverOptions) -> Context {
    try_open_failover_redis(ctx, name, options)
        .unwrap_or_else(|err| fatal("open", Redis::LABEL, name, err))
}

/// Closes the client registered as `name`. Does nothing if there is none.
///
/// `redis::Client` has no close of its own, so this only drops the
/// registry's copy and unregisters the name. Clones the caller took through
/// [`redis`] stay usable afterwards; connections made from them are released
/// when they are dropped.
pub async fn close_redis(ctx: &Context, name: &str) -> Context {
    RedisRegistry::close(ctx, name).await
}

/// Closes every registered client.
pub async fn close_redis_all(ctx: &Context) -> Context {
    RedisRegistry::close_all(ctx).await
}
