//! # Connection Configuration
//!
//! Describes the named connections an application wants in its context and
//! opens all of them in one call.
//!
//! The file is JSON5 (plain JSON works too):
//!
//! ```json5
//! {
//!   sql:   [{ name: "main", driver: "postgres", dataSource: "postgres://u:p@host/db" }],
//!   redis: [{ name: "cache", url: "redis://127.0.0.1/" },
//!           { name: "ha", failover: { masterName: "mymaster", sentinelAddrs: ["redis://s1:26379"] } }],
//!   mongo: [{ name: "docs", url: "mongodb://127.0.0.1:27017" }],
//! }
//! ```

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::connections::cache_redis::{self, CacheClient, CacheOptions, FailoverOptions, Redis};
use crate::connections::db_sql::{self, Sql};
use crate::connections::doc_mongo::{self, Mongo};
use crate::context::Context;
use crate::error::ConnectionError;
use crate::registry::{ConnectionKind, Registry};

/// Environment variable holding the path of the connection file.
pub const CONFIG_PATH_ENV: &str = "CTXDB_CONFIG";

const CONFIG_DEFAULT_NAME: &str = "connections.json5";

#[derive(Debug, Error)]
pub enum ConnectionsConfigError {
    #[error("I/O error occurred reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON5 parse error: {0}")]
    Json5Error(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Duplicate {kind} connection name '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Invalid {kind} connection '{name}': {reason}")]
    InvalidEntry {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("Failed to open connection: {0}")]
    Connection(#[from] ConnectionError),
}

fn enabled_default() -> bool {
    true
}

/// A relational connection entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SqlEntry {
    pub name: String,
    /// Backend name (`postgres`, `sqlite`, ...).
    pub driver: String,
    pub data_source: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

/// A redis entry: exactly one of `url` or `failover` must be set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RedisEntry {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub failover: Option<FailoverOptions>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

/// A document-store entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MongoEntry {
    pub name: String,
    pub url: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

/// Every connection an application wants opened, grouped by kind.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsConfig {
    #[serde(default)]
    pub sql: Vec<SqlEntry>,
    #[serde(default)]
    pub redis: Vec<RedisEntry>,
    #[serde(default)]
    pub mongo: Vec<MongoEntry>,
}

// Tracks what `open_all` has opened so far, for rollback, together with the
// handle each name resolved to before it was overwritten.
enum Opened {
    Sql(String, Option<sqlx::AnyPool>),
    Redis(String, Option<CacheClient>),
    Mongo(String, Option<mongodb::Client>),
}

impl ConnectionsConfig {
    /// Parses and validates a JSON5 document.
    pub fn from_json5_str(text: &str) -> Result<Self, ConnectionsConfigError> {
        let config: Self =
            json5::from_str(text).map_err(|e| ConnectionsConfigError::Json5Error(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a section out of an already loaded JSON value, e.g. a cloud config.
    pub fn from_value(value: &Value) -> Result<Self, ConnectionsConfigError> {
        let config = Self::deserialize(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates the JSON5 file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConnectionsConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConnectionsConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json5_str(&text)
    }

    /// Loads the file named by `CTXDB_CONFIG`, or `connections.json5` next to
    /// the running executable.
    pub fn load_default() -> Result<Self, ConnectionsConfigError> {
        Self::from_file(default_path()?)
    }

    /// Total number of enabled entries.
    pub fn enabled_count(&self) -> usize {
        self.sql.iter().filter(|e| e.enabled).count()
            + self.redis.iter().filter(|e| e.enabled).count()
            + self.mongo.iter().filter(|e| e.enabled).count()
    }

    /// Rejects duplicate names within a kind and redis entries that are not
    /// exactly one of direct or failover.
    pub fn validate(&self) -> Result<(), ConnectionsConfigError> {
        unique_names("sql", self.sql.iter().map(|e| e.name.as_str()))?;
        unique_names("redis", self.redis.iter().map(|e| e.name.as_str()))?;
        unique_names("mongo", self.mongo.iter().map(|e| e.name.as_str()))?;

        for entry in &self.redis {
            if entry.url.is_some() == entry.failover.is_some() {
                return Err(ConnectionsConfigError::InvalidEntry {
                    kind: "redis",
                    name: entry.name.clone(),
                    reason: "exactly one of `url` or `failover` must be set".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn unique_names<'a>(
    kind: &'static str,
    names: impl Iterator<Item = &'a str>,
) -> Result<(), ConnectionsConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConnectionsConfigError::DuplicateName {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

fn default_path() -> Result<PathBuf, ConnectionsConfigError> {
    if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }
    let exe = env::current_exe().map_err(|source| ConnectionsConfigError::IoError {
        path: PathBuf::from(CONFIG_DEFAULT_NAME),
        source,
    })?;
    let dir = exe.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    Ok(dir.join(CONFIG_DEFAULT_NAME))
}

/// Opens every enabled entry of `config` into a context derived from `ctx`,
/// kinds in the order sql, redis, mongo.
///
/// On the first failure the connections opened by this call are closed again
/// and the error is returned. Connections already registered in `ctx` are
/// left alone: an entry that shadowed one of them puts the earlier handle
/// back into the shared index, so `ctx` sees the same names as before.
pub async fn open_all(ctx: &Context, config: &ConnectionsConfig) -> Result<Context, ConnectionsConfigError> {
    config.validate()?;

    let mut opened = Vec::new();
    match open_entries(ctx.clone(), config, &mut opened).await {
        Ok(ctx) => {
            info!("Opened {} configured connection(s)", opened.len());
            Ok(ctx)
        }
        Err((partial, err)) => {
            rollback(partial, opened).await;
            Err(err.into())
        }
    }
}

async fn open_entries(
    mut ctx: Context,
    config: &ConnectionsConfig,
    opened: &mut Vec<Opened>,
) -> Result<Context, (Context, ConnectionError)> {
    for entry in config.sql.iter().filter(|e| e.enabled) {
        let previous = db_sql::sql(&ctx, &entry.name);
        ctx = match db_sql::try_open_sql(&ctx, &entry.name, &entry.driver, &entry.data_source) {
            Ok(next) => next,
            Err(err) => return Err((ctx, err)),
        };
        opened.push(Opened::Sql(entry.name.clone(), previous));
    }

    for entry in config.redis.iter().filter(|e| e.enabled) {
        let previous = cache_redis::redis(&ctx, &entry.name);
        let res = match (&entry.url, &entry.failover) {
            (Some(url), _) => cache_redis::try_open_redis(&ctx, &entry.name, &CacheOptions { url: url.clone() }),
            (None, Some(failover)) => cache_redis::try_open_failover_redis(&ctx, &entry.name, failover),
            (None, None) => Err(ConnectionError::InvalidConfig(format!(
                "redis connection '{}' has neither url nor failover",
                entry.name
            ))),
        };
        ctx = match res {
            Ok(next) => next,
            Err(err) => return Err((ctx, err)),
        };
        opened.push(Opened::Redis(entry.name.clone(), previous));
    }

    for entry in config.mongo.iter().filter(|e| e.enabled) {
        let previous = doc_mongo::mongo(&ctx, &entry.name);
        ctx = match doc_mongo::try_open_mongo(&ctx, &entry.name, &entry.url).await {
            Ok(next) => next,
            Err(err) => return Err((ctx, err)),
        };
        opened.push(Opened::Mongo(entry.name.clone(), previous));
    }

    Ok(ctx)
}

async fn rollback(mut ctx: Context, opened: Vec<Opened>) {
    for item in opened {
        ctx = match item {
            Opened::Sql(name, previous) => undo::<Sql>(ctx, &name, previous).await,
            Opened::Redis(name, previous) => undo::<Redis>(ctx, &name, previous).await,
            Opened::Mongo(name, previous) => undo::<Mongo>(ctx, &name, previous).await,
        };
    }
}

async fn undo<K: ConnectionKind>(ctx: Context, name: &str, previous: Option<K::Handle>) -> Context {
    match Registry::<K>::try_close(&ctx, name).await {
        Ok(next) => match previous {
            Some(handle) => {
                debug!("Restoring earlier {} connection '{}'", K::LABEL, name);
                Registry::<K>::register(&next, name, handle)
            }
            None => next,
        },
        Err(err) => {
            warn!("Rollback could not close {} connection '{}': {}", K::LABEL, name, err);
            ctx
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::cache_redis::redis;
    use crate::connections::db_sql::{sql, SqlRegistry};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"{
        // comments are allowed
        sql: [
            { name: "main", driver: "sqlite", dataSource: "sqlite::memory:" },
            { name: "off", driver: "postgres", dataSource: "localhost/app", enabled: false },
        ],
        redis: [
            { name: "cache", url: "redis://127.0.0.1/" },
            { name: "ha", failover: { masterName: "mymaster", sentinelAddrs: ["redis://127.0.0.1:26379"] } },
        ],
    }"#;

    #[test]
    fn test_parse_json5() {
        let config = ConnectionsConfig::from_json5_str(SAMPLE).unwrap();
        assert_eq!(config.sql.len(), 2);
        assert!(!config.sql[1].enabled);
        assert_eq!(config.sql[0].data_source, "sqlite::memory:");
        assert_eq!(
            config.redis[1].failover.as_ref().map(|f| f.master_name.as_str()),
            Some("mymaster")
        );
        assert!(config.mongo.is_empty());
        assert_eq!(config.enabled_count(), 3);
    }

    #[test]
    fn test_from_value_reads_cloud_section() {
        let cloud = serde_json::json!({
            "connections": {
                "mongo": [{ "name": "docs", "url": "mongodb://127.0.0.1:27017" }]
            }
        });
        let section = cloud.pointer("/connections").expect("section present");
        let config = ConnectionsConfig::from_value(section).unwrap();
        assert_eq!(config.mongo[0].name, "docs");
        assert!(config.mongo[0].enabled);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let text = r#"{ sql: [
            { name: "a", driver: "sqlite", dataSource: "sqlite::memory:" },
            { name: "a", driver: "sqlite", dataSource: "sqlite::memory:" },
        ] }"#;
        let err = ConnectionsConfig::from_json5_str(text).unwrap_err();
        assert!(matches!(err, ConnectionsConfigError::DuplicateName { kind: "sql", .. }));
    }

    #[test]
    fn test_same_name_in_different_kinds_is_fine() {
        let text = r#"{
            sql: [{ name: "x", driver: "sqlite", dataSource: "sqlite::memory:" }],
            redis: [{ name: "x", url: "redis://127.0.0.1/" }],
        }"#;
        assert!(ConnectionsConfig::from_json5_str(text).is_ok());
    }

    #[test]
    fn test_redis_entry_needs_exactly_one_mode() {
        let text = r#"{ redis: [{ name: "r" }] }"#;
        let err = ConnectionsConfig::from_json5_str(text).unwrap_err();
        assert!(matches!(err, ConnectionsConfigError::InvalidEntry { kind: "redis", .. }));
    }

    #[test]
    fn test_from_file_and_missing_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = ConnectionsConfig::from_file(file.path()).unwrap();
        assert_eq!(config.redis.len(), 2);

        let missing = file.path().with_extension("missing");
        assert!(matches!(
            ConnectionsConfig::from_file(&missing),
            Err(ConnectionsConfigError::IoError { .. })
        ));
    }

    #[tokio::test]
    async fn test_open_all_registers_enabled_entries() {
        let config = ConnectionsConfig::from_json5_str(SAMPLE).unwrap();
        let root = Context::background();
        let ctx = open_all(&root, &config).await.unwrap();

        assert!(sql(&ctx, "main").is_some());
        assert!(sql(&ctx, "off").is_none());
        assert!(redis(&ctx, "cache").is_some());
        assert!(redis(&ctx, "ha").map(|c| c.is_failover()).unwrap_or(false));
        assert_eq!(root.depth(), 0);
    }

    #[tokio::test]
    async fn test_open_all_rolls_back_on_failure() {
        let text = r#"{
            sql: [
                { name: "good", driver: "sqlite", dataSource: "sqlite::memory:" },
                { name: "bad", driver: "postgres", dataSource: "mysql://localhost/app" },
            ],
        }"#;
        let config = ConnectionsConfig::from_json5_str(text).unwrap();
        let root = Context::background();
        let ctx = open_all(&root, &config).await;

        assert!(matches!(
            ctx,
            Err(ConnectionsConfigError::Connection(ConnectionError::DriverMismatch { .. }))
        ));
        assert!(SqlRegistry::is_empty(&root));
    }

    #[tokio::test]
    async fn test_failed_open_all_restores_shadowed_connection() {
        let root = db_sql::open_sql(&Context::background(), "main", "sqlite", "sqlite::memory:");
        let old = sql(&root, "main").expect("pool registered");
        let text = r#"{
            sql: [
                { name: "main", driver: "sqlite", dataSource: "sqlite::memory:" },
                { name: "bad", driver: "postgres", dataSource: "mysql://localhost/app" },
            ],
        }"#;
        let config = ConnectionsConfig::from_json5_str(text).unwrap();

        assert!(open_all(&root, &config).await.is_err());
        assert_eq!(SqlRegistry::names(&root), vec!["main".to_string()]);
        assert!(!old.is_closed());

        let after = crate::connections::close_all_connections(&root).await;
        assert!(sql(&after, "main").is_none());
        assert!(SqlRegistry::is_empty(&root));
        assert!(old.is_closed());
    }
}
