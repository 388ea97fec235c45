//! # SQL Connections
//!
//! Relational connections kept in a [`Context`]. Handles are lazy `sqlx`
//! pools on the `Any` driver, so the backend is picked from the data source
//! URL and nothing is dialled until the first query.

use log::info;
use sqlx::any::install_default_drivers;
use sqlx::AnyPool;

use crate::context::Context;
use crate::error::{fatal, ConnectionError};
use crate::registry::{ConnectionKind, Registry};
use crate::utils::url_mask::mask_url_password;

/// Connection kind tag for relational databases.
pub struct Sql;

impl ConnectionKind for Sql {
    type Handle = AnyPool;
    const LABEL: &'static str = "sql";

    async fn close(pool: AnyPool) -> Result<(), ConnectionError> {
        pool.close().await;
        Ok(())
    }
}

/// Registry operations for relational connections.
pub type SqlRegistry = Registry<Sql>;

/// Retrieves the pool registered as `name`, or `None`.
pub fn sql(ctx: &Context, name: &str) -> Option<AnyPool> {
    SqlRegistry::lookup(ctx, name)
}

/// Returns a new context containing `pool` under `name`.
pub fn with_sql(ctx: &Context, name: &str, pool: AnyPool) -> Context {
    SqlRegistry::register(ctx, name, pool)
}

/// Opens a pool for `data_source` with `driver` and registers it as `name`.
pub fn try_open_sql(
    ctx: &Context,
    name: &str,
    driver: &str,
    data_source: &str,
) -> Result<Context, ConnectionError> {
    let url = sql_url(driver, data_source)?;
    install_default_drivers();
    let pool = AnyPool::connect_lazy(&url)?;
    info!("Opened sql connection '{}' ({})", name, mask_url_password(&url));
    Ok(with_sql(ctx, name, pool))
}

/// Opens a pool for `data_source` with `driver` and registers it as `name`.
///
/// # Panics
/// If the driver rejects the data source.
pub fn open_sql(ctx: &Context, name: &str, driver: &str, data_source: &str) -> Context {
    try_open_sql(ctx, name, driver, data_source)
        .unwrap_or_else(|err| fatal("open", Sql::LABEL, name, err))
}

/// Closes the pool registered as `name`. Does nothing if there is none.
pub async fn close_sql(ctx: &Context, name: &str) -> Context {
    SqlRegistry::close(ctx, name).await
}

/// Closes every registered pool.
pub async fn close_sql_all(ctx: &Context) -> Context {
    SqlRegistry::close_all(ctx).await
}

/// Builds the URL handed to the `Any` driver.
///
/// `driver` must be one of the backends compiled into the `Any` driver
/// (`postgres`/`postgresql`, `mysql`/`mariadb`, `sqlite`). A data source
/// without a scheme gets the driver's scheme in front of it. One with a
/// scheme must name the same backend as `driver`.
pub fn sql_url(driver: &str, data_source: &str) -> Result<String, ConnectionError> {
    let driver = driver.trim();
    if driver.is_empty() {
        return Err(ConnectionError::InvalidConfig("empty SQL driver name".to_string()));
    }
    if !SUPPORTED_DRIVERS.contains(&canonical(driver).as_str()) {
        return Err(ConnectionError::InvalidConfig(format!(
            "unsupported SQL driver '{}' (expected one of: {})",
            driver,
            SUPPORTED_DRIVERS.join(", ")
        )));
    }
    if data_source.trim().is_empty() {
        return Err(ConnectionError::InvalidConfig(format!(
            "empty data source for SQL driver '{}'",
            driver
        )));
    }

    match url_scheme(driver, data_source) {
        Some(scheme) if canonical(scheme) == canonical(driver) => Ok(data_source.to_string()),
        Some(scheme) => Err(ConnectionError::DriverMismatch {
            driver: driver.to_string(),
            scheme: scheme.to_string(),
        }),
        None => Ok(format!("{}://{}", canonical(driver), data_source)),
    }
}

// Backends with an `Any` driver installed by `install_default_drivers`.
const SUPPORTED_DRIVERS: [&str; 3] = ["postgres", "mysql", "sqlite"];

// `host:5432/db` and `user:pw@host/db` have no scheme; `postgres://...` and
// `sqlite::memory:` do. Only sqlite URLs may omit the `//`.
fn url_scheme<'a>(driver: &str, data_source: &'a str) -> Option<&'a str> {
    let (prefix, rest) = data_source.split_once(':')?;
    let valid = prefix
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    let bare_sqlite = canonical(driver) == "sqlite" && prefix.eq_ignore_ascii_case(driver);
    if valid && (rest.starts_with("//") || bare_sqlite) {
        Some(prefix)
    } else {
        None
    }
}

fn canonical(scheme: &str) -> String {
    match scheme.to_ascii_lowercase().as_str() {
        "postgresql" => "postgres".to_string(),
        "mariadb" => "mysql".to_string(),
        other => other.to_string(),
    }
}
