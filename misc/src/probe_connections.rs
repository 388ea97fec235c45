//! # Connection Probe
//!
//! Loads a connection file, opens every configured connection into a fresh
//! context, reports what got registered, and closes everything again. Handy
//! for checking a deployment's connection file before a service uses it.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Parser;
use lib_ctxdb::configs::config_connections::{open_all, ConnectionsConfig, CONFIG_PATH_ENV};
use lib_ctxdb::connections::cache_redis::RedisRegistry;
use lib_ctxdb::connections::db_sql::SqlRegistry;
use lib_ctxdb::connections::doc_mongo::MongoRegistry;
use lib_ctxdb::{try_close_all_connections, Context};
use log::{info, warn};

/// Command-line arguments for the connection probe.
#[derive(Parser, Debug)]
#[command(author, version, about = "Opens and closes every connection of a connection file", long_about = None)]
pub struct Args {
    /// Path of the connection file. Falls back to `connections.json5` next to the executable.
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    pub config: Option<PathBuf>,

    /// Only parse and validate the file; do not open anything.
    #[arg(long, default_value_t = false)]
    pub check: bool,

    /// Also write the log to a dated file in the working directory.
    #[arg(long, default_value_t = false)]
    pub log_file: bool,
}

/// Initializes the logging system using `fern`.
pub fn setup_logging(to_file: bool) -> Result<()> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .level_for("lib_ctxdb", log::LevelFilter::Debug)
        .chain(std::io::stdout());

    if to_file {
        let log_filename = format!("probe_connections_{}.log", chrono::Local::now().format("%Y-%m-%d"));
        dispatch = dispatch.chain(fern::log_file(log_filename)?);
    }

    dispatch.apply()?;
    Ok(())
}

fn report(ctx: &Context) {
    for (kind, names) in [
        ("sql", SqlRegistry::names(ctx)),
        ("redis", RedisRegistry::names(ctx)),
        ("mongo", MongoRegistry::names(ctx)),
    ] {
        if names.is_empty() {
            info!("{}: none", kind);
        } else {
            info!("{}: {}", kind, names.join(", "));
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.log_file).context("Failed to setup logging")?;

    let config = match &args.config {
        Some(path) => ConnectionsConfig::from_file(path)
            .with_context(|| format!("Failed to load connection file {}", path.display()))?,
        None => ConnectionsConfig::load_default().context("Failed to load default connection file")?,
    };
    info!("Connection file lists {} enabled connection(s)", config.enabled_count());

    if args.check {
        info!("Connection file is valid.");
        return Ok(());
    }

    let ctx = open_all(&Context::background(), &config)
        .await
        .context("Failed to open configured connections")?;
    report(&ctx);

    let ctx = try_close_all_connections(&ctx)
        .await
        .context("Failed to close connections")?;

    let leftover = SqlRegistry::len(&ctx) + RedisRegistry::len(&ctx) + MongoRegistry::len(&ctx);
    if leftover > 0 {
        warn!("{} connection(s) still registered after close", leftover);
    } else {
        info!("All connections closed.");
    }
    Ok(())
}
