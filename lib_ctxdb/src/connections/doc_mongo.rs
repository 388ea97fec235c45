//! # MongoDB Connections
//!
//! Document-store clients kept in a [`Context`].

use log::info;
use mongodb::Client;

use crate::context::Context;
use crate::error::{fatal, ConnectionError};
use crate::registry::{ConnectionKind, Registry};
use crate::utils::url_mask::mask_url_password;

/// Connection kind tag for MongoDB.
pub struct Mongo;

impl ConnectionKind for Mongo {
    type Handle = Client;
    const LABEL: &'static str = "mongo";

    async fn close(client: Client) -> Result<(), ConnectionError> {
        client.shutdown().await;
        Ok(())
    }
}

/// Registry operations for MongoDB connections.
pub type MongoRegistry = Registry<Mongo>;

/// Retrieves the client registered as `name`, or `None`.
pub fn mongo(ctx: &Context, name: &str) -> Option<Client> {
    MongoRegistry::lookup(ctx, name)
}

/// Returns a new context containing `client` under `name`.
pub fn with_mongo(ctx: &Context, name: &str, client: Client) -> Context {
    MongoRegistry::register(ctx, name, client)
}

/// Dials `url` and registers the client as `name`.
pub async fn try_open_mongo(ctx: &Context, name: &str, url: &str) -> Result<Context, ConnectionError> {
    let client = Client::with_uri_str(url).await?;
    info!("Opened mongo connection '{}' ({})", name, mask_url_password(url));
    Ok(with_mongo(ctx, name, client))
}

/// Dials `url` and registers the client as `name`.
///
/// # Panics
/// If the URL cannot be parsed or resolved.
pub async fn open_mongo(ctx: &Context, name: &str, url: &str) -> Context {
    match try_open_mongo(ctx, name, url).await {
        Ok(ctx) => ctx,
        Err(err) => fatal("open", Mongo::LABEL, name, err),
    }
}

/// Closes the client registered as `name`. Does nothing if there is none.
pub async fn close_mongo(ctx: &Context, name: &str) -> Context {
    MongoRegistry::close(ctx, name).await
}

/// Closes every registered client.
pub async fn close_mongo_all(ctx: &Context) -> Context {
    MongoRegistry::close_all(ctx).await
}
