//! # Process-Wide Default Client
//!
//! Optional convenience for programs that want ambient access to one client.
//! Prefer constructing a `Client` and passing it where it is needed.
//!
//! Ordering: call `set_default`/`try_set_default` during startup before any
//! `default_client()`, and `close_default` during shutdown after the last use.
//! Handles obtained from `default_client()` keep working until `close_default`
//! closes the pool, after which their calls fail with `PoolClosed`.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::client::Client;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

static DEFAULT: RwLock<Option<Arc<Client>>> = parking_lot::const_rwlock(None);

/// Builds the default client and pings it. Replaces (and closes) any previous
/// default only when the new one is reachable.
pub fn try_set_default(config: ClientConfig) -> ClientResult<()> {
    let addr = config.addr.clone();
    let client = Client::new(config)
        .and_then(|client| client.ping().map(|()| client))
        .map_err(|err| ClientError::InitializeDefaultFailed(Box::new(err)))?;

    let previous = DEFAULT.write().replace(Arc::new(client));
    if let Some(previous) = previous {
        shutdown(previous);
    }
    info!(addr = %addr, "default client initialized");
    Ok(())
}

/// Like `try_set_default`, but an unreachable store is a startup fault.
///
/// # Panics
/// Panics if the client cannot be built or the initial ping fails.
pub fn set_default(config: ClientConfig) {
    if let Err(err) = try_set_default(config) {
        panic!("{}", err);
    }
}

/// Returns the default client, or `NotInitialized` if none is set.
pub fn default_client() -> ClientResult<Arc<Client>> {
    DEFAULT.read().clone().ok_or(ClientError::NotInitialized)
}

/// Closes and clears the default client. No-op if none is set.
pub fn close_default() {
    let current = DEFAULT.write().take();
    if let Some(client) = current {
        shutdown(client);
        info!("default client closed");
    }
}

fn shutdown(client: Arc<Client>) {
    match Arc::try_unwrap(client) {
        Ok(mut client) => client.close(),
        Err(shared) => {
            if let Some(pool) = shared.pool() {
                pool.close();
            }
        }
    }
}
