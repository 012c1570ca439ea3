//! # Synchronous Client API
//!
//! Purpose: Expose a compact, blocking API for namespaced keys, typed values,
//! objects, bulk pattern operations, and distributed locks over one pool.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides pooling, namespacing, and protocol
//!    details behind one entry point per store endpoint.
//! 2. **Scoped Acquisition**: Each operation borrows one connection and the
//!    guard returns it on every exit path.
//! 3. **Tagged Failures**: Transport errors are wrapped with the operation
//!    that failed; nothing is retried.
//! 4. **Inert by Default**: `Client::default()` and closed clients reject
//!    every call with `NotInitialized` before touching the network.

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{JsonCodec, ObjectCodec};
use crate::config::{ClientConfig, Credentials};
use crate::error::{ClientError, ClientResult, TransportError};
use crate::lock::{DistributedMutex, LockManager, MutexOptions};
use crate::namespace::{resolve, PATTERN_ALL};
use crate::pool::Pool;
use crate::resp::RespValue;
use crate::scan::{self, ScanOptions};
use crate::value::{FromValue, ToArg};

struct ClientInner {
    pool: Pool,
    locks: LockManager,
    scan: ScanOptions,
}

impl ClientInner {
    /// One round trip on a freshly borrowed connection.
    fn round_trip(&self, args: &[&[u8]]) -> Result<RespValue, TransportError> {
        let mut conn = self.pool.get()?;
        conn.exec(args)
    }
}

/// Namespaced key-value client with connection pooling.
///
/// The client owns its pool: `close` (or drop) closes it exactly once.
/// Namespace segments are passed per call; `&[]` means none.
#[derive(Default)]
pub struct Client {
    inner: Option<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Client");
        out.field("initialized", &self.is_initialized());
        if let Some(pool) = self.pool() {
            out.field("pool", &pool.stats());
        }
        out.finish()
    }
}

impl Client {
    /// Creates a client with default pool limits (10 active, 5 idle, blocking).
    pub fn connect(addr: impl Into<String>, credentials: Credentials) -> ClientResult<Self> {
        Self::new(ClientConfig::new(addr).with_credentials(credentials))
    }

    /// Creates a client with a custom configuration.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let pool = Pool::new(config.pool_config())?;
        let scan = ScanOptions {
            count: config.scan_count,
            max_iterations: config.max_scan_iterations,
        };
        Ok(Self::from_pool_with(pool, scan))
    }

    /// Wraps an externally configured pool. The client takes ownership.
    pub fn from_pool(pool: Pool) -> Self {
        Self::from_pool_with(pool, ScanOptions::default())
    }

    pub fn from_pool_with(pool: Pool, scan: ScanOptions) -> Self {
        let locks = LockManager::new(pool.clone());
        Client {
            inner: Some(ClientInner { pool, locks, scan }),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.is_some()
    }

    /// Underlying pool, for callers that need direct access.
    pub fn pool(&self) -> Option<&Pool> {
        self.inner.as_ref().map(|inner| &inner.pool)
    }

    /// Closes the pool and leaves the client inert. Later calls are no-ops.
    pub fn close(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.pool.close();
        }
    }

    fn inner(&self) -> ClientResult<&ClientInner> {
        self.inner.as_ref().ok_or(ClientError::NotInitialized)
    }

    /// Single-round-trip liveness check.
    pub fn ping(&self) -> ClientResult<()> {
        let inner = self.inner()?;
        match inner
            .round_trip(&[b"PING"])
            .and_then(RespValue::into_result)
            .map_err(ClientError::PingFailed)?
        {
            RespValue::Simple(_) | RespValue::Bulk(Some(_)) => Ok(()),
            _ => Err(ClientError::PingFailed(TransportError::UnexpectedResponse)),
        }
    }

    /// Fetches the raw value of a key; `None` when the key is absent.
    pub fn get(&self, key: &str, namespace: &[&str]) -> ClientResult<Option<Vec<u8>>> {
        let inner = self.inner()?;
        let key = resolve(key, namespace);
        inner
            .round_trip(&[b"GET", key.as_bytes()])
            .and_then(RespValue::expect_bytes)
            .map_err(ClientError::GetFailed)
    }

    /// Fetches a key and coerces it to `T`.
    pub fn get_as<T: FromValue>(&self, key: &str, namespace: &[&str]) -> ClientResult<Option<T>> {
        self.get(key, namespace)?.map(T::from_value).transpose()
    }

    pub fn get_bool(&self, key: &str, namespace: &[&str]) -> ClientResult<Option<bool>> {
        self.get_as(key, namespace)
    }

    pub fn get_bytes(&self, key: &str, namespace: &[&str]) -> ClientResult<Option<Vec<u8>>> {
        self.get(key, namespace)
    }

    pub fn get_int(&self, key: &str, namespace: &[&str]) -> ClientResult<Option<i64>> {
        self.get_as(key, namespace)
    }

    pub fn get_string(&self, key: &str, namespace: &[&str]) -> ClientResult<Option<String>> {
        self.get_as(key, namespace)
    }

    /// Stores a value without expiration.
    pub fn set(&self, key: &str, value: impl ToArg, namespace: &[&str]) -> ClientResult<()> {
        let inner = self.inner()?;
        let key = resolve(key, namespace);
        let value = value.to_arg();
        inner
            .round_trip(&[b"SET", key.as_bytes(), &*value])
            .and_then(RespValue::expect_ok)
            .map_err(ClientError::SetFailed)
    }

    /// Stores a value that expires after `ttl`, truncated to whole seconds.
    ///
    /// A `ttl` under one second is rejected without a round trip.
    pub fn set_ex(
        &self,
        key: &str,
        value: impl ToArg,
        ttl: Duration,
        namespace: &[&str],
    ) -> ClientResult<()> {
        let inner = self.inner()?;
        let seconds = ttl.as_secs();
        if seconds == 0 {
            return Err(ClientError::SetExFailed(TransportError::InvalidExpiry));
        }
        let key = resolve(key, namespace);
        let seconds = seconds.to_string();
        let value = value.to_arg();
        inner
            .round_trip(&[b"SETEX", key.as_bytes(), seconds.as_bytes(), &*value])
            .and_then(RespValue::expect_ok)
            .map_err(ClientError::SetExFailed)
    }

    /// Returns whether the key exists. Absence is `Ok(false)`.
    pub fn exists(&self, key: &str, namespace: &[&str]) -> ClientResult<bool> {
        let inner = self.inner()?;
        let key = resolve(key, namespace);
        inner
            .round_trip(&[b"EXISTS", key.as_bytes()])
            .and_then(RespValue::expect_integer)
            .map(|count| count > 0)
            .map_err(ClientError::KeyNotFound)
    }

    /// Deletes a key. Returns true when a key was removed.
    pub fn delete(&self, key: &str, namespace: &[&str]) -> ClientResult<bool> {
        let inner = self.inner()?;
        let key = resolve(key, namespace);
        inner
            .round_trip(&[b"DEL", key.as_bytes()])
            .and_then(RespValue::expect_integer)
            .map(|count| count > 0)
            .map_err(ClientError::DelFailed)
    }

    /// Lists every key matching `pattern` within the namespace.
    ///
    /// Returned keys are fully qualified (namespace included).
    pub fn get_keys(&self, pattern: &str, namespace: &[&str]) -> ClientResult<Vec<String>> {
        let inner = self.inner()?;
        let pattern = resolve(pattern, namespace);
        let mut conn = inner.pool.get().map_err(ClientError::ScanFailed)?;
        scan::collect_keys(&mut conn, &pattern, inner.scan)
    }

    pub fn get_all_keys(&self, namespace: &[&str]) -> ClientResult<Vec<String>> {
        self.get_keys(PATTERN_ALL, namespace)
    }

    /// Unlinks every key matching `pattern` within the namespace.
    ///
    /// Deletion happens page by page. It is not atomic: if a round trip fails,
    /// the pages unlinked before it stay deleted and the error is returned.
    /// Returns the number of keys removed.
    pub fn clear(&self, pattern: &str, namespace: &[&str]) -> ClientResult<u64> {
        let inner = self.inner()?;
        let pattern = resolve(pattern, namespace);
        let mut conn = inner.pool.get().map_err(ClientError::ClearFailed)?;
        scan::unlink_matching(&mut conn, &pattern, inner.scan)
    }

    /// Unlinks every key in the namespace (or the whole keyspace for `&[]`).
    pub fn clear_all(&self, namespace: &[&str]) -> ClientResult<u64> {
        self.clear(PATTERN_ALL, namespace)
    }

    /// Stores `value` encoded as JSON.
    pub fn set_object<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        namespace: &[&str],
    ) -> ClientResult<()> {
        self.set_object_with(&JsonCodec, key, value, namespace)
    }

    pub fn set_object_with<C: ObjectCodec, T: Serialize + ?Sized>(
        &self,
        codec: &C,
        key: &str,
        value: &T,
        namespace: &[&str],
    ) -> ClientResult<()> {
        self.inner()?;
        let raw = codec.encode(value).map_err(ClientError::EncodeFailed)?;
        self.set(key, raw, namespace)
    }

    /// Stores `value` encoded as JSON with an expiration.
    pub fn set_object_ex<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        namespace: &[&str],
    ) -> ClientResult<()> {
        self.set_object_ex_with(&JsonCodec, key, value, ttl, namespace)
    }

    pub fn set_object_ex_with<C: ObjectCodec, T: Serialize + ?Sized>(
        &self,
        codec: &C,
        key: &str,
        value: &T,
        ttl: Duration,
        namespace: &[&str],
    ) -> ClientResult<()> {
        self.inner()?;
        let raw = codec.encode(value).map_err(ClientError::EncodeFailed)?;
        self.set_ex(key, raw, ttl, namespace)
    }

    /// Loads a JSON-encoded object. Undecodable bytes yield `DecodeFailed`.
    pub fn get_object<T: DeserializeOwned>(
        &self,
        key: &str,
        namespace: &[&str],
    ) -> ClientResult<Option<T>> {
        self.get_object_with(&JsonCodec, key, namespace)
    }

    pub fn get_object_with<C: ObjectCodec, T: DeserializeOwned>(
        &self,
        codec: &C,
        key: &str,
        namespace: &[&str],
    ) -> ClientResult<Option<T>> {
        match self.get(key, namespace)? {
            Some(raw) => codec.decode(&raw).map(Some).map_err(ClientError::DecodeFailed),
            None => Ok(None),
        }
    }

    /// Lock manager sharing this client's pool.
    pub fn locks(&self) -> ClientResult<&LockManager> {
        Ok(&self.inner()?.locks)
    }

    pub fn new_mutex(&self, name: impl Into<String>) -> ClientResult<DistributedMutex> {
        Ok(self.locks()?.new_mutex(name))
    }

    pub fn new_mutex_with(
        &self,
        name: impl Into<String>,
        options: MutexOptions,
    ) -> ClientResult<DistributedMutex> {
        Ok(self.locks()?.new_mutex_with(name, options))
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}
