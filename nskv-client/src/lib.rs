//! # nskv Sync Client
//!
//! Purpose: Provide a blocking, namespaced key-value client for RESP2 stores
//! with connection pooling, typed accessors, pattern-based enumeration and
//! bulk deletion, and distributed locks.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections; block when saturated.
//! 2. **Namespaced Keys**: Every key is `seg1:seg2:...:key` on the wire.
//! 3. **Cursor Walks**: Pattern operations page through `SCAN` on a single
//!    connection with a bounded number of round trips.
//! 4. **Tagged Errors**: Each operation wraps transport failures in its own
//!    error variant.
//!
//! ```no_run
//! use nskv_client::{Client, Credentials};
//!
//! let client = Client::connect("127.0.0.1:6379", Credentials::Anonymous)?;
//! client.set("42", "ann", &["users"])?;
//! assert_eq!(client.get_string("42", &["users"])?, Some("ann".to_string()));
//! client.clear_all(&["users"])?;
//! # Ok::<(), nskv_client::ClientError>(())
//! ```

mod client;
mod codec;
mod config;
mod error;
pub mod global;
mod lock;
pub mod namespace;
mod pool;
mod resp;
mod scan;
mod value;

pub use client::Client;
pub use codec::{CodecError, JsonCodec, ObjectCodec};
pub use config::{
    ClientConfig, Credentials, DEFAULT_MAX_ACTIVE, DEFAULT_MAX_IDLE, DEFAULT_MAX_SCAN_ITERATIONS,
    DEFAULT_SCAN_COUNT,
};
pub use error::{ClientError, ClientResult, ErrorKind, TransportError};
pub use lock::{DistributedMutex, LockManager, MutexOptions};
pub use pool::{Pool, PoolConfig, PoolStats, PooledConnection};
pub use resp::RespValue;
pub use scan::ScanOptions;
pub use value::{FromValue, ToArg};
