//! # nskv Store
//!
//! Purpose: A small in-memory RESP2 key-value store speaking the subset of
//! commands the nskv client issues. Runs as the `nskv-store` binary or
//! in-process behind a [`StoreHandle`] for integration tests.
//!
//! ## Design Principles
//! 1. **One Keyspace**: All connections share a single [`Keyspace`].
//! 2. **Stable Cursors**: `SCAN` never skips keys that existed for the whole
//!    walk, even while earlier pages are being deleted.
//! 3. **Optional AUTH**: A configured password gates every connection.

mod config;
mod glob;
mod keyspace;
mod protocol;
mod server;

pub use config::StoreConfig;
pub use glob::glob_match;
pub use keyspace::{InvalidExpire, Keyspace, ScanPage};
pub use server::{run, StoreHandle, StoreServer};
