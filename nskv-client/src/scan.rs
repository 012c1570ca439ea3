//! # Cursor Scanner
//!
//! Purpose: Enumerate or delete every key matching a pattern, however large
//! the keyspace, by walking the store's `SCAN` cursor one page at a time.
//!
//! ## Design Principles
//! 1. **One Connection per Walk**: The caller borrows a connection once and
//!    every page (and every `UNLINK`) goes through it, so a long walk never
//!    competes with itself for pool slots.
//! 2. **Cursor Contract**: Start at 0, stop after the page that returns 0.
//! 3. **Bounded Walks**: A store that never returns 0 trips an iteration cap
//!    and surfaces `ScanDidNotConverge` instead of looping forever.
//! 4. **Fail Fast**: The first failed round trip ends the walk. Pages already
//!    unlinked by `unlink_matching` stay deleted.

use tracing::{debug, warn};

use crate::config::{DEFAULT_MAX_SCAN_ITERATIONS, DEFAULT_SCAN_COUNT};
use crate::error::{ClientError, ClientResult, TransportError};
use crate::pool::PooledConnection;
use crate::resp::RespValue;

/// Tags a transport failure with the operation that owns the walk.
pub type ErrorTag = fn(TransportError) -> ClientError;

/// Page size hint and iteration cap for one walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// `COUNT` hint; the store may return more or fewer keys per page.
    pub count: usize,
    /// Maximum `SCAN` round trips before giving up.
    pub max_iterations: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            count: DEFAULT_SCAN_COUNT,
            max_iterations: DEFAULT_MAX_SCAN_ITERATIONS,
        }
    }
}

/// Cursor state for one walk over the keyspace.
///
/// Not an `Iterator`: the connection is passed per page so the caller can
/// issue other commands on it between pages.
pub struct KeyScan<'p> {
    pattern: &'p str,
    count: String,
    cursor: u64,
    iterations: usize,
    max_iterations: usize,
    done: bool,
    tag: ErrorTag,
}

impl<'p> KeyScan<'p> {
    pub fn new(pattern: &'p str, options: ScanOptions, tag: ErrorTag) -> Self {
        KeyScan {
            pattern,
            count: options.count.max(1).to_string(),
            cursor: 0,
            iterations: 0,
            max_iterations: options.max_iterations,
            done: false,
            tag,
        }
    }

    /// Round trips issued so far.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Fetches the next page of keys, or `None` once the cursor returned to 0.
    ///
    /// After an error the walk is finished and further calls return `None`.
    pub fn next_page(&mut self, conn: &mut PooledConnection) -> Option<ClientResult<Vec<Vec<u8>>>> {
        if self.done {
            return None;
        }
        if self.iterations >= self.max_iterations {
            self.done = true;
            warn!(
                pattern = self.pattern,
                iterations = self.iterations,
                cursor = self.cursor,
                "scan did not return to cursor 0"
            );
            return Some(Err(ClientError::ScanDidNotConverge {
                iterations: self.iterations,
            }));
        }

        self.iterations += 1;
        match self.round_trip(conn) {
            Ok((cursor, keys)) => {
                self.cursor = cursor;
                self.done = cursor == 0;
                Some(Ok(keys))
            }
            Err(err) => {
                self.done = true;
                Some(Err((self.tag)(err)))
            }
        }
    }

    fn round_trip(&self, conn: &mut PooledConnection) -> Result<(u64, Vec<Vec<u8>>), TransportError> {
        let cursor = self.cursor.to_string();
        let reply = conn.exec(&[
            b"SCAN",
            cursor.as_bytes(),
            b"MATCH",
            self.pattern.as_bytes(),
            b"COUNT",
            self.count.as_bytes(),
        ])?;
        parse_scan_reply(reply)
    }
}

/// Splits a `SCAN` reply into the next cursor and the page of keys.
fn parse_scan_reply(reply: RespValue) -> Result<(u64, Vec<Vec<u8>>), TransportError> {
    let mut parts = reply.expect_array()?.into_iter();
    let (cursor, keys) = match (parts.next(), parts.next(), parts.next()) {
        (Some(cursor), Some(keys), None) => (cursor, keys),
        _ => return Err(TransportError::UnexpectedResponse),
    };

    let cursor = cursor
        .expect_bytes()?
        .and_then(|raw| std::str::from_utf8(&raw).ok()?.parse::<u64>().ok())
        .ok_or(TransportError::UnexpectedResponse)?;

    let keys = keys
        .expect_array()?
        .into_iter()
        .map(|key| key.expect_bytes()?.ok_or(TransportError::UnexpectedResponse))
        .collect::<Result<Vec<_>, _>>()?;

    Ok((cursor, keys))
}

/// Collects every matching key, page order preserved, duplicates kept.
pub fn collect_keys(
    conn: &mut PooledConnection,
    pattern: &str,
    options: ScanOptions,
) -> ClientResult<Vec<String>> {
    let tag: ErrorTag = ClientError::ScanFailed;
    let mut scan = KeyScan::new(pattern, options, tag);
    let mut keys = Vec::new();
    while let Some(page) = scan.next_page(conn) {
        for raw in page? {
            let key = String::from_utf8(raw).map_err(|_| tag(TransportError::UnexpectedResponse))?;
            keys.push(key);
        }
    }
    debug!(pattern, keys = keys.len(), round_trips = scan.iterations(), "scan complete");
    Ok(keys)
}

/// Unlinks every matching key, one `UNLINK` per non-empty page.
///
/// Not atomic: on failure the pages already unlinked stay deleted. Returns the
/// number of keys the store reported as removed.
pub fn unlink_matching(
    conn: &mut PooledConnection,
    pattern: &str,
    options: ScanOptions,
) -> ClientResult<u64> {
    let tag: ErrorTag = ClientError::ClearFailed;
    let mut scan = KeyScan::new(pattern, options, tag);
    let mut removed = 0u64;
    while let Some(page) = scan.next_page(conn) {
        let keys = page?;
        if keys.is_empty() {
            continue;
        }

        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"UNLINK");
        args.extend(keys.iter().map(Vec::as_slice));
        let count = conn.exec(&args).and_then(RespValue::expect_integer).map_err(tag)?;
        removed += count.max(0) as u64;
    }
    debug!(pattern, removed, round_trips = scan.iterations(), "clear complete");
    Ok(removed)
}
