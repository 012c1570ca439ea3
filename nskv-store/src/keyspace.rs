//! # Keyspace
//!
//! Purpose: Hold the store's keys with optional expiry and answer cursor-based
//! scans that stay stable while keys are deleted mid-walk.
//!
//! ## Design Principles
//! 1. **Insertion Ids**: Every key gets a monotonically increasing id when it
//!    is first written. Overwrites keep the id; deletes free it for good.
//! 2. **Cursor = Next Id**: A `SCAN` cursor is the id to resume from, so
//!    deleting already-returned keys never shifts unvisited ones.
//! 3. **Lazy Expiry**: Expired entries read as missing and are purged by the
//!    next write that touches them or by a scan that walks over them.
//!
//! ```text
//! Keyspace
//!   └── inner: RwLock<KeyspaceInner>
//!         ├── map:   HashMap<key, Entry { id, value, expires_at }>
//!         └── order: BTreeMap<id, key>   (scan order)
//! ```

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::RwLock;
use thiserror::Error;

use crate::glob::glob_match;

/// A TTL too large to be represented as a deadline.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid expire time")]
pub struct InvalidExpire;

fn deadline(now: Instant, ttl: Option<Duration>) -> Result<Option<Instant>, InvalidExpire> {
    match ttl {
        Some(ttl) => now.checked_add(ttl).map(Some).ok_or(InvalidExpire),
        None => Ok(None),
    }
}

#[derive(Debug)]
struct Entry {
    id: u64,
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

#[derive(Debug)]
struct KeyspaceInner {
    map: HashMap<Vec<u8>, Entry, RandomState>,
    order: BTreeMap<u64, Vec<u8>>,
    next_id: u64,
}

impl KeyspaceInner {
    fn live(&self, key: &[u8], now: Instant) -> Option<&Entry> {
        self.map.get(key).filter(|entry| entry.is_live(now))
    }

    fn remove(&mut self, key: &[u8]) -> Option<Entry> {
        let entry = self.map.remove(key)?;
        self.order.remove(&entry.id);
        Some(entry)
    }

    fn insert(&mut self, key: Vec<u8>, value: Vec<u8>, expires_at: Option<Instant>) {
        if let Some(entry) = self.map.get_mut(&key) {
            entry.value = value;
            entry.expires_at = expires_at;
            return;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.order.insert(id, key.clone());
        self.map.insert(key, Entry { id, value, expires_at });
    }
}

/// One page of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor to pass next; 0 when the walk is complete.
    pub cursor: u64,
    pub keys: Vec<Vec<u8>>,
}

/// Thread-safe key/value map with expiry.
#[derive(Debug)]
pub struct Keyspace {
    inner: RwLock<KeyspaceInner>,
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Keyspace {
    pub fn new() -> Self {
        Keyspace {
            inner: RwLock::new(KeyspaceInner {
                map: HashMap::with_hasher(RandomState::new()),
                order: BTreeMap::new(),
                // Id 0 is reserved: cursor 0 means "start".
                next_id: 1,
            }),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let inner = self.inner.read();
        inner.live(key, Instant::now()).map(|entry| entry.value.clone())
    }

    /// Writes a value, replacing any previous value and expiry.
    pub fn set(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<(), InvalidExpire> {
        let expires_at = deadline(Instant::now(), ttl)?;
        let mut inner = self.inner.write();
        inner.insert(key.to_vec(), value.to_vec(), expires_at);
        Ok(())
    }

    /// Writes only if the key is absent (or expired). Returns true if written.
    pub fn set_nx(
        &self,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<bool, InvalidExpire> {
        let now = Instant::now();
        let expires_at = deadline(now, ttl)?;
        let mut inner = self.inner.write();
        if inner.live(key, now).is_some() {
            return Ok(false);
        }
        // Expired leftovers must not keep their old scan position.
        inner.remove(key);
        inner.insert(key.to_vec(), value.to_vec(), expires_at);
        Ok(true)
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.inner.read().live(key, Instant::now()).is_some()
    }

    /// Removes a key. Returns true if a live key was removed.
    pub fn remove(&self, key: &[u8]) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.write();
        inner.remove(key).is_some_and(|entry| entry.is_live(now))
    }

    /// Removes `key` only if its value equals `token`. Returns 1 or 0.
    pub fn remove_if_eq(&self, key: &[u8], token: &[u8]) -> i64 {
        let now = Instant::now();
        let mut inner = self.inner.write();
        let owned = inner.live(key, now).is_some_and(|entry| entry.value == token);
        if owned {
            inner.remove(key);
            return 1;
        }
        0
    }

    /// Resets the expiry of `key` only if its value equals `token`.
    pub fn expire_if_eq(&self, key: &[u8], token: &[u8], ttl: Duration) -> Result<i64, InvalidExpire> {
        let now = Instant::now();
        let expires_at = deadline(now, Some(ttl))?;
        let mut inner = self.inner.write();
        match inner.map.get_mut(key) {
            Some(entry) if entry.is_live(now) && entry.value == token => {
                entry.expires_at = expires_at;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    /// Examines up to `count` entries starting at `cursor` and returns the live
    /// ones matching `pattern`.
    pub fn scan(&self, cursor: u64, pattern: Option<&[u8]>, count: usize) -> ScanPage {
        let now = Instant::now();
        let mut inner = self.inner.write();
        let count = count.max(1);

        let mut examined = Vec::with_capacity(count);
        let mut next = 0;
        for (&id, key) in inner.order.range(cursor..) {
            if examined.len() == count {
                next = id;
                break;
            }
            examined.push(key.clone());
        }

        let mut keys = Vec::new();
        for key in examined {
            let live = inner.map.get(&key).is_some_and(|entry| entry.is_live(now));
            if !live {
                inner.remove(&key);
                continue;
            }
            if pattern.map_or(true, |pattern| glob_match(pattern, &key)) {
                keys.push(key);
            }
        }
        ScanPage { cursor: next, keys }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let inner = self.inner.read();
        inner.map.values().filter(|entry| entry.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.map.clear();
        inner.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(keyspace: &Keyspace, pattern: &str, count: usize) -> (Vec<String>, usize) {
        let mut cursor = 0;
        let mut keys = Vec::new();
        let mut pages = 0;
        loop {
            let page = keyspace.scan(cursor, Some(pattern.as_bytes()), count);
            pages += 1;
            keys.extend(page.keys.into_iter().map(|k| String::from_utf8(k).unwrap()));
            if page.cursor == 0 {
                return (keys, pages);
            }
            cursor = page.cursor;
        }
    }

    #[test]
    fn set_get_remove() {
        let keyspace = Keyspace::new();
        keyspace.set(b"a", b"1", None).unwrap();
        assert_eq!(keyspace.get(b"a"), Some(b"1".to_vec()));
        assert!(keyspace.exists(b"a"));
        assert!(keyspace.remove(b"a"));
        assert!(!keyspace.remove(b"a"));
        assert_eq!(keyspace.get(b"a"), None);
    }

    #[test]
    fn expired_keys_read_as_missing() {
        let keyspace = Keyspace::new();
        keyspace.set(b"a", b"1", Some(Duration::ZERO)).unwrap();
        assert_eq!(keyspace.get(b"a"), None);
        assert!(!keyspace.exists(b"a"));
        assert!(keyspace.set_nx(b"a", b"2", None).unwrap());
        assert_eq!(keyspace.get(b"a"), Some(b"2".to_vec()));
    }

    #[test]
    fn scan_pages_until_cursor_returns_to_zero() {
        let keyspace = Keyspace::new();
        for i in 0..25 {
            keyspace.set(format!("ns:{i}").as_bytes(), b"v", None).unwrap();
            keyspace.set(format!("other:{i}").as_bytes(), b"v", None).unwrap();
        }
        let (keys, pages) = walk(&keyspace, "ns:*", 10);
        assert_eq!(keys.len(), 25);
        assert_eq!(pages, 5);
        assert_eq!(keys[0], "ns:0");
        assert_eq!(keys[24], "ns:24");
    }

    #[test]
    fn deleting_returned_keys_does_not_skip_unvisited_ones() {
        let keyspace = Keyspace::new();
        for i in 0..9 {
            keyspace.set(format!("k{i}").as_bytes(), b"v", None).unwrap();
        }
        let mut cursor = 0;
        let mut seen = 0;
        loop {
            let page = keyspace.scan(cursor, None, 2);
            for key in &page.keys {
                assert!(keyspace.remove(key));
                seen += 1;
            }
            if page.cursor == 0 {
                break;
            }
            cursor = page.cursor;
        }
        assert_eq!(seen, 9);
        assert!(keyspace.is_empty());
    }

    #[test]
    fn overwrite_keeps_scan_position() {
        let keyspace = Keyspace::new();
        keyspace.set(b"first", b"1", None).unwrap();
        keyspace.set(b"second", b"2", None).unwrap();
        keyspace.set(b"first", b"3", None).unwrap();
        let page = keyspace.scan(0, None, 10);
        assert_eq!(page.keys, vec![b"first".to_vec(), b"second".to_vec()]);
        assert_eq!(page.cursor, 0);
    }

    #[test]
    fn token_guarded_mutations() {
        let keyspace = Keyspace::new();
        keyspace.set(b"lock", b"mine", Some(Duration::from_secs(5))).unwrap();
        assert_eq!(keyspace.expire_if_eq(b"lock", b"theirs", Duration::from_secs(9)), Ok(0));
        assert_eq!(keyspace.expire_if_eq(b"lock", b"mine", Duration::from_secs(9)), Ok(1));
        assert_eq!(keyspace.remove_if_eq(b"lock", b"theirs"), 0);
        assert_eq!(keyspace.remove_if_eq(b"lock", b"mine"), 1);
        assert!(!keyspace.exists(b"lock"));
    }

    #[test]
    fn unrepresentable_ttl_is_rejected_without_writing() {
        let keyspace = Keyspace::new();
        let forever = Some(Duration::from_secs(u64::MAX));
        assert_eq!(keyspace.set(b"a", b"v", forever), Err(InvalidExpire));
        assert_eq!(keyspace.set_nx(b"a", b"v", forever), Err(InvalidExpire));
        assert!(!keyspace.exists(b"a"));

        keyspace.set(b"lock", b"mine", None).unwrap();
        assert_eq!(
            keyspace.expire_if_eq(b"lock", b"mine", Duration::from_secs(u64::MAX)),
            Err(InvalidExpire)
        );
        assert!(keyspace.exists(b"lock"));
    }
}
