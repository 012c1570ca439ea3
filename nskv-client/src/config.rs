//! # Client Configuration
//!
//! Plain structs with defaults; `serde` lets them be loaded from JSON.
//! Durations are expressed in milliseconds on the wire (`*_ms` fields).

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::pool::PoolConfig;

/// Default maximum of open connections per pool.
pub const DEFAULT_MAX_ACTIVE: usize = 10;
/// Default number of idle connections retained.
pub const DEFAULT_MAX_IDLE: usize = 5;
/// Default `COUNT` hint sent with every `SCAN`.
pub const DEFAULT_SCAN_COUNT: usize = 100;
/// Default cap on `SCAN` round trips for a single enumeration.
pub const DEFAULT_MAX_SCAN_ITERATIONS: usize = 1 << 20;

/// How a fresh connection authenticates.
#[derive(Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Credentials {
    /// No `AUTH` is sent.
    #[default]
    Anonymous,
    /// `AUTH password`.
    Password { password: String },
    /// `AUTH username password` (ACL style).
    UserPassword { username: String, password: String },
}

impl Credentials {
    /// Picks a mode from possibly-empty parts: user+password wins, then
    /// password alone, then anonymous. A username without password is ignored.
    pub fn from_parts(username: &str, password: &str) -> Self {
        match (username.is_empty(), password.is_empty()) {
            (false, false) => Credentials::UserPassword {
                username: username.to_string(),
                password: password.to_string(),
            },
            (_, false) => Credentials::Password {
                password: password.to_string(),
            },
            _ => Credentials::Anonymous,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Anonymous => write!(f, "Anonymous"),
            Credentials::Password { .. } => write!(f, "Password(***)"),
            Credentials::UserPassword { username, .. } => {
                write!(f, "UserPassword({:?}, ***)", username)
            }
        }
    }
}

/// Configuration for a client and the pool it owns.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Store address, e.g. "127.0.0.1:6379".
    pub addr: String,
    pub credentials: Credentials,
    /// Maximum open connections (idle + in-use).
    pub max_active: usize,
    /// Maximum idle connections kept for reuse.
    pub max_idle: usize,
    /// Block when the pool is saturated instead of failing.
    pub wait: bool,
    /// Check idle connections with `PING` before handing them out.
    pub test_on_borrow: bool,
    #[serde(rename = "idle_timeout_ms", deserialize_with = "millis")]
    pub idle_timeout: Option<Duration>,
    #[serde(rename = "read_timeout_ms", deserialize_with = "millis")]
    pub read_timeout: Option<Duration>,
    #[serde(rename = "write_timeout_ms", deserialize_with = "millis")]
    pub write_timeout: Option<Duration>,
    #[serde(rename = "connect_timeout_ms", deserialize_with = "millis")]
    pub connect_timeout: Option<Duration>,
    /// `COUNT` hint for `SCAN`.
    pub scan_count: usize,
    /// Round trips allowed before a scan is declared non-convergent.
    pub max_scan_iterations: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            credentials: Credentials::Anonymous,
            max_active: DEFAULT_MAX_ACTIVE,
            max_idle: DEFAULT_MAX_IDLE,
            wait: true,
            test_on_borrow: true,
            idle_timeout: None,
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
            scan_count: DEFAULT_SCAN_COUNT,
            max_scan_iterations: DEFAULT_MAX_SCAN_ITERATIONS,
        }
    }
}

impl ClientConfig {
    /// Default configuration for the given address.
    pub fn new(addr: impl Into<String>) -> Self {
        ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Pool settings derived from this configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            addr: self.addr.clone(),
            credentials: self.credentials.clone(),
            max_active: self.max_active,
            max_idle: self.max_idle,
            wait: self.wait,
            test_on_borrow: self.test_on_borrow,
            idle_timeout: self.idle_timeout,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            connect_timeout: self.connect_timeout,
        }
    }
}

fn millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
}
