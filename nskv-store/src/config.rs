//! Store configuration, loadable from JSON.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Listen address; port 0 picks a free port.
    pub addr: String,
    /// ACL user name. `None` means the `default` user.
    pub username: Option<String>,
    /// When set, every connection must `AUTH` before other commands.
    pub password: Option<String>,
    /// Entries examined per `SCAN` page, overriding the client's `COUNT`.
    pub scan_page_size: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            addr: "127.0.0.1:6379".to_string(),
            username: None,
            password: None,
            scan_page_size: None,
        }
    }
}

impl StoreConfig {
    /// Loopback, ephemeral port. Used by tests.
    pub fn local() -> Self {
        StoreConfig {
            addr: "127.0.0.1:0".to_string(),
            ..StoreConfig::default()
        }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn requires_auth(&self) -> bool {
        self.password.is_some()
    }

    /// Checks an `AUTH` attempt. A missing user name means `default`.
    pub fn accepts(&self, username: Option<&[u8]>, password: &[u8]) -> bool {
        let Some(expected) = self.password.as_deref() else {
            return false;
        };
        let expected_user = self.username.as_deref().unwrap_or("default");
        let user = username.unwrap_or(b"default");
        user == expected_user.as_bytes() && password == expected.as_bytes()
    }
}
