//! Caller configuration.

use std::time::Duration;

use plugin_bridge_core::protocol::ANY_PLUGIN;
use serde::{Deserialize, Serialize};

/// Configuration for a [`Caller`](crate::Caller).
///
/// Deserializable so applications can load it alongside their own settings.
/// Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallerConfig {
    /// Plugin id stamped on outgoing envelopes.
    pub plugin_id: String,
    /// Timeout applied to every call, in milliseconds. `None` waits forever.
    pub default_timeout_ms: Option<u64>,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            plugin_id: ANY_PLUGIN.to_string(),
            default_timeout_ms: None,
        }
    }
}

impl CallerConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Address envelopes to a specific plugin.
    #[must_use]
    pub fn plugin_id<S: Into<String>>(mut self, plugin_id: S) -> Self {
        self.plugin_id = plugin_id.into();
        self
    }

    /// Fail calls that get no reply within `timeout`.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Wait for replies indefinitely.
    #[must_use]
    pub fn no_timeout(mut self) -> Self {
        self.default_timeout_ms = None;
        self
    }

    /// The default timeout as a [`Duration`].
    #[must_use]
    pub const fn default_timeout(&self) -> Option<Duration> {
        match self.default_timeout_ms {
            Some(ms) => Some(Duration::from_millis(ms)),
            None => None,
        }
    }

    /// Parse a configuration from JSON.
    ///
    /// # Errors
    /// Returns error if the JSON does not describe a configuration.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
