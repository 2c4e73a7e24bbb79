//! Configuration management for the engine.

use std::env;

use shared_data_engine::codec::DEFAULT_PREFIX;

/// Default notification channel, before prefixing.
pub const DEFAULT_CHANNEL: &str = ":sync";

/// Default capacity of the user-facing event buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Engine configuration.
///
/// Transport connection parameters belong to the [`Transport`](crate::Transport)
/// implementation and are not part of this struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Prefix for every physical key
    pub key_prefix: String,
    /// Notification channel name, prefixed with `key_prefix` when that is non-empty
    pub channel: String,
    /// Explicit client ID; generated when absent
    pub client_id: Option<String>,
    /// Embed a live set in the engine
    pub live_set: bool,
    /// Buffer size of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_PREFIX.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            client_id: None,
            live_set: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SyncConfig {
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    pub fn with_live_set(mut self, enabled: bool) -> Self {
        self.live_set = enabled;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Load a `.env` file if present, then read the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let key_prefix = lookup("SHARED_DATA_KEY_PREFIX").unwrap_or(defaults.key_prefix);

        let channel = lookup("SHARED_DATA_CHANNEL").unwrap_or(defaults.channel);
        if channel.is_empty() {
            return Err(ConfigError::EmptyChannel);
        }

        let client_id = lookup("SHARED_DATA_CLIENT_ID").filter(|id| !id.is_empty());

        let live_set = match lookup("SHARED_DATA_LIVE_SET") {
            None => defaults.live_set,
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(ConfigError::InvalidLiveSet(v)),
            },
        };

        let event_capacity = match lookup("SHARED_DATA_EVENT_CAPACITY") {
            None => defaults.event_capacity,
            Some(v) => v
                .parse()
                .ok()
                .filter(|c: &usize| *c > 0)
                .ok_or(ConfigError::InvalidEventCapacity(v))?,
        };

        Ok(Self {
            key_prefix,
            channel,
            client_id,
            live_set,
            event_capacity,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("SHARED_DATA_CHANNEL must not be empty")]
    EmptyChannel,

    #[error("Invalid SHARED_DATA_LIVE_SET value: {0}")]
    InvalidLiveSet(String),

    #[error("Invalid SHARED_DATA_EVENT_CAPACITY value: {0}")]
    InvalidEventCapacity(String),
}
