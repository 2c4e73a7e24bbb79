//! Key layout - maps logical keys onto physical store keys.
//!
//! Every physical key is `{prefix}{marker}{rest}`. The marker keeps mirrored
//! values, live-set values and live-set member sets in disjoint namespaces so
//! a bootstrap scan over mirrored values never picks up presence entries.

use serde::{Deserialize, Serialize};

/// Marker for mirrored values.
pub const DATA_MARKER: &str = "d:";
/// Marker for per-member live-set values.
pub const LIVE_VALUE_MARKER: &str = "lv:";
/// Marker for per-group live-set member-name sets.
pub const LIVE_SET_MARKER: &str = "ls:";

/// Default key prefix.
pub const DEFAULT_PREFIX: &str = "d:";

/// Translates between logical and physical keys for one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyCodec {
    prefix: String,
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl KeyCodec {
    /// Create a codec for the given prefix. An empty prefix is allowed.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The configured prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Physical key of a mirrored value. Also used to namespace glob patterns,
    /// since `*` passes through untouched.
    pub fn data_key(&self, key: &str) -> String {
        format!("{}{}{}", self.prefix, DATA_MARKER, key)
    }

    /// Glob matching every mirrored value in this namespace.
    pub fn data_pattern_all(&self) -> String {
        self.data_key("*")
    }

    /// Inverse of [`data_key`](Self::data_key).
    ///
    /// Returns `None` when the physical key does not belong to the mirrored
    /// value namespace.
    pub fn strip_data_key<'a>(&self, physical: &'a str) -> Option<&'a str> {
        physical
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix(DATA_MARKER))
    }

    /// Physical key of one live-set member's value.
    pub fn live_value_key(&self, group: &str, name: &str) -> String {
        format!("{}{}{}:{}", self.prefix, LIVE_VALUE_MARKER, group, name)
    }

    /// Physical key of a live-set group's member-name set.
    pub fn live_set_key(&self, group: &str) -> String {
        format!("{}{}{}", self.prefix, LIVE_SET_MARKER, group)
    }

    /// Channel name for change notifications. The prefix is applied only when
    /// it is non-empty.
    pub fn channel(&self, channel: &str) -> String {
        if self.prefix.is_empty() {
            channel.to_string()
        } else {
            format!("{}{}", self.prefix, channel)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout() {
        let codec = KeyCodec::default();
        assert_eq!(codec.data_key("a"), "d:d:a");
        assert_eq!(codec.data_pattern_all(), "d:d:*");
        assert_eq!(codec.live_value_key("room", "alice"), "d:lv:room:alice");
        assert_eq!(codec.live_set_key("room"), "d:ls:room");
        assert_eq!(codec.channel(":sync"), "d::sync");
    }

    #[test]
    fn strip_inverts_data_key() {
        let codec = KeyCodec::new("app:");
        let physical = codec.data_key("sum:1");
        assert_eq!(codec.strip_data_key(&physical), Some("sum:1"));
    }

    #[test]
    fn strip_rejects_foreign_keys() {
        let codec = KeyCodec::new("app:");
        assert_eq!(codec.strip_data_key("other:d:x"), None);
        assert_eq!(codec.strip_data_key(&codec.live_set_key("g")), None);
    }

    #[test]
    fn empty_prefix_leaves_channel_alone() {
        let codec = KeyCodec::new("");
        assert_eq!(codec.channel("sync"), "sync");
        assert_eq!(codec.data_key("k"), "d:k");
    }
}
