//! Change notification wire format.
//!
//! Notifications carry no value: a receiver that needs the new value reads it
//! from the store. On the wire a notification is compact JSON:
//!
//! ```json
//! {"k":"counter","i":"1706745600000.4242.9f1c"}
//! {"k":"counter","i":"1706745600000.4242.9f1c","d":1}
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A change notification published after every write or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Logical key that changed
    #[serde(rename = "k")]
    pub key: String,
    /// Client ID of the writer
    #[serde(rename = "i")]
    pub origin: String,
    /// `Some(1)` on deletion, absent on update
    #[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
    delete: Option<u8>,
}

impl Notification {
    /// Notification for an update or creation.
    pub fn update(key: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            origin: origin.into(),
            delete: None,
        }
    }

    /// Notification for a deletion.
    pub fn delete(key: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            origin: origin.into(),
            delete: Some(1),
        }
    }

    /// Whether this notification signals deletion.
    pub fn is_delete(&self) -> bool {
        self.delete == Some(1)
    }

    /// Whether this notification was published by `client_id`.
    pub fn is_from(&self, client_id: &str) -> bool {
        self.origin == client_id
    }

    /// Encode to the wire format.
    pub fn encode(&self) -> String {
        // A struct of strings and an optional integer always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode from the wire format.
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::MalformedNotification(e.to_string()))
    }
}
