//! Events raised by the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Kind of mirror change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

/// Event delivered to [`subscribe`](crate::SyncEngine::subscribe) receivers.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A key was written. `value` is absent when the store no longer holds it.
    Update { key: String, value: Option<Value> },
    /// A key was deleted.
    Delete { key: String },
    /// A background failure: transport trouble, or a payload that did not decode.
    Error(Error),
}

impl SyncEvent {
    /// The changed key, for update and delete events.
    pub fn key(&self) -> Option<&str> {
        match self {
            SyncEvent::Update { key, .. } | SyncEvent::Delete { key } => Some(key),
            SyncEvent::Error(_) => None,
        }
    }

    /// The change kind, for update and delete events.
    pub fn kind(&self) -> Option<ChangeKind> {
        match self {
            SyncEvent::Update { .. } => Some(ChangeKind::Update),
            SyncEvent::Delete { .. } => Some(ChangeKind::Delete),
            SyncEvent::Error(_) => None,
        }
    }
}
