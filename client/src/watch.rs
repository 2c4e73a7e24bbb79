//! Pattern watches over mirror changes.
//!
//! Every update or delete the engine observes is tested against each
//! registered pattern, and the handlers of every matching pattern run inline,
//! in registration order. Handlers run on the notification task, so they
//! should return quickly.

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use shared_data_engine::KeyPattern;

use crate::error::Result;
use crate::event::ChangeKind;

/// A change delivered to a watch handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchEvent {
    pub kind: ChangeKind,
    pub key: String,
    /// New value on update; absent on delete
    pub value: Option<Value>,
    /// The pattern this handler was registered under
    pub pattern: String,
}

/// Callback invoked for matching changes.
pub type WatchHandler = Arc<dyn Fn(&WatchEvent) + Send + Sync>;

struct Watch {
    matcher: KeyPattern,
    handlers: Vec<WatchHandler>,
}

/// Routes mirror changes to pattern subscriptions.
///
/// Handlers registered under the same pattern text share one compiled matcher.
#[derive(Default)]
pub struct WatchRouter {
    watches: DashMap<String, Watch>,
}

impl fmt::Debug for WatchRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchRouter")
            .field("patterns", &self.patterns())
            .finish()
    }
}

impl WatchRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every change whose key matches `pattern`.
    pub fn watch<F>(&self, pattern: &str, handler: F) -> Result<()>
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        let handler: WatchHandler = Arc::new(handler);
        match self.watches.entry(pattern.to_string()) {
            Entry::Occupied(mut entry) => entry.get_mut().handlers.push(handler),
            Entry::Vacant(entry) => {
                let matcher = KeyPattern::new(pattern)?;
                entry.insert(Watch {
                    matcher,
                    handlers: vec![handler],
                });
            }
        }

        tracing::debug!(pattern = %pattern, "Watch registered");
        Ok(())
    }

    /// Drop the matcher and every handler registered under `pattern`.
    ///
    /// Returns whether the pattern was registered.
    pub fn unwatch(&self, pattern: &str) -> bool {
        let removed = self.watches.remove(pattern).is_some();
        if removed {
            tracing::debug!(pattern = %pattern, "Watch removed");
        }
        removed
    }

    /// Registered pattern texts.
    pub fn patterns(&self) -> Vec<String> {
        self.watches.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of registered patterns.
    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    pub fn clear(&self) {
        self.watches.clear();
    }

    /// Deliver a change to every matching handler.
    ///
    /// Returns the number of handler invocations.
    pub fn dispatch(&self, kind: ChangeKind, key: &str, value: Option<&Value>) -> usize {
        // Collect first so no map shard is locked while handlers run; a handler
        // may register or remove watches.
        let matched: Vec<(String, Vec<WatchHandler>)> = self
            .watches
            .iter()
            .filter(|e| e.value().matcher.matches(key))
            .map(|e| (e.key().clone(), e.value().handlers.clone()))
            .collect();

        let mut invoked = 0;
        for (pattern, handlers) in matched {
            tracing::trace!(
                kind = kind.as_str(),
                pattern = %pattern,
                key = %key,
                "Dispatching watch event"
            );
            let event = WatchEvent {
                kind,
                key: key.to_string(),
                value: value.cloned(),
                pattern,
            };
            for handler in &handlers {
                handler(&event);
                invoked += 1;
            }
        }
        invoked
    }
}
