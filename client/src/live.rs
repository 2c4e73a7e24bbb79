//! Live set - TTL-governed presence per group.
//!
//! Each member is stored twice: its value under an expiring key, and its name
//! in the group's member set, which never expires. The set can therefore list
//! names whose values already expired. Readers reconcile by checking each
//! name's value key, and [`LiveDataSet::get_alive_names`] prunes the stale
//! names it finds. That read-side pruning is the only thing that reclaims
//! names of members that expired without an explicit delete, so reading the
//! live set mutates the store.

use std::sync::Arc;

use futures::future;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared_data_engine::{value, KeyCodec};
use tokio::sync::broadcast;

use crate::config::DEFAULT_EVENT_CAPACITY;
use crate::error::{Error, Result};
use crate::event::SyncEvent;
use crate::transport::{Command, Transport};

/// A member that is currently alive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMember {
    pub name: String,
    pub value: Value,
}

/// Presence registry on top of a [`Transport`].
pub struct LiveDataSet {
    transport: Arc<dyn Transport>,
    codec: KeyCodec,
    events: broadcast::Sender<SyncEvent>,
}

impl std::fmt::Debug for LiveDataSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveDataSet")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl LiveDataSet {
    /// Create a standalone live set with its own event channel.
    pub fn new(transport: Arc<dyn Transport>, codec: KeyCodec) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        Self::with_events(transport, codec, events)
    }

    /// Create a live set that reports errors on an existing event channel.
    pub(crate) fn with_events(
        transport: Arc<dyn Transport>,
        codec: KeyCodec,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            transport,
            codec,
            events,
        }
    }

    /// Receive decode errors raised on read paths.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Mark `name` alive in `group` for `ttl_secs` seconds, carrying `value`.
    ///
    /// Calling again refreshes the full TTL from now. `value` must not be null:
    /// a missing value is how expiry is detected.
    pub async fn set(&self, group: &str, name: &str, value: Value, ttl_secs: u64) -> Result<()> {
        if value.is_null() {
            return Err(Error::Validation(format!(
                "live value for '{}' in group '{}' must not be null",
                name, group
            )));
        }
        if ttl_secs == 0 {
            return Err(Error::Validation(format!(
                "live ttl for '{}' in group '{}' must be at least one second",
                name, group
            )));
        }

        self.transport
            .exec(vec![
                Command::SetEx {
                    key: self.codec.live_value_key(group, name),
                    value: value::encode(&value),
                    ttl_secs,
                },
                Command::SAdd {
                    key: self.codec.live_set_key(group),
                    member: name.to_string(),
                },
            ])
            .await?;

        tracing::debug!(group = %group, name = %name, ttl_secs, "Live member set");
        Ok(())
    }

    /// Remove `name` from `group` immediately.
    pub async fn delete(&self, group: &str, name: &str) -> Result<()> {
        self.transport
            .exec(vec![
                Command::Del {
                    key: self.codec.live_value_key(group, name),
                },
                Command::SRem {
                    key: self.codec.live_set_key(group),
                    member: name.to_string(),
                },
            ])
            .await?;

        tracing::debug!(group = %group, name = %name, "Live member deleted");
        Ok(())
    }

    /// Names of members whose values have not expired.
    ///
    /// Side effect: names whose values are gone are removed from the group's
    /// member set. No ordering guarantee.
    ///
    /// The existence checks and the removal are separate round trips. A
    /// [`set`](Self::set) that revives a name between them keeps its value but
    /// loses its set membership until the member is set again.
    pub async fn get_alive_names(&self, group: &str) -> Result<Vec<String>> {
        let names = self
            .transport
            .smembers(&self.codec.live_set_key(group))
            .await?;
        if names.is_empty() {
            return Ok(names);
        }

        let checks = names.iter().map(|name| {
            let key = self.codec.live_value_key(group, name);
            async move { self.transport.exists(&key).await }
        });
        let alive = future::try_join_all(checks).await?;

        let (alive_names, stale): (Vec<_>, Vec<_>) = names
            .into_iter()
            .zip(alive)
            .partition(|(_, is_alive)| *is_alive);
        let alive_names: Vec<String> = alive_names.into_iter().map(|(n, _)| n).collect();
        let stale: Vec<String> = stale.into_iter().map(|(n, _)| n).collect();

        if !stale.is_empty() {
            let pruned = self
                .transport
                .srem(&self.codec.live_set_key(group), &stale)
                .await?;
            tracing::debug!(group = %group, pruned, "Pruned expired live members");
        }

        Ok(alive_names)
    }

    /// Alive members with their values.
    ///
    /// A member that expires between listing and fetching is left out.
    pub async fn get_alive(&self, group: &str) -> Result<Vec<LiveMember>> {
        let names = self.get_alive_names(group).await?;
        let values = self.fetch(group, &names).await?;
        Ok(names
            .into_iter()
            .zip(values)
            .filter_map(|(name, value)| value.map(|value| LiveMember { name, value }))
            .collect())
    }

    /// Current value of one member, without consulting the member set.
    pub async fn get_item(&self, group: &str, name: &str) -> Result<Option<Value>> {
        let key = self.codec.live_value_key(group, name);
        let raw = self.transport.get(&key).await?;
        Ok(raw.and_then(|raw| self.decode(&key, &raw)))
    }

    /// Current values of several members, positionally aligned with `names`.
    pub async fn get_items<S: AsRef<str>>(
        &self,
        group: &str,
        names: &[S],
    ) -> Result<Vec<Option<Value>>> {
        self.fetch(group, names).await
    }

    async fn fetch<S: AsRef<str>>(&self, group: &str, names: &[S]) -> Result<Vec<Option<Value>>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = names
            .iter()
            .map(|n| self.codec.live_value_key(group, n.as_ref()))
            .collect();
        let raws = self.transport.mget(&keys).await?;
        Ok(keys
            .iter()
            .zip(raws)
            .map(|(key, raw)| raw.and_then(|raw| self.decode(key, &raw)))
            .collect())
    }

    /// Decode a stored value, reporting failures and reading them as absent.
    fn decode(&self, key: &str, raw: &str) -> Option<Value> {
        match value::decode(key, raw) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Dropping undecodable live value");
                let _ = self.events.send(SyncEvent::Error(e.into()));
                None
            }
        }
    }
}
