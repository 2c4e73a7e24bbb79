//! SyncEngine - the local mirror and its coherence protocol.
//!
//! Writes go to the mirror first, then to the store, then a [`Notification`]
//! naming the key is published. Every engine on the channel, the writer
//! included, receives that notification:
//!
//! 1. An undecodable message is reported as an error event and dropped.
//! 2. A message this engine published is already reflected in the mirror, so
//!    the change event is raised from the mirror without touching the store.
//! 3. A remote delete removes the key from the mirror.
//! 4. A remote update re-reads the key from the store, bypassing the mirror.
//!
//! Between a remote write and step 4 completing, `get_sync` returns the old
//! value. Concurrent writers to one key resolve last-writer-wins at the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde_json::Value;
use shared_data_engine::{value, KeyCodec, KeyPattern, Notification};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::event::{ChangeKind, SyncEvent};
use crate::identity::ClientId;
use crate::live::LiveDataSet;
use crate::transport::{Transport, TransportError};
use crate::watch::{WatchEvent, WatchRouter};

/// Readiness flags. The engine is ready once both are set.
#[derive(Debug, Clone, Default)]
struct Readiness {
    subscribed: bool,
    bootstrapped: bool,
    failure: Option<Error>,
}

impl Readiness {
    fn is_ready(&self) -> bool {
        self.subscribed && self.bootstrapped
    }
}

/// State shared between the engine handle and its background tasks.
struct Inner {
    id: ClientId,
    codec: KeyCodec,
    channel: String,
    transport: Arc<dyn Transport>,
    mirror: DashMap<String, Value>,
    watches: WatchRouter,
    events: broadcast::Sender<SyncEvent>,
    readiness: watch::Sender<Readiness>,
    destroyed: AtomicBool,
}

/// Replicated key/value mirror.
///
/// Must be created inside a Tokio runtime: construction spawns the
/// subscription and bootstrap tasks. Await [`ready`](Self::ready) before relying
/// on the mirror being complete.
pub struct SyncEngine {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    live: Option<LiveDataSet>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("id", &self.inner.id)
            .field("channel", &self.inner.channel)
            .field("mirrored", &self.inner.mirror.len())
            .field("watches", &self.inner.watches)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Create an engine over `transport` and start synchronizing.
    pub fn new(transport: Arc<dyn Transport>, config: SyncConfig) -> Self {
        let id = config
            .client_id
            .map(ClientId::new)
            .unwrap_or_else(ClientId::generate);
        let codec = KeyCodec::new(config.key_prefix);
        let channel = codec.channel(&config.channel);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (readiness, _) = watch::channel(Readiness::default());

        let live = config.live_set.then(|| {
            LiveDataSet::with_events(Arc::clone(&transport), codec.clone(), events.clone())
        });

        let inner = Arc::new(Inner {
            id,
            codec,
            channel,
            transport,
            mirror: DashMap::new(),
            watches: WatchRouter::new(),
            events,
            readiness,
            destroyed: AtomicBool::new(false),
        });

        let span = tracing::info_span!("shared_data", client = %inner.id);

        let subscriber = {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move { inner.run_subscriber().await }.instrument(span.clone()))
        };
        let bootstrap = {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move { inner.run_bootstrap().await }.instrument(span.clone()))
        };

        span.in_scope(|| {
            tracing::debug!(channel = %inner.channel, prefix = %inner.codec.prefix(), "Engine created");
        });

        Self {
            inner,
            tasks: Mutex::new(vec![subscriber, bootstrap]),
            live,
        }
    }

    /// This engine's client ID.
    pub fn id(&self) -> &ClientId {
        &self.inner.id
    }

    /// Physical store key for a logical key.
    pub fn key(&self, key: &str) -> String {
        self.inner.codec.data_key(key)
    }

    /// Logical key for a physical key, if it belongs to this namespace.
    pub fn strip_key_prefix<'a>(&self, physical: &'a str) -> Option<&'a str> {
        self.inner.codec.strip_data_key(physical)
    }

    /// The store connection used for commands.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// The embedded live set, when enabled in the configuration.
    pub fn live_set(&self) -> Option<&LiveDataSet> {
        self.live.as_ref()
    }

    /// Receive update, delete and error events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until the subscription is active and the initial mirror load has
    /// finished. Returns immediately once that has happened.
    pub async fn ready(&self) -> Result<()> {
        let mut rx = self.inner.readiness.subscribe();
        let state = rx
            .wait_for(|r| r.is_ready() || r.failure.is_some())
            .await
            .map_err(|_| Error::NotReady("readiness channel closed".to_string()))?;
        match &state.failure {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Write a value and announce it.
    ///
    /// The mirror is updated before the store, so a local read right after
    /// this call starts already sees `value`.
    pub async fn set(&self, key: &str, value: Value) -> Result<Value> {
        tracing::debug!(client = %self.inner.id, key = %key, "set");
        let encoded = value::encode(&value);
        self.inner.mirror.insert(key.to_string(), value.clone());
        self.inner
            .transport
            .set(&self.inner.codec.data_key(key), &encoded)
            .await?;
        self.inner
            .publish(Notification::update(key, self.inner.id.as_str()))
            .await?;
        Ok(value)
    }

    /// Read a value, from the mirror when present.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        if let Some(value) = self.get_sync(key) {
            return Ok(Some(value));
        }
        self.inner.fetch(key).await
    }

    /// Read a value from the store, bypassing and then refreshing the mirror.
    pub async fn get_uncached(&self, key: &str) -> Result<Option<Value>> {
        self.inner.fetch(key).await
    }

    /// The mirror's current value. Never touches the store; may be stale.
    pub fn get_sync(&self, key: &str) -> Option<Value> {
        self.inner.mirror.get(key).map(|v| v.value().clone())
    }

    /// Atomically add `amount` to an integer value and announce it.
    ///
    /// Returns the value after the increment. A missing key counts as 0.
    pub async fn incr(&self, key: &str, amount: i64) -> Result<i64> {
        tracing::debug!(client = %self.inner.id, key = %key, amount, "incr");
        let current = self
            .inner
            .transport
            .incr_by(&self.inner.codec.data_key(key), amount)
            .await?;
        self.inner
            .mirror
            .insert(key.to_string(), Value::from(current));
        self.inner
            .publish(Notification::update(key, self.inner.id.as_str()))
            .await?;
        Ok(current)
    }

    /// [`incr`](Self::incr) with the amount negated.
    pub async fn decr(&self, key: &str, amount: i64) -> Result<i64> {
        let negated = amount
            .checked_neg()
            .ok_or_else(|| Error::Validation(format!("cannot negate decrement {}", amount)))?;
        self.incr(key, negated).await
    }

    /// Delete a key and announce it. Returns how many store keys were removed.
    pub async fn delete(&self, key: &str) -> Result<u64> {
        tracing::debug!(client = %self.inner.id, key = %key, "delete");
        let removed = self
            .inner
            .transport
            .del(&[self.inner.codec.data_key(key)])
            .await?;
        self.inner.mirror.remove(key);
        self.inner
            .publish(Notification::delete(key, self.inner.id.as_str()))
            .await?;
        Ok(removed)
    }

    /// Logical keys in the store matching `pattern`, sorted ascending.
    ///
    /// Lists the whole store namespace; prefer [`keys_sync`](Self::keys_sync)
    /// on hot paths.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let physical = self.inner.remote_keys(pattern).await?;
        let mut keys: Vec<String> = physical
            .iter()
            .filter_map(|k| self.inner.codec.strip_data_key(k))
            .map(str::to_string)
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Logical keys in the mirror matching `pattern`. Unordered.
    pub fn keys_sync(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = KeyPattern::new(pattern)?;
        Ok(self
            .inner
            .mirror
            .iter()
            .filter(|e| matcher.matches(e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    /// Sum of the numeric views of every stored value matching `pattern`.
    ///
    /// Values that are not numeric make the result NaN.
    pub async fn sum(&self, pattern: &str) -> Result<f64> {
        let physical = self.inner.remote_keys(pattern).await?;
        if physical.is_empty() {
            return Ok(0.0);
        }
        let raws = self.inner.transport.mget(&physical).await?;
        Ok(value::sum(
            raws.iter().map(|raw| value::raw_to_number(raw.as_deref())),
        ))
    }

    /// Sum of the numeric views of every mirrored value matching `pattern`.
    pub fn sum_sync(&self, pattern: &str) -> Result<f64> {
        let matcher = KeyPattern::new(pattern)?;
        Ok(value::sum(
            self.inner
                .mirror
                .iter()
                .filter(|e| matcher.matches(e.key()))
                .map(|e| value::to_number(e.value())),
        ))
    }

    /// Call `handler` for every update or delete of a key matching `pattern`.
    pub fn watch<F>(&self, pattern: &str, handler: F) -> Result<()>
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        self.inner.watches.watch(pattern, handler)
    }

    /// Remove every handler registered under `pattern`.
    pub fn unwatch(&self, pattern: &str) -> bool {
        self.inner.watches.unwatch(pattern)
    }

    /// Stop synchronizing, disconnect the transport and clear the mirror.
    ///
    /// The engine must not be used afterwards.
    pub async fn destroy(&self) {
        self.inner.destroyed.store(true, Ordering::Release);
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        self.inner.transport.disconnect().await;
        self.inner.mirror.clear();
        self.inner.watches.clear();
        tracing::debug!(client = %self.inner.id, "Engine destroyed");
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        let tasks = self
            .tasks
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

impl Inner {
    async fn run_subscriber(&self) {
        let mut subscription = match self.transport.subscribe(&self.channel).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!(channel = %self.channel, error = %e, "Subscribe failed");
                self.fail(e.into());
                return;
            }
        };
        tracing::debug!(channel = %subscription.channel(), "Subscribed");
        self.update_readiness(|r| r.subscribed = true);

        while let Some(message) = subscription.next_message().await {
            self.handle_message(&message).await;
        }
        if self.destroyed.load(Ordering::Acquire) {
            tracing::debug!(channel = %self.channel, "Subscription closed");
            return;
        }
        // The mirror no longer receives remote changes from here on
        tracing::error!(channel = %self.channel, "Subscription lost");
        self.emit(SyncEvent::Error(TransportError::Disconnected.into()));
    }

    async fn run_bootstrap(&self) {
        match self.bootstrap().await {
            Ok(loaded) => {
                tracing::debug!(loaded, "Initial mirror load complete");
                self.update_readiness(|r| r.bootstrapped = true);
            }
            Err(e) => {
                tracing::error!(error = %e, "Initial mirror load failed");
                self.fail(e);
            }
        }
    }

    /// Load every stored value in the namespace into the mirror.
    ///
    /// Entries written while the load was in flight are newer than what it
    /// read, so they are kept.
    async fn bootstrap(&self) -> Result<usize> {
        let keys = self
            .transport
            .keys(&self.codec.data_pattern_all())
            .await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let raws = self.transport.mget(&keys).await?;

        let mut loaded = 0;
        for (physical, raw) in keys.iter().zip(raws) {
            let (Some(key), Some(raw)) = (self.codec.strip_data_key(physical), raw) else {
                continue;
            };
            let value = match value::decode(key, &raw) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Keeping undecodable value as raw text");
                    self.emit(SyncEvent::Error(e.into()));
                    Value::String(raw)
                }
            };
            self.mirror.entry(key.to_string()).or_insert(value);
            loaded += 1;
        }
        Ok(loaded)
    }

    async fn handle_message(&self, raw: &str) {
        let notification = match Notification::decode(raw) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed notification");
                self.emit(SyncEvent::Error(e.into()));
                return;
            }
        };
        let key = notification.key.as_str();

        if notification.is_from(self.id.as_str()) {
            tracing::trace!(key = %key, "Own notification");
            if notification.is_delete() {
                self.raise_delete(key);
            } else {
                let current = self.mirror.get(key).map(|v| v.value().clone());
                self.raise_update(key, current);
            }
            return;
        }

        if notification.is_delete() {
            tracing::debug!(key = %key, origin = %notification.origin, "Remote delete");
            self.mirror.remove(key);
            self.raise_delete(key);
            return;
        }

        tracing::debug!(key = %key, origin = %notification.origin, "Remote update");
        match self.fetch(key).await {
            Ok(value) => self.raise_update(key, value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to refresh key");
                self.emit(SyncEvent::Error(e));
            }
        }
    }

    /// Read a key from the store and make the mirror agree with it.
    ///
    /// A value that does not decode is reported and read as absent.
    async fn fetch(&self, key: &str) -> Result<Option<Value>> {
        let raw = self.transport.get(&self.codec.data_key(key)).await?;
        let decoded = raw.and_then(|raw| match value::decode(key, &raw) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Undecodable stored value");
                self.emit(SyncEvent::Error(e.into()));
                None
            }
        });
        match &decoded {
            Some(v) => {
                self.mirror.insert(key.to_string(), v.clone());
            }
            None => {
                self.mirror.remove(key);
            }
        }
        Ok(decoded)
    }

    async fn remote_keys(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self.transport.keys(&self.codec.data_key(pattern)).await?)
    }

    async fn publish(&self, notification: Notification) -> Result<()> {
        let receivers = self
            .transport
            .publish(&self.channel, &notification.encode())
            .await?;
        tracing::trace!(key = %notification.key, receivers, "Notification published");
        Ok(())
    }

    fn raise_update(&self, key: &str, value: Option<Value>) {
        self.watches.dispatch(ChangeKind::Update, key, value.as_ref());
        self.emit(SyncEvent::Update {
            key: key.to_string(),
            value,
        });
    }

    fn raise_delete(&self, key: &str) {
        self.watches.dispatch(ChangeKind::Delete, key, None);
        self.emit(SyncEvent::Delete {
            key: key.to_string(),
        });
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is not an error
        let _ = self.events.send(event);
    }

    fn fail(&self, error: Error) {
        self.emit(SyncEvent::Error(error.clone()));
        self.readiness.send_modify(|r| {
            if r.failure.is_none() {
                r.failure = Some(error);
            }
        });
    }

    fn update_readiness(&self, mark: impl FnOnce(&mut Readiness)) {
        let mut became_ready = false;
        self.readiness.send_modify(|r| {
            let was_ready = r.is_ready();
            mark(r);
            became_ready = !was_ready && r.is_ready();
        });
        if became_ready {
            tracing::info!("Engine ready");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Command, MemoryBackend, Subscription, TransportResult};
    use serde_json::json;

    fn engine(backend: &Arc<MemoryBackend>, id: &str) -> SyncEngine {
        SyncEngine::new(
            Arc::new(backend.connect()),
            SyncConfig::default().with_client_id(id),
        )
    }

    #[tokio::test]
    async fn ready_resolves_and_is_repeatable() {
        let backend = MemoryBackend::new_shared();
        let e = engine(&backend, "a");
        e.ready().await.unwrap();
        e.ready().await.unwrap();
        assert_eq!(e.id().as_str(), "a");
    }

    #[tokio::test]
    async fn ready_reports_transport_failure() {
        let backend = MemoryBackend::new_shared();
        let transport = Arc::new(backend.connect());
        transport.disconnect().await;
        let e = SyncEngine::new(transport, SyncConfig::default());
        assert!(matches!(e.ready().await, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn key_helpers_follow_prefix() {
        let backend = MemoryBackend::new_shared();
        let e = SyncEngine::new(
            Arc::new(backend.connect()),
            SyncConfig::default().with_key_prefix("app:"),
        );
        assert_eq!(e.key("x"), "app:d:x");
        assert_eq!(e.strip_key_prefix("app:d:x"), Some("x"));
        assert_eq!(e.strip_key_prefix("d:d:x"), None);
    }

    #[tokio::test]
    async fn own_notification_raises_event_from_mirror() {
        let backend = MemoryBackend::new_shared();
        let e = engine(&backend, "a");
        e.ready().await.unwrap();
        let mut events = e.subscribe();

        e.set("k", json!({"n": 1})).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            SyncEvent::Update {
                key: "k".into(),
                value: Some(json!({"n": 1}))
            }
        );
    }

    #[tokio::test]
    async fn own_update_is_not_refetched_from_store() {
        let backend = MemoryBackend::new_shared();
        let e = engine(&backend, "a");
        e.ready().await.unwrap();
        let mut events = e.subscribe();

        e.set("k", json!(1)).await.unwrap();
        // Overwritten behind the engine's back before the notification is handled
        backend.connect().set("d:d:k", "999").await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            SyncEvent::Update {
                key: "k".into(),
                value: Some(json!(1))
            }
        );
        assert_eq!(e.get_sync("k"), Some(json!(1)));
    }

    #[tokio::test]
    async fn lost_subscription_is_reported() {
        let backend = MemoryBackend::new_shared();
        let e = engine(&backend, "a");
        e.ready().await.unwrap();
        let mut events = e.subscribe();

        e.transport().disconnect().await;

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            SyncEvent::Error(Error::Transport(TransportError::Disconnected))
        );
    }

    /// Store access works; announcing on the channel fails.
    struct MuteTransport(crate::transport::MemoryTransport);

    #[async_trait::async_trait]
    impl Transport for MuteTransport {
        async fn get(&self, key: &str) -> TransportResult<Option<String>> {
            self.0.get(key).await
        }
        async fn set(&self, key: &str, value: &str) -> TransportResult<()> {
            self.0.set(key, value).await
        }
        async fn mget(&self, keys: &[String]) -> TransportResult<Vec<Option<String>>> {
            self.0.mget(keys).await
        }
        async fn incr_by(&self, key: &str, amount: i64) -> TransportResult<i64> {
            self.0.incr_by(key, amount).await
        }
        async fn del(&self, keys: &[String]) -> TransportResult<u64> {
            self.0.del(keys).await
        }
        async fn keys(&self, pattern: &str) -> TransportResult<Vec<String>> {
            self.0.keys(pattern).await
        }
        async fn exists(&self, key: &str) -> TransportResult<bool> {
            self.0.exists(key).await
        }
        async fn smembers(&self, key: &str) -> TransportResult<Vec<String>> {
            self.0.smembers(key).await
        }
        async fn srem(&self, key: &str, members: &[String]) -> TransportResult<u64> {
            self.0.srem(key, members).await
        }
        async fn exec(&self, batch: Vec<Command>) -> TransportResult<()> {
            self.0.exec(batch).await
        }
        async fn publish(&self, _channel: &str, _message: &str) -> TransportResult<usize> {
            Err(TransportError::Command("publish refused".into()))
        }
        async fn subscribe(&self, channel: &str) -> TransportResult<Subscription> {
            self.0.subscribe(channel).await
        }
        async fn disconnect(&self) {
            self.0.disconnect().await
        }
    }

    #[tokio::test]
    async fn failed_delete_announce_still_clears_mirror() {
        let backend = MemoryBackend::new_shared();
        backend.connect().set("d:d:k", "1").await.unwrap();
        let e = SyncEngine::new(
            Arc::new(MuteTransport(backend.connect())),
            SyncConfig::default(),
        );
        e.ready().await.unwrap();
        assert_eq!(e.get_sync("k"), Some(json!(1)));

        assert!(matches!(
            e.delete("k").await,
            Err(Error::Transport(TransportError::Command(_)))
        ));
        assert_eq!(e.get_sync("k"), None);
        assert_eq!(backend.connect().get("d:d:k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn bootstrap_keeps_undecodable_values_as_raw_text() {
        let backend = MemoryBackend::new_shared();
        let raw = backend.connect();
        raw.set("d:d:good", "1").await.unwrap();
        raw.set("d:d:bad", "{oops").await.unwrap();

        let e = engine(&backend, "a");
        let mut events = e.subscribe();
        e.ready().await.unwrap();

        assert_eq!(e.get_sync("good"), Some(json!(1)));
        assert_eq!(e.get_sync("bad"), Some(json!("{oops")));
        assert!(matches!(
            events.try_recv(),
            Ok(SyncEvent::Error(Error::Engine(
                shared_data_engine::Error::Decode { .. }
            )))
        ));
    }

    #[tokio::test]
    async fn malformed_notification_does_not_stop_processing() {
        let backend = MemoryBackend::new_shared();
        let e = engine(&backend, "a");
        e.ready().await.unwrap();
        let mut events = e.subscribe();

        let raw = backend.connect();
        raw.publish("d::sync", "garbage").await.unwrap();
        e.set("after", json!(true)).await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), SyncEvent::Error(_)));
        assert_eq!(
            events.recv().await.unwrap(),
            SyncEvent::Update {
                key: "after".into(),
                value: Some(json!(true))
            }
        );
    }

    #[tokio::test]
    async fn decr_rejects_unrepresentable_amount() {
        let backend = MemoryBackend::new_shared();
        let e = engine(&backend, "a");
        assert!(matches!(
            e.decr("n", i64::MIN).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn live_set_is_optional() {
        let backend = MemoryBackend::new_shared();
        let with = engine(&backend, "a");
        let without = SyncEngine::new(
            Arc::new(backend.connect()),
            SyncConfig::default().with_live_set(false),
        );
        assert!(with.live_set().is_some());
        assert!(without.live_set().is_none());
    }
}
