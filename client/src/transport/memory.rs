//! In-process transport.
//!
//! [`MemoryBackend`] plays the part of the shared store: every engine that
//! connects to the same backend sees the same keys and the same channels, just
//! as separate processes pointed at one Redis would. Each
//! [`MemoryTransport`] is one connection to it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use shared_data_engine::KeyPattern;
use tokio::sync::mpsc;

use super::{Command, Subscription, Transport, TransportError, TransportResult};

#[derive(Debug, Clone)]
enum Stored {
    Str(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Entry {
    fn persistent(value: Stored) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug)]
struct Subscriber {
    conn_id: u64,
    sender: mpsc::UnboundedSender<String>,
}

/// Shared store and channel registry.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    store: Mutex<HashMap<String, Entry>>,
    channels: DashMap<String, Vec<Subscriber>>,
    next_conn_id: AtomicU64,
}

impl MemoryBackend {
    /// Create an empty backend wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a new connection.
    pub fn connect(self: &Arc<Self>) -> MemoryTransport {
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        MemoryTransport {
            id,
            backend: Arc::clone(self),
            closed: AtomicBool::new(false),
        }
    }

    /// Remaining time to live of a key, if it exists and expires.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut store = self.lock();
        purge(&mut store, key, now);
        store
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Number of live subscriptions on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map(|s| s.len()).unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn drop_subscribers(&self, conn_id: u64) {
        for mut subscribers in self.channels.iter_mut() {
            subscribers.retain(|s| s.conn_id != conn_id);
        }
        self.channels.retain(|_, subscribers| !subscribers.is_empty());
    }
}

/// Remove `key` if it has expired.
fn purge(store: &mut HashMap<String, Entry>, key: &str, now: Instant) {
    if store.get(key).is_some_and(|e| e.is_expired(now)) {
        store.remove(key);
    }
}

fn apply(
    store: &mut HashMap<String, Entry>,
    command: Command,
    now: Instant,
) -> TransportResult<()> {
    match command {
        Command::SetEx {
            key,
            value,
            ttl_secs,
        } => {
            if ttl_secs == 0 {
                return Err(TransportError::Command(format!(
                    "invalid expire time for '{}'",
                    key
                )));
            }
            store.insert(
                key,
                Entry {
                    value: Stored::Str(value),
                    expires_at: Some(now + Duration::from_secs(ttl_secs)),
                },
            );
        }
        Command::SAdd { key, member } => {
            purge(store, &key, now);
            let entry = store
                .entry(key.clone())
                .or_insert_with(|| Entry::persistent(Stored::Set(HashSet::new())));
            match &mut entry.value {
                Stored::Set(members) => {
                    members.insert(member);
                }
                Stored::Str(_) => return Err(TransportError::WrongType { key }),
            }
        }
        Command::Del { key } => {
            store.remove(&key);
        }
        Command::SRem { key, member } => {
            purge(store, &key, now);
            srem_locked(store, &key, std::slice::from_ref(&member))?;
        }
    }
    Ok(())
}

fn srem_locked(
    store: &mut HashMap<String, Entry>,
    key: &str,
    members: &[String],
) -> TransportResult<u64> {
    let Some(entry) = store.get_mut(key) else {
        return Ok(0);
    };
    let Stored::Set(set) = &mut entry.value else {
        return Err(TransportError::WrongType {
            key: key.to_string(),
        });
    };
    let removed = members.iter().filter(|m| set.remove(m.as_str())).count() as u64;
    if set.is_empty() {
        store.remove(key);
    }
    Ok(removed)
}

/// One connection to a [`MemoryBackend`].
#[derive(Debug)]
pub struct MemoryTransport {
    id: u64,
    backend: Arc<MemoryBackend>,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// The backend this connection talks to.
    pub fn backend(&self) -> &Arc<MemoryBackend> {
        &self.backend
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Disconnected)
        } else {
            Ok(())
        }
    }

    fn read_str(&self, key: &str) -> TransportResult<Option<String>> {
        let now = Instant::now();
        let mut store = self.backend.lock();
        purge(&mut store, key, now);
        match store.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Stored::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(TransportError::WrongType {
                key: key.to_string(),
            }),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn get(&self, key: &str) -> TransportResult<Option<String>> {
        self.ensure_open()?;
        self.read_str(key)
    }

    async fn set(&self, key: &str, value: &str) -> TransportResult<()> {
        self.ensure_open()?;
        self.backend.lock().insert(
            key.to_string(),
            Entry::persistent(Stored::Str(value.to_string())),
        );
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> TransportResult<Vec<Option<String>>> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut store = self.backend.lock();
        Ok(keys
            .iter()
            .map(|key| {
                purge(&mut store, key, now);
                match store.get(key.as_str()) {
                    Some(Entry {
                        value: Stored::Str(s),
                        ..
                    }) => Some(s.clone()),
                    // MGET reads non-string keys as missing
                    _ => None,
                }
            })
            .collect())
    }

    async fn incr_by(&self, key: &str, amount: i64) -> TransportResult<i64> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut store = self.backend.lock();
        purge(&mut store, key, now);
        let not_an_integer = || TransportError::NotAnInteger {
            key: key.to_string(),
        };
        match store.get_mut(key) {
            None => {
                store.insert(
                    key.to_string(),
                    Entry::persistent(Stored::Str(amount.to_string())),
                );
                Ok(amount)
            }
            Some(entry) => {
                let Stored::Str(current) = &mut entry.value else {
                    return Err(TransportError::WrongType {
                        key: key.to_string(),
                    });
                };
                let next = current
                    .parse::<i64>()
                    .map_err(|_| not_an_integer())?
                    .checked_add(amount)
                    .ok_or_else(not_an_integer)?;
                // TTL is kept, as INCRBY does
                *current = next.to_string();
                Ok(next)
            }
        }
    }

    async fn del(&self, keys: &[String]) -> TransportResult<u64> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut store = self.backend.lock();
        let mut removed = 0;
        for key in keys {
            purge(&mut store, key, now);
            if store.remove(key.as_str()).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> TransportResult<Vec<String>> {
        self.ensure_open()?;
        let matcher =
            KeyPattern::new(pattern).map_err(|e| TransportError::Command(e.to_string()))?;
        let now = Instant::now();
        let mut store = self.backend.lock();
        store.retain(|_, entry| !entry.is_expired(now));
        Ok(store
            .keys()
            .filter(|k| matcher.matches(k))
            .cloned()
            .collect())
    }

    async fn exists(&self, key: &str) -> TransportResult<bool> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut store = self.backend.lock();
        purge(&mut store, key, now);
        Ok(store.contains_key(key))
    }

    async fn smembers(&self, key: &str) -> TransportResult<Vec<String>> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut store = self.backend.lock();
        purge(&mut store, key, now);
        match store.get(key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Stored::Set(members),
                ..
            }) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(TransportError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn srem(&self, key: &str, members: &[String]) -> TransportResult<u64> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut store = self.backend.lock();
        purge(&mut store, key, now);
        srem_locked(&mut store, key, members)
    }

    async fn exec(&self, batch: Vec<Command>) -> TransportResult<()> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut store = self.backend.lock();
        for command in batch {
            apply(&mut store, command, now)?;
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> TransportResult<usize> {
        self.ensure_open()?;
        let Some(mut subscribers) = self.backend.channels.get_mut(channel) else {
            return Ok(0);
        };
        subscribers.retain(|s| s.sender.send(message.to_string()).is_ok());
        let delivered = subscribers.len();

        tracing::trace!(channel = %channel, recipients = delivered, "Published message");

        Ok(delivered)
    }

    async fn subscribe(&self, channel: &str) -> TransportResult<Subscription> {
        self.ensure_open()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        self.backend
            .channels
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber {
                conn_id: self.id,
                sender,
            });
        Ok(Subscription::new(channel, receiver))
    }

    async fn disconnect(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.backend.drop_subscribers(self.id);
            tracing::debug!(conn_id = self.id, "Memory transport disconnected");
        }
    }
}
