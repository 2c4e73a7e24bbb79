//! Store and pub/sub transport.
//!
//! The engine never talks to a concrete store. It issues commands through the
//! [`Transport`] trait, which mirrors the small subset of Redis the protocol
//! needs: string get/set, integer increment, key listing by glob, sets, expiry,
//! atomic batches and publish/subscribe.

mod memory;

pub use memory::{MemoryBackend, MemoryTransport};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Errors raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Disconnected,

    #[error("value at '{key}' is not an integer or out of range")]
    NotAnInteger { key: String },

    #[error("operation against a key holding the wrong kind of value: {key}")]
    WrongType { key: String },

    #[error("command failed: {0}")]
    Command(String),
}

/// Result type for transport commands.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// One command inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Write a string value that expires after `ttl_secs` whole seconds.
    SetEx {
        key: String,
        value: String,
        ttl_secs: u64,
    },
    /// Add a member to a set.
    SAdd { key: String, member: String },
    /// Delete a key of any kind.
    Del { key: String },
    /// Remove a member from a set.
    SRem { key: String, member: String },
}

/// A live subscription to one channel.
///
/// Messages arrive in publish order. The stream ends when the owning
/// connection disconnects.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    receiver: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    /// Wrap a receiver fed by the transport.
    pub fn new(channel: impl Into<String>, receiver: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
        }
    }

    /// The subscribed channel.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next message. Returns `None` once the subscription ended.
    pub async fn next_message(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

/// Commands the engine issues against the shared store.
///
/// Implementations must deliver published messages to every current subscriber
/// of a channel in publish order, at least once.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// GET. Missing keys read as `None`.
    async fn get(&self, key: &str) -> TransportResult<Option<String>>;

    /// SET without expiry.
    async fn set(&self, key: &str, value: &str) -> TransportResult<()>;

    /// MGET. The result is positionally aligned with `keys`.
    async fn mget(&self, keys: &[String]) -> TransportResult<Vec<Option<String>>>;

    /// INCRBY. A missing key starts from 0.
    async fn incr_by(&self, key: &str, amount: i64) -> TransportResult<i64>;

    /// DEL. Returns how many keys existed.
    async fn del(&self, keys: &[String]) -> TransportResult<u64>;

    /// KEYS with a `*` glob over physical keys.
    async fn keys(&self, pattern: &str) -> TransportResult<Vec<String>>;

    /// EXISTS for a single key.
    async fn exists(&self, key: &str) -> TransportResult<bool>;

    /// SMEMBERS. A missing set reads as empty.
    async fn smembers(&self, key: &str) -> TransportResult<Vec<String>>;

    /// SREM. Returns how many members were removed.
    async fn srem(&self, key: &str, members: &[String]) -> TransportResult<u64>;

    /// Run a batch atomically: no other command observes a partial batch.
    async fn exec(&self, batch: Vec<Command>) -> TransportResult<()>;

    /// PUBLISH. Returns the number of subscriptions that received the message.
    async fn publish(&self, channel: &str, message: &str) -> TransportResult<usize>;

    /// SUBSCRIBE. The returned subscription is active when this resolves.
    ///
    /// A connection in subscriber mode cannot run other commands, so a
    /// networked implementation opens a dedicated connection for each
    /// subscription and keeps commands on its own.
    async fn subscribe(&self, channel: &str) -> TransportResult<Subscription>;

    /// Close the connection and every subscription opened through it.
    async fn disconnect(&self);
}
