//! # shared-data
//!
//! A replicated, eventually consistent key/value mirror on top of a shared
//! store and its publish/subscribe channel.
//!
//! Every [`SyncEngine`] keeps a local mirror of one key namespace. Writes go
//! through to the store and are announced on a channel; every other engine on
//! that channel refreshes its mirror in response. There is no coordinator:
//! concurrent writes to one key resolve last-writer-wins at the store.
//!
//! ## Components
//!
//! - [`SyncEngine`] - the mirror, its write path and the notification handler
//! - [`WatchRouter`] - glob-pattern subscriptions to mirror changes
//! - [`LiveDataSet`] - TTL-based presence per group, independent of the mirror
//! - [`Transport`] - the store and channel the engine is layered on, with
//!   [`MemoryBackend`] as an in-process implementation
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use shared_data::{MemoryBackend, SyncConfig, SyncEngine};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> shared_data::Result<()> {
//! let backend = MemoryBackend::new_shared();
//! let engine = SyncEngine::new(Arc::new(backend.connect()), SyncConfig::default());
//! engine.ready().await?;
//!
//! engine.set("greeting", json!("hello")).await?;
//! assert_eq!(engine.get_sync("greeting"), Some(json!("hello")));
//!
//! assert_eq!(engine.incr("visits", 2).await?, 2);
//! assert_eq!(engine.sum_sync("visits")?, 2.0);
//!
//! engine.destroy().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod live;
pub mod sync;
pub mod transport;
pub mod watch;

// Re-export main types at crate root
pub use config::{ConfigError, SyncConfig};
pub use error::{Error, Result};
pub use event::{ChangeKind, SyncEvent};
pub use identity::ClientId;
pub use live::{LiveDataSet, LiveMember};
pub use sync::SyncEngine;
pub use transport::{
    Command, MemoryBackend, MemoryTransport, Subscription, Transport, TransportError,
};
pub use watch::{WatchEvent, WatchHandler, WatchRouter};
