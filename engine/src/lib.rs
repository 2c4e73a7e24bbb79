//! # shared-data engine
//!
//! Protocol core for a replicated key/value mirror layered on a shared store
//! and its publish/subscribe channel.
//!
//! This crate holds the parts of the protocol that need no I/O. The async
//! engine that talks to a store lives in the `shared-data` crate.
//!
//! ## Design Principles
//!
//! - **No IO**: nothing here touches the network or spawns tasks
//! - **Store is the source of truth**: notifications name a key, never carry its value
//! - **Portable**: the same layout and wire format for every process sharing a store
//!
//! ## Core Concepts
//!
//! ### Key layout
//!
//! [`KeyCodec`] maps logical keys to `{prefix}{marker}{key}` physical keys.
//! Mirrored values, live-set values and live-set member sets each get their own
//! marker.
//!
//! ### Patterns
//!
//! [`KeyPattern`] compiles a glob with `*` wildcards into an anchored matcher.
//!
//! ### Notifications
//!
//! [`Notification`] is the `{k, i, d?}` message published after every write.
//!
//! ## Quick Start
//!
//! ```rust
//! use shared_data_engine::{KeyCodec, KeyPattern, Notification};
//!
//! let codec = KeyCodec::new("app:");
//! assert_eq!(codec.data_key("sum:1"), "app:d:sum:1");
//! assert_eq!(codec.strip_data_key("app:d:sum:1"), Some("sum:1"));
//!
//! let pattern = KeyPattern::new("sum:*").unwrap();
//! assert!(pattern.matches("sum:1"));
//!
//! let wire = Notification::delete("sum:1", "client-a").encode();
//! assert_eq!(wire, r#"{"k":"sum:1","i":"client-a","d":1}"#);
//! ```

pub mod codec;
pub mod error;
pub mod message;
pub mod pattern;
pub mod value;

// Re-export main types at crate root
pub use codec::KeyCodec;
pub use error::{Error, Result};
pub use message::Notification;
pub use pattern::KeyPattern;

