//! Regusto client library.
//!
//! The cache/sync core of the Regusto marketplace client:
//! - [`gateway`] - typed REST calls with auth, timeout and error mapping
//! - [`cache`] - keyed query cache with staleness, coalescing and invalidation
//! - [`mutation`] - optimistic writes with snapshot and rollback
//! - [`realtime`] - per-order chat channels feeding the cache
//!
//! Screens hold a [`ClientContext`] and call typed queries and actions on it.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod actions;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod mutation;
mod queries;
pub mod realtime;
pub mod scope;
pub mod session;

pub use actions::{CUSTOMER_SENDER, ChatFeed, Checkout, FavoriteTarget, PaymentReturn};
pub use cache::{CacheEvent, KeyMatch, QueryCache, QueryKey, Resource};
pub use config::{ClientConfig, ConfigError, PusherConfig, ReconnectConfig};
pub use context::ClientContext;
pub use error::ClientError;
pub use gateway::{ApiRequest, Gateway};
pub use mutation::{Mutation, MutationEngine, MutationStatus};
pub use realtime::{
    ChannelAdapter, ChannelEvent, ChannelStatus, EventStream, MemoryConnector, PusherConnector,
    RealtimeConnector,
};
pub use scope::ScreenScope;
pub use session::{
    FileSessionStore, MemorySessionStore, Session, SessionEvent, SessionStore,
};
