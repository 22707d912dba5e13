//! Regusto Core - Shared domain types.
//!
//! This crate provides the server-owned records the marketplace client caches
//! and mutates:
//! - stores, products, baskets and product instances
//! - cart lines and the cart arithmetic used for optimistic writes
//! - orders with their one-way status progression and one-shot rating
//! - saved addresses, ratings and order chat messages
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no HTTP
//! clients, no cache. The `regusto-client` crate builds the cache/sync layer
//! on top of it.
//!
//! # Modules
//!
//! - [`types`] - Newtype ids, prices, statuses and entity records

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
