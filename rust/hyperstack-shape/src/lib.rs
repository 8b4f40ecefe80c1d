//! # hyperstack-shape
//!
//! Shape stream caching and reactive bindings for real-time sync clients.
//!
//! A sync client exposes two long-lived objects per subscription: a
//! *shape stream* that follows the server, and a *shape* that materializes
//! the stream's rows. This crate makes sure equal options share one stream
//! and one shape, and turns the shape's change callbacks into `watch`
//! cells that UI layers can observe.
//!
//! ## Example
//!
//! ```rust,ignore
//! use hyperstack_shape::prelude::*;
//!
//! let cache = ShapeCache::new(MemoryClient::new());
//! let options = ShapeStreamOptions::new("http://localhost:3000/v1/shape")
//!     .with_params(ShapeParams::new("items"));
//!
//! let shape = cache.preload_shape(options.clone()).await?;
//! let items = use_shape(&cache, options);
//! println!("loading: {}", items.value().is_loading);
//! ```
//!
//! ## Eviction
//!
//! Entries leave the cache only when the abort signal on their options
//! fires, and only on the next lookup for them. Aborting never evicts by
//! itself.

mod cache;
mod canonical;
mod client;
mod config;
mod error;
pub mod memory;
pub mod prelude;
mod reactive;
mod signal;

pub use cache::{CacheStats, ShapeCache};
pub use canonical::{canonicalize, sort_object_keys, sorted_options_hash};
pub use client::{ChangeCallback, Row, ShapeClient, ShapeHandle, ShapeStreamHandle, Unsubscribe};
pub use config::{FetchClient, Replica, ShapeParams, ShapeStreamOptions};
pub use error::FetchError;
pub use memory::{MemoryClient, MemoryShape, MemoryShapeStream};
pub use reactive::{use_shape, use_shape_with, Selector, UseShape, UseShapeBinding, UseShapeResult};
pub use signal::{AbortController, AbortSignal};

pub use serde_json::Value;
