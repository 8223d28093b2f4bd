//! # Shared sub-resource caching
//!
//! An in-memory cache that lets many independent document-loading contexts
//! (style-sheet loading, script loading, image loading) share previously
//! fetched sub-resources, coalesce concurrent requests for the same resource
//! into a single physical fetch, and evict entries in a principal- and
//! partition-aware way tied to document lifetime and privacy-clearing
//! requests.
//!
//! ## Architecture
//!
//! The crate is a generic engine, [`SharedSubResourceCache`], parameterized
//! over a [`LoadingNode`] type that ties together the four capabilities a
//! concrete resource kind provides:
//!
//! - [`CacheKey`]: resource identity within a partition (principal, content
//!   identity, kind-specific parameters).
//! - [`CacheValue`]: the parsed resource, shared and immutable once cached.
//! - [`Loader`]: one document's loading context.
//! - [`LoadingNode`]: one request, possibly the head or a passenger of a
//!   coalescing chain.
//!
//! The engine owns three keyed tables. `complete` holds finished values.
//! `loading` holds, per key, the head of the chain whose fetch is in flight,
//! as a weak reference: the fetch machinery owns the node while it loads.
//! `pending` holds deferred chains strongly: the cache is their sole owner
//! until they start.
//!
//! ## Request flow
//!
//! A loader calls [`lookup`](SharedSubResourceCache::lookup) before issuing
//! work. On [`Miss`](LookupResult::Miss) it starts a fetch and calls
//! [`load_started`](SharedSubResourceCache::load_started); a request nobody
//! needs yet is parked with [`defer_load`](SharedSubResourceCache::defer_load)
//! instead. Concurrent requests for the same key call
//! [`coalesce_load`](SharedSubResourceCache::coalesce_load) and become
//! passengers of the existing chain rather than fetching themselves. When the
//! fetch finishes, its owner calls [`insert`](SharedSubResourceCache::insert)
//! and [`load_completed`](SharedSubResourceCache::load_completed), after which
//! every lookup is served from the complete table.
//!
//! Eviction is principal-lifetime-driven rather than LRU:
//! [`register_loader`](SharedSubResourceCache::register_loader) /
//! [`unregister_loader`](SharedSubResourceCache::unregister_loader) refcount
//! documents per principal and the last unregister purges that principal's
//! entries, while [`clear_in_process`](SharedSubResourceCache::clear_in_process)
//! serves privacy-driven purges, including entries partitioned under a
//! cleared site.
//!
//! ## Concurrency model
//!
//! Single-threaded and cooperative. Every operation runs on the thread
//! owning the cache instance, nothing blocks, and "waiting" for a coalesced
//! fetch is modeled entirely outside the cache via callbacks on the node;
//! the cache tracks who is waiting, not how they are resumed. Per-kind
//! shared instances have an explicit lifecycle via [`CacheSingleton`].

mod cache;
mod config;
mod expiration;
mod metadata;
mod node;
mod principal;
mod singleton;

#[cfg(test)]
mod tests;

pub use cache::{CachedSubResourceState, LookupResult, SharedSubResourceCache};
pub use config::{CacheConfig, ConfigError};
pub use expiration::CacheExpirationTime;
pub use metadata::{NetworkMetadata, PerformanceTimingData, ResponseHead};
pub use node::{CacheKey, CacheValue, ChainIter, ChainLink, Loader, LoadingNode, iter_chain};
pub use principal::{
    OriginAttributes, OriginAttributesPattern, PartitionKey, PartitionKeyPattern, Principal,
};
pub use singleton::CacheSingleton;
