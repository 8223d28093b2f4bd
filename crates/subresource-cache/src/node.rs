//! The trait seam between the cache engine and a concrete resource kind,
//! plus the intrusive chain that coalesced requests form.
//!
//! A cache instantiation provides four things: a [`CacheKey`] identifying a
//! resource within a partition, a [`CacheValue`] holding the parsed result, a
//! [`Loader`] representing one document's loading context, and a
//! [`LoadingNode`] representing one request. Requests for the same key share
//! one physical fetch by chaining their nodes through a [`ChainLink`]: the
//! chain head is the node whose fetch is authoritative, every later node is a
//! passenger reusing its eventual result.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use crate::expiration::CacheExpirationTime;
use crate::metadata::NetworkMetadata;
use crate::principal::Principal;

/// Identity of a cacheable resource within a partition.
pub trait CacheKey: Clone + Eq + Hash {
    /// The principal of the loader this resource was fetched for.
    ///
    /// Entries are purged when the last registered loader for this
    /// principal unregisters.
    fn principal(&self) -> &Principal;

    /// The principal carrying the partitioning attributes, used by
    /// site-scoped clearing. Often the same as [`Self::principal`].
    fn partition_principal(&self) -> &Principal;
}

/// The parsed resource stored in the cache.
///
/// Values are shared and immutable once cached; their lifetime is that of
/// the longest-lived holder.
pub trait CacheValue {
    /// The heap footprint of this value, for memory reporting.
    fn size_of(&self) -> usize;
}

/// One document's resource-loading context.
pub trait Loader {
    type Key: CacheKey;

    /// The principal whose lifetime keeps this loader's cache entries alive.
    fn principal(&self) -> &Principal;

    /// Whether this loader was asked to bypass caches (e.g. a force reload).
    fn should_bypass_cache(&self) -> bool;

    /// Whether this loader has already used the resource with the given key.
    ///
    /// A stale or bypassed entry is still served when this returns `true`:
    /// a document must keep seeing the same copy of a resource it already
    /// loaded.
    fn has_loaded(&self, key: &Self::Key) -> bool;

    /// Called when a load this loader deferred is about to start for real.
    fn will_start_pending_load(&self);
}

/// One in-flight or deferred request for a cacheable resource.
///
/// The cache engine drives the state transitions below but never performs
/// network I/O itself; starting, finishing, and canceling the physical fetch
/// is the implementor's business.
pub trait LoadingNode: Sized {
    type Key: CacheKey;
    type Value: CacheValue;
    type Loader: Loader<Key = Self::Key>;

    /// The cache key this request resolves to.
    fn cache_key(&self) -> Self::Key;

    /// The loader that issued this request.
    fn loader(&self) -> &Rc<Self::Loader>;

    /// The intrusive link chaining coalesced requests for the same key.
    fn link(&self) -> &ChainLink<Self>;

    /// Whether the physical fetch for this node is in flight.
    fn is_loading(&self) -> bool;

    /// Whether this request was cancelled.
    fn is_cancelled(&self) -> bool;

    /// Whether this request is synchronous. Sync loads never join an async
    /// in-flight fetch.
    fn is_sync_load(&self) -> bool;

    /// Whether this request would rather wait in the pending table than
    /// fetch right away (e.g. a non-matching media query).
    fn should_defer(&self) -> bool;

    /// The metadata of the finished fetch, once available.
    fn network_metadata(&self) -> Option<Rc<NetworkMetadata>>;

    /// Marks the fetch as in flight. Must make [`Self::is_loading`] true.
    fn start_loading(&self);

    /// Marks the fetch as finished. Must make [`Self::is_loading`] false.
    fn set_load_completed(&self);

    /// Called when this node was appended to an existing chain instead of
    /// starting its own fetch.
    fn on_coalesced_to(&self, head: &Self);

    /// Withdraws this node's interest in the result. The physical fetch
    /// keeps running for the remaining coalesced consumers.
    fn cancel(&self);

    /// Called on the head of a pending chain when the chain should start
    /// its physical fetch.
    fn start_pending_load(&self);

    /// Called on a node spliced out of a pending chain: mark it cancelled
    /// and run its completion callback.
    fn did_cancel_load(&self);

    /// The finished value, to be snapshot into the cache.
    fn value_for_cache(&self) -> Rc<Self::Value>;

    /// When the finished value goes stale.
    fn expiration_time(&self) -> CacheExpirationTime;
}

/// The intrusive `next` link of a coalescing chain.
///
/// Each node exclusively owns its successor. Embed one of these in a
/// [`LoadingNode`] implementation and return it from
/// [`LoadingNode::link`].
pub struct ChainLink<N: LoadingNode> {
    next: RefCell<Option<Rc<N>>>,
}

impl<N: LoadingNode> ChainLink<N> {
    pub fn new() -> Self {
        Self {
            next: RefCell::new(None),
        }
    }

    /// The next node in the chain, if any.
    pub fn next(&self) -> Option<Rc<N>> {
        self.next.borrow().clone()
    }

    pub fn has_next(&self) -> bool {
        self.next.borrow().is_some()
    }

    pub(crate) fn set_next(&self, next: Option<Rc<N>>) {
        *self.next.borrow_mut() = next;
    }

    pub(crate) fn take_next(&self) -> Option<Rc<N>> {
        self.next.borrow_mut().take()
    }
}

impl<N: LoadingNode> Default for ChainLink<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: LoadingNode> Drop for ChainLink<N> {
    fn drop(&mut self) {
        // Unlink successors one at a time: naively dropping the head of a
        // long chain would recurse once per node and can blow the stack.
        let mut next = self.next.get_mut().take();
        while let Some(node) = next {
            next = match Rc::into_inner(node) {
                // We held the last reference; steal its successor before the
                // node drops so its own link is already empty.
                Some(node) => node.link().take_next(),
                // Someone else still owns the rest of the chain.
                None => None,
            };
        }
    }
}

/// Iterates a chain from the given node to its tail, inclusive.
pub fn iter_chain<N: LoadingNode>(head: &Rc<N>) -> ChainIter<N> {
    ChainIter {
        current: Some(Rc::clone(head)),
    }
}

/// Iterator over the nodes of a coalescing chain. See [`iter_chain`].
pub struct ChainIter<N: LoadingNode> {
    current: Option<Rc<N>>,
}

impl<N: LoadingNode> Iterator for ChainIter<N> {
    type Item = Rc<N>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current.take()?;
        self.current = node.link().next();
        Some(node)
    }
}
