//! The cache engine: keyed state tables and the lookup/coalesce/eviction
//! state machine.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;

use crate::config::CacheConfig;
use crate::expiration::CacheExpirationTime;
use crate::metadata::NetworkMetadata;
use crate::node::{CacheKey, CacheValue, Loader, LoadingNode, iter_chain};
use crate::principal::{OriginAttributesPattern, Principal};

/// The cache's knowledge about a key, as returned by
/// [`SharedSubResourceCache::lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedSubResourceState {
    /// Nothing known; the caller must start a fetch.
    Miss,
    /// A fetch for this key is in flight.
    Loading,
    /// A deferred chain for this key is waiting to start.
    Pending,
    /// A finished value is available.
    Complete,
}

/// A finished load, snapshot into the complete table.
pub(crate) struct CompleteSubResource<N: LoadingNode> {
    value: Rc<N::Value>,
    network_metadata: Option<Rc<NetworkMetadata>>,
    expiration: CacheExpirationTime,
    was_sync_load: bool,
}

impl<N: LoadingNode> CompleteSubResource<N> {
    fn new(node: &N, config: &CacheConfig) -> Self {
        let mut expiration = node.expiration_time();
        if let Some(ttl) = config.default_expiration {
            expiration = expiration.earliest(CacheExpirationTime::from_now(ttl));
        }
        Self {
            value: node.value_for_cache(),
            network_metadata: node.network_metadata(),
            expiration,
            was_sync_load: node.is_sync_load(),
        }
    }

    fn expired(&self) -> bool {
        self.expiration.is_expired()
    }
}

/// A point-in-time snapshot of the cache's state for one key.
///
/// Returned by [`SharedSubResourceCache::lookup`] and never updated
/// afterwards; look the key up again if the cache may have changed in the
/// meantime.
pub enum LookupResult<N: LoadingNode> {
    /// Nothing cached or in flight for this key.
    Miss,
    /// The head of the in-flight chain for this key.
    Loading(Rc<N>),
    /// The head of the deferred chain for this key.
    Pending(Rc<N>),
    /// A finished value.
    Complete {
        value: Rc<N::Value>,
        network_metadata: Option<Rc<NetworkMetadata>>,
    },
}

impl<N: LoadingNode> LookupResult<N> {
    /// The state this result represents, in the form
    /// [`SharedSubResourceCache::coalesce_load`] takes.
    pub fn state(&self) -> CachedSubResourceState {
        match self {
            Self::Miss => CachedSubResourceState::Miss,
            Self::Loading(_) => CachedSubResourceState::Loading,
            Self::Pending(_) => CachedSubResourceState::Pending,
            Self::Complete { .. } => CachedSubResourceState::Complete,
        }
    }
}

/// An in-memory cache sharing sub-resources across documents.
///
/// The engine owns three keyed tables and a principal refcount table:
///
/// - `complete`: finished values, served by [`lookup`](Self::lookup).
/// - `loading`: the head of the chain whose fetch is in flight, held
///   weakly. The fetch machinery owns the node's lifetime while it loads.
/// - `pending`: the head of a deferred chain, held strongly. The cache is
///   the sole owner until the chain starts or is cancelled.
/// - principal refcounts: how many registered loaders exist per principal.
///   The last [`unregister_loader`](Self::unregister_loader) for a
///   principal purges its complete entries.
///
/// For a given key, at most one of `loading` and `pending` is populated.
///
/// All state lives in `RefCell`s and the engine is confined to the thread
/// that created it; it performs no locking and no operation blocks. Borrows
/// are released before the engine calls back into nodes or loaders, so
/// callbacks may perform fresh lookups.
pub struct SharedSubResourceCache<N: LoadingNode> {
    name: &'static str,
    config: CacheConfig,
    complete: RefCell<FxHashMap<N::Key, CompleteSubResource<N>>>,
    pending: RefCell<FxHashMap<N::Key, Rc<N>>>,
    loading: RefCell<FxHashMap<N::Key, Weak<N>>>,
    loader_principal_refcnt: RefCell<FxHashMap<Principal, u32>>,
}

impl<N: LoadingNode> std::fmt::Debug for SharedSubResourceCache<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSubResourceCache")
            .field("name", &self.name)
            .field("complete entries", &self.complete.borrow().len())
            .field("pending chains", &self.pending.borrow().len())
            .field("loading chains", &self.loading.borrow().len())
            .field("registered principals", &self.loader_principal_refcnt.borrow().len())
            .finish()
    }
}

impl<N: LoadingNode> SharedSubResourceCache<N> {
    /// Creates a cache with the default configuration. The name tags log
    /// events, e.g. the resource kind ("style", "script", "image").
    pub fn new(name: &'static str) -> Self {
        Self::with_config(name, CacheConfig::default())
    }

    pub fn with_config(name: &'static str, config: CacheConfig) -> Self {
        Self {
            name,
            config,
            complete: Default::default(),
            pending: Default::default(),
            loading: Default::default(),
            loader_principal_refcnt: Default::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Looks up the cache's state for a key.
    ///
    /// A complete entry is returned when it is fresh and the loader is not
    /// bypassing the cache, or unconditionally when the loader has already
    /// used this key: a document keeps seeing the copy it loaded, staleness
    /// notwithstanding.
    ///
    /// Synchronous loads never join an in-flight async fetch, since that
    /// would mean blocking on a foreign completion; they miss instead.
    pub fn lookup(&self, loader: &N::Loader, key: &N::Key, sync_load: bool) -> LookupResult<N> {
        if let Some(complete) = self.complete.borrow().get(key) {
            if (!loader.should_bypass_cache() && !complete.expired()) || loader.has_loaded(key) {
                return LookupResult::Complete {
                    value: Rc::clone(&complete.value),
                    network_metadata: complete.network_metadata.clone(),
                };
            }
        }

        if sync_load {
            return LookupResult::Miss;
        }

        if let Some(node) = self.loading.borrow().get(key).and_then(Weak::upgrade) {
            return LookupResult::Loading(node);
        }

        if let Some(node) = self.pending.borrow().get(key) {
            return LookupResult::Pending(Rc::clone(node));
        }

        LookupResult::Miss
    }

    /// Tries to coalesce a new request with an already existing load for
    /// the same key. `existing_state` must be the state a prior
    /// [`lookup`](Self::lookup) returned.
    ///
    /// Returns `true` when the new node was attached as a passenger and the
    /// caller must not start its own fetch.
    ///
    /// Returns `false` when no load exists for the key, or when a pending
    /// chain was promoted: a non-deferring request for a pending key
    /// detaches the pending chain and takes it along as passengers, and the
    /// new node, now the chain head, must trigger the physical fetch. The
    /// head of a chain is always the node whose fetch is authoritative.
    pub fn coalesce_load(
        &self,
        key: &N::Key,
        new_load: &Rc<N>,
        existing_state: CachedSubResourceState,
    ) -> bool {
        debug_assert!(new_load.cache_key() == *key);

        let existing = match existing_state {
            CachedSubResourceState::Loading => {
                let existing = self.loading.borrow().get(key).and_then(Weak::upgrade);
                debug_assert!(existing.is_some(), "caller lied about the state");
                existing
            }
            CachedSubResourceState::Pending => {
                let existing = self.pending.borrow().get(key).cloned();
                debug_assert!(existing.is_some(), "caller lied about the state");
                existing
            }
            _ => None,
        };

        let Some(existing) = existing else {
            return false;
        };

        if existing_state == CachedSubResourceState::Pending && !new_load.should_defer() {
            // Someone cares about this load right away; kick it off.
            let removed = self.pending.borrow_mut().remove(key);
            debug_assert!(
                removed.as_ref().is_some_and(|removed| Rc::ptr_eq(removed, &existing)),
                "bad pending table"
            );
            tracing::trace!(cache = self.name, "promoting pending chain");

            self.will_start_pending_load(&existing);

            // The new load goes to the front, not the back, to keep the
            // invariant that the chain head is the node triggering the
            // fetch.
            new_load.link().set_next(Some(existing));
            return false;
        }

        let mut tail = Rc::clone(&existing);
        while let Some(next) = tail.link().next() {
            tail = next;
        }
        tail.link().set_next(Some(Rc::clone(new_load)));

        new_load.on_coalesced_to(&existing);
        true
    }

    /// Records a node whose physical fetch is starting.
    ///
    /// The loading table keeps only a weak reference; the fetch machinery
    /// owns the node's lifetime while it loads.
    pub fn load_started(&self, key: &N::Key, node: &Rc<N>) {
        debug_assert!(!node.is_loading(), "already loading? how?");
        debug_assert!(node.cache_key() == *key);
        debug_assert!(!self.loading.borrow().contains_key(key), "load not coalesced?");
        debug_assert!(
            !self.pending.borrow().contains_key(key),
            "starting a load that is still parked as pending"
        );
        node.start_loading();
        debug_assert!(node.is_loading(), "start_loading must be effectful");
        self.loading.borrow_mut().insert(key.clone(), Rc::downgrade(node));
    }

    /// Removes a finished load from the loading table.
    ///
    /// Does nothing when the node is not marked loading, so redundant
    /// completion signals (e.g. after cancellation) are harmless.
    pub fn load_completed(&self, node: &N) {
        if !node.is_loading() {
            return;
        }
        let key = node.cache_key();
        let removed = self.loading.borrow_mut().remove(&key);
        debug_assert!(removed.is_some());
        node.set_load_completed();
        debug_assert!(!node.is_loading(), "set_load_completed must be effectful");
    }

    /// Snapshots a finished load into the complete table.
    ///
    /// No-op when the cache is disabled by configuration.
    pub fn insert(&self, node: &N) {
        if !self.config.enabled {
            return;
        }
        let key = node.cache_key();

        #[cfg(debug_assertions)]
        if let Some(existing) = self.complete.borrow().get(&key) {
            // Overwriting a fresh entry is only expected when the loader
            // bypasses the cache, or a sync placeholder is superseded by an
            // async result.
            debug_assert!(
                existing.expired()
                    || node.loader().should_bypass_cache()
                    || (existing.was_sync_load && !node.is_sync_load()),
                "overriding existing complete entry?"
            );
        }

        tracing::trace!(cache = self.name, "inserting complete entry");
        self.complete
            .borrow_mut()
            .insert(key, CompleteSubResource::new(node, &self.config));
    }

    /// Parks a load in the pending table, as the sole node of a new chain.
    ///
    /// A node may only be deferred once, and only before it was coalesced
    /// with anything.
    pub fn defer_load(&self, key: &N::Key, node: &Rc<N>) {
        debug_assert!(node.cache_key() == *key);
        debug_assert!(!node.link().has_next(), "should only defer loads once");
        debug_assert!(
            !self.loading.borrow().contains_key(key),
            "deferring a load that is already in flight"
        );

        self.pending.borrow_mut().insert(key.clone(), Rc::clone(node));
    }

    /// Starts every pending chain that contains a node of the given loader
    /// satisfying the predicate.
    ///
    /// A chain starts atomically as a group, since all of its nodes share
    /// one eventual fetch: the whole chain leaves the pending table, every
    /// node's loader is notified, and the chain head's
    /// [`start_pending_load`](LoadingNode::start_pending_load) triggers the
    /// physical fetch.
    pub fn start_pending_loads_for_loader(
        &self,
        loader: &Rc<N::Loader>,
        should_start_load: impl Fn(&N) -> bool,
    ) {
        let to_start: Vec<N::Key> = self
            .pending
            .borrow()
            .iter()
            .filter(|(_, head)| {
                iter_chain(head)
                    .any(|node| Rc::ptr_eq(node.loader(), loader) && should_start_load(&node))
            })
            .map(|(key, _)| key.clone())
            .collect();

        let mut chains = Vec::with_capacity(to_start.len());
        {
            let mut pending = self.pending.borrow_mut();
            for key in &to_start {
                if let Some(head) = pending.remove(key) {
                    chains.push(head);
                }
            }
        }

        for head in chains {
            self.will_start_pending_load(&head);
            head.start_pending_load();
        }
    }

    /// Withdraws a loader's interest in every pending chain.
    ///
    /// Only the loader's own nodes are spliced out; other loaders'
    /// passengers stay, and a chain leaves the pending table only when it
    /// becomes empty. Each detached node gets
    /// [`did_cancel_load`](LoadingNode::did_cancel_load) once the tables
    /// are consistent again.
    pub fn cancel_pending_loads_for_loader(&self, loader: &Rc<N::Loader>) {
        let mut cancelled = Vec::new();

        self.pending.borrow_mut().retain(|_, head| {
            // Detach matching nodes from the front until a foreign node
            // heads the chain.
            while Rc::ptr_eq(head.loader(), loader) {
                let detached = Rc::clone(head);
                let rest = detached.link().take_next();
                cancelled.push(detached);
                match rest {
                    Some(rest) => *head = rest,
                    None => return false,
                }
            }

            // Splice matching nodes out of the rest of the chain.
            let mut prev = Rc::clone(head);
            while let Some(current) = prev.link().next() {
                if Rc::ptr_eq(current.loader(), loader) {
                    prev.link().set_next(current.link().take_next());
                    cancelled.push(current);
                } else {
                    prev = current;
                }
            }

            true
        });

        for node in cancelled {
            node.did_cancel_load();
        }
    }

    /// Cancels everything the given loader is waiting on.
    ///
    /// Pending nodes are detached as in
    /// [`cancel_pending_loads_for_loader`](Self::cancel_pending_loads_for_loader).
    /// In-flight nodes are merely marked cancelled: the physical fetch, and
    /// any other coalesced consumer, continues.
    pub fn cancel_loads_for_loader(&self, loader: &Rc<N::Loader>) {
        self.cancel_pending_loads_for_loader(loader);

        let loading: Vec<Rc<N>> = self
            .loading
            .borrow()
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        for head in loading {
            for node in iter_chain(&head) {
                if Rc::ptr_eq(node.loader(), loader) {
                    node.cancel();
                    debug_assert!(node.is_cancelled());
                }
            }
        }
    }

    /// Registers a loader, keeping every sub-resource of its principal
    /// alive until the matching [`unregister_loader`](Self::unregister_loader).
    pub fn register_loader(&self, loader: &N::Loader) {
        *self
            .loader_principal_refcnt
            .borrow_mut()
            .entry(loader.principal().clone())
            .or_insert(0) += 1;
    }

    /// Unregisters a loader.
    ///
    /// When this was the last registered loader for its principal, every
    /// complete entry of that principal is purged: a sub-resource is only
    /// useful while at least one live consumer of its principal exists.
    pub fn unregister_loader(&self, loader: &N::Loader) {
        let principal = loader.principal();
        let purge = {
            let mut refcnt = self.loader_principal_refcnt.borrow_mut();
            let Some(count) = refcnt.get_mut(principal) else {
                debug_assert!(false, "unregistering an unknown loader principal");
                return;
            };
            debug_assert!(*count > 0);
            *count = count.saturating_sub(1);
            if *count == 0 {
                refcnt.remove(principal);
                true
            } else {
                false
            }
        };

        if purge {
            let mut complete = self.complete.borrow_mut();
            let before = complete.len();
            complete.retain(|key, _| key.principal() != principal);
            tracing::debug!(
                cache = self.name,
                principal = principal.origin(),
                purged = before - complete.len(),
                "last loader for principal unregistered"
            );
        }
    }

    /// Clears complete entries for a privacy-clearing request.
    ///
    /// - Neither argument: clears the whole complete table.
    /// - `principal`: clears entries whose key has exactly that principal.
    /// - `site` plus `pattern`: clears entries whose partition principal's
    ///   base domain is the site and whose attributes match the pattern,
    ///   and also entries of other sites that were partitioned under the
    ///   given site. Clearing a site thereby also clears third-party copies
    ///   loaded while visiting it. `site` and `pattern` must be passed
    ///   together.
    pub fn clear_in_process(
        &self,
        principal: Option<&Principal>,
        site: Option<&str>,
        pattern: Option<&OriginAttributesPattern>,
    ) {
        debug_assert_eq!(
            site.is_some(),
            pattern.is_some(),
            "must pass both site and attributes pattern"
        );

        if principal.is_none() && site.is_none() {
            tracing::debug!(cache = self.name, "clearing all complete entries");
            self.complete.borrow_mut().clear();
            return;
        }

        let mut complete = self.complete.borrow_mut();
        let before = complete.len();
        complete.retain(|key, _| {
            if let Some(principal) = principal {
                if key.principal() == principal {
                    return false;
                }
            }

            let (Some(site), Some(pattern)) = (site, pattern) else {
                return true;
            };

            let partition_principal = key.partition_principal();

            // Entries of the site itself, subject to the caller's pattern.
            if partition_principal.base_domain() == site
                && pattern.matches(partition_principal.attributes())
            {
                return false;
            }

            // Entries of other sites partitioned under this one. The
            // caller's pattern still applies, e.g. a private-browsing-only
            // pattern only clears partitioned private browsing data.
            !pattern
                .scoped_to_partition(site)
                .matches(partition_principal.attributes())
        });
        tracing::debug!(
            cache = self.name,
            cleared = before - complete.len(),
            "cleared complete entries"
        );
    }

    /// The approximate heap footprint of the cached values, via each
    /// value's [`CacheValue::size_of`] hook.
    pub fn size_of(&self) -> usize {
        let complete = self.complete.borrow();
        let mut n = complete.capacity()
            * std::mem::size_of::<(N::Key, CompleteSubResource<N>)>();
        for entry in complete.values() {
            n += entry.value.size_of();
        }
        n
    }

    /// Notifies every node in the chain that its deferred load is about to
    /// start.
    fn will_start_pending_load(&self, head: &Rc<N>) {
        for node in iter_chain(head) {
            node.loader().will_start_pending_load();
        }
    }
}
