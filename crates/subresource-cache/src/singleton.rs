//! A per-kind shared cache instance with an explicit lifecycle.

use std::cell::RefCell;
use std::rc::Rc;

use crate::cache::SharedSubResourceCache;
use crate::node::LoadingNode;

/// A slot holding the shared cache instance for one resource kind.
///
/// The cache engine is thread-confined, so the slot is meant to live in a
/// `thread_local!` of the owner thread:
///
/// ```ignore
/// thread_local! {
///     static STYLE_CACHE: CacheSingleton<StyleLoad> = const { CacheSingleton::new() };
/// }
/// ```
///
/// Unlike a lazy global, the lifecycle is visible: the instance exists from
/// the first [`get_or_init`](Self::get_or_init) until an explicit
/// [`delete`](Self::delete) at shutdown. Code that can pass a cache down
/// explicitly should prefer doing that; independent instances via
/// [`SharedSubResourceCache::new`] make tests hermetic.
pub struct CacheSingleton<N: LoadingNode> {
    slot: RefCell<Option<Rc<SharedSubResourceCache<N>>>>,
}

impl<N: LoadingNode> CacheSingleton<N> {
    pub const fn new() -> Self {
        Self {
            slot: RefCell::new(None),
        }
    }

    /// Returns the shared instance, creating it with `init` if the slot is
    /// empty.
    pub fn get_or_init(
        &self,
        init: impl FnOnce() -> SharedSubResourceCache<N>,
    ) -> Rc<SharedSubResourceCache<N>> {
        let mut slot = self.slot.borrow_mut();
        match &*slot {
            Some(cache) => Rc::clone(cache),
            None => {
                let cache = Rc::new(init());
                tracing::debug!(cache = cache.name(), "initialized shared cache instance");
                *slot = Some(Rc::clone(&cache));
                cache
            }
        }
    }

    /// Returns the shared instance if it was initialized and not deleted.
    pub fn get(&self) -> Option<Rc<SharedSubResourceCache<N>>> {
        self.slot.borrow().clone()
    }

    /// Drops the shared instance. Outstanding `Rc` handles keep the cache
    /// alive until they are gone, but new [`get`](Self::get) calls return
    /// `None` and [`get_or_init`](Self::get_or_init) starts fresh.
    pub fn delete(&self) {
        if let Some(cache) = self.slot.borrow_mut().take() {
            tracing::debug!(cache = cache.name(), "deleted shared cache instance");
        }
    }
}

impl<N: LoadingNode> Default for CacheSingleton<N> {
    fn default() -> Self {
        Self::new()
    }
}
