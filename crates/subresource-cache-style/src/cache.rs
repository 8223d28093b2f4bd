//! The process-wide style cache instance.

use std::rc::Rc;

use subresource_cache::{CacheConfig, CacheSingleton, SharedSubResourceCache};

use crate::load::SheetLoadData;

/// The shared sub-resource cache instantiated for style sheets.
pub type StyleCache = SharedSubResourceCache<SheetLoadData>;

thread_local! {
    static STYLE_CACHE: CacheSingleton<SheetLoadData> = const { CacheSingleton::new() };
}

/// Returns this thread's shared style cache, creating it with the default
/// configuration on first use.
///
/// Prefer constructing a [`StyleCache`] explicitly and passing it down when
/// the call graph allows; tests in particular should use independent
/// instances. Call [`delete_style_cache`] at shutdown.
pub fn style_cache() -> Rc<StyleCache> {
    STYLE_CACHE.with(|singleton| singleton.get_or_init(|| StyleCache::new("style")))
}

/// Like [`style_cache`], but a first call applies the given configuration.
pub fn style_cache_with_config(config: CacheConfig) -> Rc<StyleCache> {
    STYLE_CACHE.with(|singleton| {
        singleton.get_or_init(|| StyleCache::with_config("style", config))
    })
}

/// Tears down this thread's shared style cache. Outstanding handles stay
/// usable; the next [`style_cache`] call starts fresh.
pub fn delete_style_cache() {
    STYLE_CACHE.with(|singleton| singleton.delete());
}
