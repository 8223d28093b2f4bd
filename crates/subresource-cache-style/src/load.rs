//! One style-sheet request, as tracked by the shared cache.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use subresource_cache::{
    CacheExpirationTime, ChainLink, LoadingNode, NetworkMetadata,
};

use crate::key::StyleSheetKey;
use crate::loader::StyleLoader;
use crate::sheet::StyleSheet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
    /// Created, not fetching yet.
    Created,
    /// The physical fetch is in flight.
    Loading,
    /// Finished, whether fetched, coalesced, or cancelled.
    Complete,
}

/// One request for a style sheet; the node type of the shared style cache.
///
/// A request may be the head of a coalescing chain (its fetch is the
/// authoritative one) or a passenger attached to another request's fetch.
/// The fetch itself lives outside this type: the network machinery drives
/// it and funnels the result in through [`fetch_finished`](Self::fetch_finished).
pub struct SheetLoadData {
    key: StyleSheetKey,
    loader: Rc<StyleLoader>,
    link: ChainLink<SheetLoadData>,
    sync_load: bool,
    defer: bool,
    state: Cell<LoadState>,
    cancelled: Cell<bool>,
    fetch_requested: Cell<bool>,
    sheet: RefCell<Option<Rc<StyleSheet>>>,
    metadata: RefCell<Option<Rc<NetworkMetadata>>>,
    expiration: Cell<CacheExpirationTime>,
}

impl SheetLoadData {
    fn with_flags(
        loader: &Rc<StyleLoader>,
        key: StyleSheetKey,
        sync_load: bool,
        defer: bool,
    ) -> Rc<Self> {
        Rc::new(Self {
            key,
            loader: Rc::clone(loader),
            link: ChainLink::new(),
            sync_load,
            defer,
            state: Cell::new(LoadState::Created),
            cancelled: Cell::new(false),
            fetch_requested: Cell::new(false),
            sheet: RefCell::new(None),
            metadata: RefCell::new(None),
            expiration: Cell::new(CacheExpirationTime::Never),
        })
    }

    /// An ordinary asynchronous request, needed as soon as possible.
    pub fn new(loader: &Rc<StyleLoader>, key: StyleSheetKey) -> Rc<Self> {
        Self::with_flags(loader, key, false, false)
    }

    /// A synchronous request, e.g. for a user-agent sheet.
    pub fn new_sync(loader: &Rc<StyleLoader>, key: StyleSheetKey) -> Rc<Self> {
        Self::with_flags(loader, key, true, false)
    }

    /// A request nobody needs right away, e.g. an alternate sheet or one
    /// behind a non-matching media query.
    pub fn new_deferred(loader: &Rc<StyleLoader>, key: StyleSheetKey) -> Rc<Self> {
        Self::with_flags(loader, key, false, true)
    }

    pub fn key(&self) -> &StyleSheetKey {
        &self.key
    }

    /// Stores the result of the physical fetch on this request, ahead of
    /// inserting it into the cache.
    pub fn fetch_finished(
        &self,
        source: impl Into<String>,
        metadata: Option<Rc<NetworkMetadata>>,
        expiration: CacheExpirationTime,
    ) {
        *self.sheet.borrow_mut() = Some(Rc::new(StyleSheet::new(
            self.key.url().clone(),
            source,
        )));
        *self.metadata.borrow_mut() = metadata;
        self.expiration.set(expiration);
    }

    /// The fetched sheet, if the fetch finished.
    pub fn sheet(&self) -> Option<Rc<StyleSheet>> {
        self.sheet.borrow().clone()
    }

    /// Whether the cache asked this request to start its deferred fetch.
    /// The loader machinery polls this and issues the actual network load.
    pub fn fetch_requested(&self) -> bool {
        self.fetch_requested.get()
    }

    pub fn is_complete(&self) -> bool {
        self.state.get() == LoadState::Complete
    }
}

impl LoadingNode for SheetLoadData {
    type Key = StyleSheetKey;
    type Value = StyleSheet;
    type Loader = StyleLoader;

    fn cache_key(&self) -> StyleSheetKey {
        self.key.clone()
    }

    fn loader(&self) -> &Rc<StyleLoader> {
        &self.loader
    }

    fn link(&self) -> &ChainLink<SheetLoadData> {
        &self.link
    }

    fn is_loading(&self) -> bool {
        self.state.get() == LoadState::Loading
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    fn is_sync_load(&self) -> bool {
        self.sync_load
    }

    fn should_defer(&self) -> bool {
        self.defer
    }

    fn network_metadata(&self) -> Option<Rc<NetworkMetadata>> {
        self.metadata.borrow().clone()
    }

    fn start_loading(&self) {
        self.state.set(LoadState::Loading);
    }

    fn set_load_completed(&self) {
        self.state.set(LoadState::Complete);
    }

    fn on_coalesced_to(&self, _head: &SheetLoadData) {
        tracing::trace!(url = %self.key.url(), "coalesced onto existing load");
    }

    fn cancel(&self) {
        self.cancelled.set(true);
    }

    fn start_pending_load(&self) {
        self.fetch_requested.set(true);
    }

    fn did_cancel_load(&self) {
        self.cancelled.set(true);
        self.state.set(LoadState::Complete);
    }

    fn value_for_cache(&self) -> Rc<StyleSheet> {
        self.sheet
            .borrow()
            .clone()
            .expect("inserting a sheet whose fetch never finished")
    }

    fn expiration_time(&self) -> CacheExpirationTime {
        self.expiration.get()
    }
}
