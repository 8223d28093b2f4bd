//! The per-document style loading context.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rustc_hash::FxHashSet;
use subresource_cache::{Loader, Principal};

use crate::key::StyleSheetKey;

/// One document's style-sheet loading context.
///
/// Tracks which sheets the document already used (so the shared cache keeps
/// serving it the same copies, staleness notwithstanding) and how many of
/// its deferred loads are about to start.
#[derive(Debug)]
pub struct StyleLoader {
    principal: Principal,
    bypass_cache: Cell<bool>,
    loaded: RefCell<FxHashSet<StyleSheetKey>>,
    pending_load_count: Cell<u32>,
}

impl StyleLoader {
    pub fn new(principal: Principal) -> Rc<Self> {
        Rc::new(Self {
            principal,
            bypass_cache: Cell::new(false),
            loaded: RefCell::new(FxHashSet::default()),
            pending_load_count: Cell::new(0),
        })
    }

    /// Marks this loader as bypassing caches, e.g. during a force reload.
    pub fn set_bypass_cache(&self, bypass: bool) {
        self.bypass_cache.set(bypass);
    }

    /// Records that the document applied the sheet with this key.
    pub fn note_sheet_loaded(&self, key: StyleSheetKey) {
        self.loaded.borrow_mut().insert(key);
    }

    /// How many of this loader's deferred loads are about to start.
    pub fn pending_load_count(&self) -> u32 {
        self.pending_load_count.get()
    }
}

impl Loader for StyleLoader {
    type Key = StyleSheetKey;

    fn principal(&self) -> &Principal {
        &self.principal
    }

    fn should_bypass_cache(&self) -> bool {
        self.bypass_cache.get()
    }

    fn has_loaded(&self, key: &StyleSheetKey) -> bool {
        self.loaded.borrow().contains(key)
    }

    fn will_start_pending_load(&self) {
        self.pending_load_count.set(self.pending_load_count.get() + 1);
    }
}
