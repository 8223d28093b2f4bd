//! Style-sheet instantiation of the shared sub-resource cache.
//!
//! This crate binds the generic [`subresource_cache`] engine to concrete
//! style types: [`StyleSheetKey`] identifies a sheet within a partition,
//! [`StyleSheet`] is the cached value, [`StyleLoader`] is one document's
//! style loading context, and [`SheetLoadData`] is one request, possibly
//! coalesced with others for the same key.
//!
//! The per-process shared instance lives behind [`style_cache`] /
//! [`delete_style_cache`], one per owner thread with an explicit teardown.

mod cache;
mod key;
mod load;
mod loader;
mod sheet;

pub use cache::{StyleCache, delete_style_cache, style_cache, style_cache_with_config};
pub use key::{CorsMode, StyleSheetKey};
pub use load::SheetLoadData;
pub use loader::StyleLoader;
pub use sheet::StyleSheet;
