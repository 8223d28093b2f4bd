//! The cached style sheet value.

use subresource_cache::CacheValue;
use url::Url;

/// A fetched style sheet, shared by every document that uses it.
///
/// Immutable once cached; documents that need to mutate a shared sheet must
/// clone it on their side first.
#[derive(Debug, PartialEq, Eq)]
pub struct StyleSheet {
    url: Url,
    source: String,
}

impl StyleSheet {
    pub fn new(url: Url, source: impl Into<String>) -> Self {
        Self {
            url,
            source: source.into(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl CacheValue for StyleSheet {
    fn size_of(&self) -> usize {
        self.source.len() + self.url.as_str().len()
    }
}
