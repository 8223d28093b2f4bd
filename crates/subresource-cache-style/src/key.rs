//! Cache identity for style sheets.

use subresource_cache::{CacheKey, Principal};
use url::Url;

/// How a style sheet request was made with respect to CORS.
///
/// Part of the cache identity: a sheet fetched anonymously must not be
/// reused for a credentialed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CorsMode {
    #[default]
    None,
    Anonymous,
    UseCredentials,
}

/// Identity of a cacheable style sheet within a partition.
///
/// Two requests share a cache entry only when every field matches: the
/// loader principal, the partition principal (which carries the
/// origin-attribute partitioning), the sheet URL, the CORS mode, and the
/// serialized media list the sheet was parsed against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StyleSheetKey {
    principal: Principal,
    partition_principal: Principal,
    url: Url,
    cors_mode: CorsMode,
    media: Option<String>,
}

impl StyleSheetKey {
    pub fn new(
        principal: Principal,
        partition_principal: Principal,
        url: Url,
        cors_mode: CorsMode,
        media: Option<String>,
    ) -> Self {
        Self {
            principal,
            partition_principal,
            url,
            cors_mode,
            media,
        }
    }

    /// A key for a first-party, non-CORS sheet without a media list.
    pub fn first_party(principal: Principal, url: Url) -> Self {
        Self::new(principal.clone(), principal, url, CorsMode::None, None)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn cors_mode(&self) -> CorsMode {
        self.cors_mode
    }

    pub fn media(&self) -> Option<&str> {
        self.media.as_deref()
    }
}

impl CacheKey for StyleSheetKey {
    fn principal(&self) -> &Principal {
        &self.principal
    }

    fn partition_principal(&self) -> &Principal {
        &self.partition_principal
    }
}
