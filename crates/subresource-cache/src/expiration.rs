//! Expiration deadlines for complete cache entries.

use std::time::{Duration, Instant};

/// The point in time at which a complete cache entry becomes stale.
///
/// An expired entry is not removed from the cache eagerly; it is merely no
/// longer served to loaders that have not already used it. See
/// `SharedSubResourceCache::lookup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheExpirationTime {
    /// The entry never goes stale on its own.
    Never,
    /// The entry is stale once the deadline has passed.
    At(Instant),
}

impl CacheExpirationTime {
    pub fn never() -> Self {
        Self::Never
    }

    pub fn at(deadline: Instant) -> Self {
        Self::At(deadline)
    }

    /// A deadline the given duration from now.
    ///
    /// `from_now(Duration::ZERO)` yields an already-expired time.
    pub fn from_now(ttl: Duration) -> Self {
        Self::At(Instant::now() + ttl)
    }

    pub fn is_expired(&self) -> bool {
        match self {
            Self::Never => false,
            Self::At(deadline) => *deadline <= Instant::now(),
        }
    }

    /// The earlier of two expiration times.
    ///
    /// Used to clamp an entry's own expiration with a configured default
    /// time-to-live.
    pub fn earliest(self, other: Self) -> Self {
        match (self, other) {
            (Self::Never, other) => other,
            (this, Self::Never) => this,
            (Self::At(a), Self::At(b)) => Self::At(a.min(b)),
        }
    }
}

impl Default for CacheExpirationTime {
    fn default() -> Self {
        Self::Never
    }
}
