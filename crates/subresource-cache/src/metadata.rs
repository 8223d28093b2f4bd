//! Network metadata attached to finished loads.
//!
//! When a fetch finishes, the fetch owner snapshots the response headers and
//! timing data into a [`NetworkMetadata`] and makes it available through its
//! loading node. The metadata is stored alongside the cached value and handed
//! back on every cache hit, so consumers can report performance entries for
//! loads that never touched the network.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timing data recorded for a finished fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceTimingData {
    /// When the fetch was issued.
    pub fetch_start: DateTime<Utc>,
    /// When the last response byte arrived.
    pub response_end: DateTime<Utc>,
    /// Bytes transferred over the network, including headers.
    pub transfer_size: u64,
    /// Size of the response body as received, before decoding.
    pub encoded_body_size: u64,
}

/// Response status and headers recorded for a finished fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHead {
    pub status: u16,
    /// Header name/value pairs in response order.
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// Returns the first header with the given name, compared
    /// case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The network-related metadata associated with a cache entry.
///
/// Both parts are optional: a synchronously completed or non-HTTP load may
/// have neither.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkMetadata {
    perf_data: Option<PerformanceTimingData>,
    response_head: Option<ResponseHead>,
}

impl NetworkMetadata {
    pub fn new(
        perf_data: Option<PerformanceTimingData>,
        response_head: Option<ResponseHead>,
    ) -> Self {
        Self {
            perf_data,
            response_head,
        }
    }

    pub fn perf_data(&self) -> Option<&PerformanceTimingData> {
        self.perf_data.as_ref()
    }

    pub fn response_head(&self) -> Option<&ResponseHead> {
        self.response_head.as_ref()
    }
}
