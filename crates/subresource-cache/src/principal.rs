//! Principals and origin attributes.
//!
//! A [`Principal`] identifies the security origin a sub-resource was loaded
//! for: the origin itself, its registrable base domain, and the
//! [`OriginAttributes`] that partition otherwise identical origins (private
//! browsing, user contexts, and the top-level site a third-party load was
//! partitioned under).
//!
//! [`OriginAttributesPattern`] is the matcher used by privacy-driven cache
//! clearing. All of its fields are optional; an absent field matches any
//! value. The serde names use `camelCase` to match the JSON shape these
//! patterns are exchanged in.

use serde::{Deserialize, Serialize};

/// The partitioning dimensions of a [`Principal`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OriginAttributes {
    /// Non-zero when the load happened in a private browsing session.
    pub private_browsing_id: u32,
    /// The user context ("container") the load belongs to.
    pub user_context_id: u32,
    /// The top-level site this load was partitioned under, if any.
    ///
    /// This is set for third-party loads: a resource from `other.com`
    /// embedded while visiting `example.com` carries a partition key for
    /// `example.com`.
    pub partition_key: Option<PartitionKey>,
}

/// The top-level site a third-party load was partitioned under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionKey {
    /// The registrable base domain of the partitioning site.
    pub base_domain: String,
}

impl PartitionKey {
    pub fn new(base_domain: impl Into<String>) -> Self {
        Self {
            base_domain: base_domain.into(),
        }
    }
}

/// A security principal: an origin plus its [`OriginAttributes`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    origin: String,
    base_domain: String,
    #[serde(default)]
    attributes: OriginAttributes,
}

impl Principal {
    /// Creates a principal from an origin, its registrable base domain, and
    /// origin attributes.
    pub fn new(
        origin: impl Into<String>,
        base_domain: impl Into<String>,
        attributes: OriginAttributes,
    ) -> Self {
        Self {
            origin: origin.into(),
            base_domain: base_domain.into(),
            attributes,
        }
    }

    /// Creates a principal with default (unpartitioned, non-private)
    /// attributes.
    pub fn with_default_attributes(
        origin: impl Into<String>,
        base_domain: impl Into<String>,
    ) -> Self {
        Self::new(origin, base_domain, OriginAttributes::default())
    }

    /// The serialized origin, e.g. `https://example.com`.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The registrable base domain of the origin.
    pub fn base_domain(&self) -> &str {
        &self.base_domain
    }

    pub fn attributes(&self) -> &OriginAttributes {
        &self.attributes
    }
}

/// A matcher over [`OriginAttributes`].
///
/// Every field is optional; absent fields match anything. A present
/// [`Self::partition_key_pattern`] only matches attributes that carry a
/// partition key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OriginAttributesPattern {
    pub private_browsing_id: Option<u32>,
    pub user_context_id: Option<u32>,
    pub partition_key_pattern: Option<PartitionKeyPattern>,
}

/// A matcher over [`PartitionKey`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartitionKeyPattern {
    pub base_domain: Option<String>,
}

impl OriginAttributesPattern {
    /// Whether the given attributes match this pattern.
    pub fn matches(&self, attributes: &OriginAttributes) -> bool {
        if let Some(private_browsing_id) = self.private_browsing_id {
            if private_browsing_id != attributes.private_browsing_id {
                return false;
            }
        }

        if let Some(user_context_id) = self.user_context_id {
            if user_context_id != attributes.user_context_id {
                return false;
            }
        }

        if let Some(pattern) = &self.partition_key_pattern {
            let Some(key) = &attributes.partition_key else {
                return false;
            };
            if let Some(base_domain) = &pattern.base_domain {
                if base_domain != &key.base_domain {
                    return false;
                }
            }
        }

        true
    }

    /// Returns a copy of this pattern that additionally constrains the
    /// partition key to the given site.
    ///
    /// Used when clearing by site: the caller's pattern (which may itself
    /// restrict e.g. private browsing) is extended so that only entries
    /// partitioned *under* that site match.
    pub fn scoped_to_partition(&self, site: &str) -> Self {
        let mut pattern = self.clone();
        pattern.partition_key_pattern = Some(PartitionKeyPattern {
            base_domain: Some(site.to_owned()),
        });
        pattern
    }
}
