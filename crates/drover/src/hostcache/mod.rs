pub mod cache;
pub mod filter;
pub mod summary;

pub use cache::HostCache;
pub use filter::{HostFilter, HostFilterResult, HostLease, Match};
pub use summary::{HostSummary, DEFAULT_HELD_TIMEOUT};

use serde::{Deserialize, Serialize};

/// Key/value label attached to a host.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

impl Label {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Placement status of a host in the cache.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum HostStatus {
    /// Available for matching.
    Ready,
    /// Leased to a placement engine.
    Placing,
    /// Long-term reservation.
    Reserved,
    /// Reserved for specific pods (e.g. an in-place update), with TTL.
    Held,
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
