use crate::hostcache::Label;
use crate::resources::Resources;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Constraints a host must satisfy to be matched by a placement engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HostFilter {
    /// Minimum free resources the host must offer.
    pub minimum: Resources,
    /// Hosts the caller prefers; a host in `Held` status only matches if it
    /// is named here.
    pub hints: Vec<String>,
    /// Labels the host must carry.
    pub required_labels: Vec<Label>,
}

impl HostFilter {
    pub fn with_minimum(minimum: Resources) -> Self {
        Self {
            minimum,
            ..Default::default()
        }
    }

    pub fn hinted(mut self, hostname: impl Into<String>) -> Self {
        self.hints.push(hostname.into());
        self
    }
}

/// Outcome kind of matching a filter against one host.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HostFilterResult {
    Match,
    MismatchStatus,
    InsufficientResources,
    MismatchConstraints,
}

/// Token granting a placement engine temporary exclusive use of a host.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostLease {
    pub lease_id: Uuid,
    pub hostname: String,
    pub available: Resources,
    pub labels: Vec<Label>,
}

/// Result of [`HostSummary::try_match`].
///
/// [`HostSummary::try_match`]: crate::hostcache::summary::HostSummary::try_match
#[derive(Clone, Debug)]
pub struct Match {
    pub result: HostFilterResult,
    pub lease: Option<HostLease>,
}

impl Match {
    pub(crate) fn miss(result: HostFilterResult) -> Self {
        Self {
            result,
            lease: None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.result == HostFilterResult::Match
    }
}
