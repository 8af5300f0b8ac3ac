use crate::hostcache::summary::HostSummary;
use crate::hostcache::{HostStatus, Label};
use crate::resources::Resources;
use crate::{Error, Map, Result};
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Index of host summaries keyed by hostname.
///
/// The cache lock only guards the index; all per-host state sits behind the
/// summary's own lock, so placement engines working on different hosts never
/// contend.
#[derive(Default)]
pub struct HostCache {
    hosts: RwLock<Map<String, Arc<HostSummary>>>,
}

impl HostCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(
        &self,
        hostname: impl Into<String>,
        capacity: Resources,
        version: impl Into<String>,
        labels: Vec<Label>,
    ) -> Result<Arc<HostSummary>> {
        let hostname = hostname.into();
        let mut hosts = self.hosts.write().unwrap();
        if hosts.contains_key(&hostname) {
            return Err(Error::already_exists(format!(
                "host {hostname} already tracked"
            )));
        }
        let summary = Arc::new(HostSummary::new(hostname.clone(), capacity, version));
        summary.set_labels(labels);
        hosts.insert(hostname, summary.clone());
        Ok(summary)
    }

    pub fn get_host(&self, hostname: &str) -> Result<Arc<HostSummary>> {
        self.hosts
            .read()
            .unwrap()
            .get(hostname)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("host {hostname} not tracked")))
    }

    /// Drops a host from the index. A host still running pods or locked by
    /// a lease has not drained and cannot be removed.
    pub fn remove_host(&self, hostname: &str) -> Result<()> {
        let mut hosts = self.hosts.write().unwrap();
        let summary = hosts
            .get(hostname)
            .ok_or_else(|| Error::not_found(format!("host {hostname} not tracked")))?;
        if summary.status() != HostStatus::Ready || summary.pod_count() > 0 {
            return Err(Error::failed_precondition(format!(
                "host {hostname} has not drained"
            )));
        }
        hosts.remove(hostname);
        Ok(())
    }

    /// Point-in-time copy of the index, for rankers and read-only views.
    pub fn snapshot(&self) -> Vec<Arc<HostSummary>> {
        let mut hosts: Vec<_> = self.hosts.read().unwrap().values().cloned().collect();
        hosts.sort_by(|a, b| a.hostname().cmp(b.hostname()));
        hosts
    }

    pub fn host_count(&self) -> usize {
        self.hosts.read().unwrap().len()
    }

    /// Sweeps expired holds on every host; returns how many were dropped.
    pub fn reset_expired_holds(&self, now: Instant) -> usize {
        let hosts = self.snapshot();
        hosts
            .iter()
            .map(|summary| summary.reset_expired_holds(now))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hostcache::filter::HostFilter;
    use crate::PodId;

    fn cache_with_hosts(n: usize) -> HostCache {
        let cache = HostCache::new();
        for i in 0..n {
            cache
                .add_host(
                    format!("hostname{i}"),
                    Resources::new(4.0, 8192.0, 1000.0, 0.0),
                    "v1",
                    vec![],
                )
                .unwrap();
        }
        cache
    }

    #[test]
    fn test_add_and_get() {
        let cache = cache_with_hosts(2);
        assert_eq!(cache.host_count(), 2);
        assert!(cache.get_host("hostname0").is_ok());
        assert!(matches!(
            cache.get_host("hostname9"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            cache.add_host("hostname0", Resources::default(), "v1", vec![]),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_remove_requires_drained_host() {
        let cache = cache_with_hosts(1);
        let host = cache.get_host("hostname0").unwrap();
        let lease = host
            .try_match(&HostFilter::with_minimum(Resources::default()))
            .lease
            .unwrap();
        // Leased host cannot be removed.
        assert!(matches!(
            cache.remove_host("hostname0"),
            Err(Error::FailedPrecondition(_))
        ));
        let mut pods = Map::default();
        pods.insert(PodId::from("pod1"), Resources::new(1.0, 0.0, 0.0, 0.0));
        host.complete_lease(lease.lease_id, pods).unwrap();
        // Running pods still pin the host.
        assert!(matches!(
            cache.remove_host("hostname0"),
            Err(Error::FailedPrecondition(_))
        ));
        host.release_pod_resources(&PodId::from("pod1"));
        cache.remove_host("hostname0").unwrap();
        assert_eq!(cache.host_count(), 0);
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let cache = cache_with_hosts(3);
        let names: Vec<_> = cache
            .snapshot()
            .iter()
            .map(|h| h.hostname().to_string())
            .collect();
        assert_eq!(names, vec!["hostname0", "hostname1", "hostname2"]);
    }
}
