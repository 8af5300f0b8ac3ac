use crate::transfer::messages::HostInfo;
use crate::Result;
use drover::hostcache::{HostCache, HostSummary};
use drover::PodId;
use std::sync::Arc;
use std::time::Duration;

/// Hold that keeps a host out of general matching during maintenance.
fn maintenance_pod(hostname: &str) -> PodId {
    PodId::new(format!("maintenance-{hostname}"))
}

// Maintenance has no natural deadline; the hold is refreshed by the sweep
// being a no-op until complete is called.
const MAINTENANCE_HOLD: Duration = Duration::from_secs(24 * 60 * 60);

/// Read and maintenance operations over the host cache.
pub struct HostService {
    cache: Arc<HostCache>,
}

impl HostService {
    pub fn new(cache: Arc<HostCache>) -> Self {
        Self { cache }
    }

    /// Summaries of all hosts, or of those whose name contains `filter`.
    pub fn query(&self, filter: Option<&str>) -> Vec<HostInfo> {
        self.cache
            .snapshot()
            .into_iter()
            .filter(|summary| {
                filter
                    .map(|needle| summary.hostname().contains(needle))
                    .unwrap_or(true)
            })
            .map(|summary| host_info(&summary))
            .collect()
    }

    pub fn get(&self, hostname: &str) -> Result<HostInfo> {
        Ok(host_info(self.cache.get_host(hostname)?.as_ref()))
    }

    /// Takes a host out of the placement pool for maintenance.
    pub fn maintenance_enqueue(&self, hostname: &str) -> Result<()> {
        let summary = self.cache.get_host(hostname)?;
        summary.hold_for_pod(maintenance_pod(hostname), MAINTENANCE_HOLD)?;
        log::info!("host {hostname} held for maintenance");
        Ok(())
    }

    /// Returns a host to the placement pool after maintenance.
    pub fn maintenance_complete(&self, hostname: &str) -> Result<()> {
        let summary = self.cache.get_host(hostname)?;
        summary.release_hold_for_pod(&maintenance_pod(hostname))?;
        log::info!("host {hostname} released from maintenance");
        Ok(())
    }
}

fn host_info(summary: &HostSummary) -> HostInfo {
    HostInfo {
        hostname: summary.hostname().to_string(),
        status: summary.status(),
        capacity: summary.capacity(),
        allocated: summary.allocated(),
        labels: summary.labels(),
        pod_count: summary.pod_count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use drover::hostcache::HostStatus;
    use drover::resources::Resources;
    use drover::Error as CoreError;

    fn service() -> HostService {
        let cache = Arc::new(HostCache::new());
        for i in 0..3 {
            cache
                .add_host(
                    format!("hostname{i}"),
                    Resources::new(4.0, 8192.0, 1000.0, 0.0),
                    "v1",
                    vec![],
                )
                .unwrap();
        }
        HostService::new(cache)
    }

    #[test]
    fn test_query() {
        let service = service();
        assert_eq!(service.query(None).len(), 3);
        assert_eq!(service.query(Some("name1")).len(), 1);
        assert!(service.query(Some("nope")).is_empty());
    }

    #[test]
    fn test_maintenance_cycle() {
        let service = service();
        service.maintenance_enqueue("hostname0").unwrap();
        assert_eq!(
            service.get("hostname0").unwrap().status,
            HostStatus::Held
        );
        service.maintenance_complete("hostname0").unwrap();
        assert_eq!(
            service.get("hostname0").unwrap().status,
            HostStatus::Ready
        );
        assert!(matches!(
            service.maintenance_complete("hostname0"),
            Err(Error::Core(CoreError::NotFound(_)))
        ));
    }
}
