use crate::hostcache::filter::{HostFilter, HostFilterResult, HostLease, Match};
use crate::hostcache::{HostStatus, Label};
use crate::resources::Resources;
use crate::{Error, Map, PodId, Result};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How long a host stays `Held` for a pod before the hold expires.
pub const DEFAULT_HELD_TIMEOUT: Duration = Duration::from_secs(180);

/// Resources and placement metadata of a single host.
///
/// All mutation goes through the per-host lock; the status machine is only
/// advanced by `cas_status`, `try_match`, `complete_lease` and
/// `terminate_lease`. A lease id exists exactly while the host is in
/// `Placing` or `Reserved`.
pub struct HostSummary {
    hostname: String,
    inner: RwLock<Inner>,
}

struct Inner {
    capacity: Resources,
    // always equals the sum of pod_resources values
    allocated: Resources,
    labels: Vec<Label>,
    pod_resources: Map<PodId, Resources>,
    // pod id -> expiration of the hold
    held_pods: Map<PodId, Instant>,
    status: HostStatus,
    lease_id: Option<Uuid>,
    version: String,
}

impl HostSummary {
    pub fn new(hostname: impl Into<String>, capacity: Resources, version: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            inner: RwLock::new(Inner {
                capacity,
                allocated: Resources::default(),
                labels: Vec::new(),
                pod_resources: Map::default(),
                held_pods: Map::default(),
                status: HostStatus::Ready,
                lease_id: None,
                version: version.into(),
            }),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Atomically matches the host against a filter and, on success, locks
    /// the host for the caller by moving it to `Placing`.
    pub fn try_match(&self, filter: &HostFilter) -> Match {
        let mut inner = self.inner.write().unwrap();

        if inner.status != HostStatus::Ready && inner.status != HostStatus::Held {
            return Match::miss(HostFilterResult::MismatchStatus);
        }
        // A held host is reserved for its pods; only a filter that names the
        // host explicitly may take it.
        if inner.status == HostStatus::Held
            && !filter.hints.iter().any(|hint| hint == &self.hostname)
        {
            return Match::miss(HostFilterResult::MismatchStatus);
        }

        let result = inner.match_filter(filter, &self.hostname);
        if result != HostFilterResult::Match {
            return Match::miss(result);
        }

        let current_status = inner.status;
        if let Err(e) = inner.cas_status(current_status, HostStatus::Placing) {
            log::warn!("host {}: failed to lock for placement: {e}", self.hostname);
            return Match::miss(HostFilterResult::MismatchStatus);
        }

        Match {
            result: HostFilterResult::Match,
            lease: Some(inner.lease(&self.hostname)),
        }
    }

    /// Closes the lease and admits the newly launched pods.
    ///
    /// The lease is terminated (status restored to `Ready`/`Held`) before
    /// the pods are validated, so a validation failure still leaves the
    /// host usable; the caller observes a typed error either way.
    pub fn complete_lease(&self, lease_id: Uuid, new_pods: Map<PodId, Resources>) -> Result<()> {
        let mut inner = self.inner.write().unwrap();

        if inner.status != HostStatus::Placing {
            return Err(Error::invalid_argument(format!(
                "host {}: status is {}, not Placing",
                self.hostname, inner.status
            )));
        }
        if inner.lease_id != Some(lease_id) {
            return Err(Error::invalid_argument(format!(
                "host {}: lease id does not match",
                self.hostname
            )));
        }

        let reset = inner.reset_status();
        inner.cas_status(HostStatus::Placing, reset)?;

        inner.validate_new_pods(&new_pods, &self.hostname)?;
        for (pod_id, resources) in new_pods {
            inner.pod_resources.insert(pod_id, resources);
        }
        inner.recalculate_allocated();
        log::debug!(
            "host {}: lease completed, allocated {}",
            self.hostname,
            inner.allocated
        );
        Ok(())
    }

    /// Gives up a lease without launching anything.
    pub fn terminate_lease(&self) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if inner.status != HostStatus::Placing {
            return Err(Error::invalid_argument(format!(
                "host {}: status is {}, not Placing",
                self.hostname, inner.status
            )));
        }
        let reset = inner.reset_status();
        inner.cas_status(HostStatus::Placing, reset)
    }

    /// Moves the host from `old` to `new`, failing on a stale `old` or an
    /// edge the status machine does not have.
    pub fn cas_status(&self, old: HostStatus, new: HostStatus) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.cas_status(old, new)
    }

    /// Removes a pod and gives its resources back. Unknown pods are logged
    /// and ignored, so terminal-state replays stay harmless.
    pub fn release_pod_resources(&self, pod_id: &PodId) {
        let mut inner = self.inner.write().unwrap();
        if inner.pod_resources.remove(pod_id).is_none() {
            log::warn!(
                "host {}: pod {pod_id} not found in host summary",
                self.hostname
            );
            return;
        }
        inner.recalculate_allocated();
    }

    /// Holds the host for a pod until `now + ttl`; the host leaves the
    /// general matching pool while any hold is active.
    pub fn hold_for_pod(&self, pod_id: PodId, ttl: Duration) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        match inner.status {
            HostStatus::Ready => inner.cas_status(HostStatus::Ready, HostStatus::Held)?,
            HostStatus::Held => {}
            status => {
                return Err(Error::invalid_argument(format!(
                    "host {}: cannot hold in status {status}",
                    self.hostname
                )))
            }
        }
        inner.held_pods.insert(pod_id, Instant::now() + ttl);
        Ok(())
    }

    /// Drops the hold for a pod; the last hold returns the host to `Ready`.
    pub fn release_hold_for_pod(&self, pod_id: &PodId) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if inner.held_pods.remove(pod_id).is_none() {
            return Err(Error::not_found(format!(
                "host {}: no hold for pod {pod_id}",
                self.hostname
            )));
        }
        if inner.held_pods.is_empty() && inner.status == HostStatus::Held {
            inner.cas_status(HostStatus::Held, HostStatus::Ready)?;
        }
        Ok(())
    }

    /// Clears holds that expired before `now`; returns how many were
    /// dropped. Expiring the last hold returns the host to `Ready`.
    pub fn reset_expired_holds(&self, now: Instant) -> usize {
        let mut inner = self.inner.write().unwrap();
        let before = inner.held_pods.len();
        inner.held_pods.retain(|pod_id, expires| {
            if *expires <= now {
                log::info!("hold for pod {pod_id} expired");
                false
            } else {
                true
            }
        });
        let dropped = before - inner.held_pods.len();
        if dropped > 0 && inner.held_pods.is_empty() && inner.status == HostStatus::Held {
            if let Err(e) = inner.cas_status(HostStatus::Held, HostStatus::Ready) {
                log::error!("host {}: failed to leave Held: {e}", self.hostname);
            }
        }
        dropped
    }

    pub fn capacity(&self) -> Resources {
        self.inner.read().unwrap().capacity
    }

    pub fn set_capacity(&self, capacity: Resources) {
        self.inner.write().unwrap().capacity = capacity;
    }

    pub fn allocated(&self) -> Resources {
        self.inner.read().unwrap().allocated
    }

    /// Free capacity; an overcommitted host reports zero and logs.
    pub fn available(&self) -> Resources {
        let inner = self.inner.read().unwrap();
        inner.available(&self.hostname)
    }

    pub fn status(&self) -> HostStatus {
        self.inner.read().unwrap().status
    }

    pub fn lease_id(&self) -> Option<Uuid> {
        self.inner.read().unwrap().lease_id
    }

    pub fn version(&self) -> String {
        self.inner.read().unwrap().version.clone()
    }

    pub fn set_version(&self, version: impl Into<String>) {
        self.inner.write().unwrap().version = version.into();
    }

    pub fn labels(&self) -> Vec<Label> {
        self.inner.read().unwrap().labels.clone()
    }

    pub fn set_labels(&self, labels: Vec<Label>) {
        self.inner.write().unwrap().labels = labels;
    }

    pub fn pod_count(&self) -> usize {
        self.inner.read().unwrap().pod_resources.len()
    }

    pub fn has_pod(&self, pod_id: &PodId) -> bool {
        self.inner.read().unwrap().pod_resources.contains_key(pod_id)
    }

    pub fn held_pod_count(&self) -> usize {
        self.inner.read().unwrap().held_pods.len()
    }

    /// Current lease of a host in `Placing`/`Reserved`.
    pub fn host_lease(&self) -> Option<HostLease> {
        let inner = self.inner.read().unwrap();
        inner.lease_id?;
        Some(inner.lease(&self.hostname))
    }
}

impl Inner {
    fn cas_status(&mut self, old: HostStatus, new: HostStatus) -> Result<()> {
        if self.status != old {
            return Err(Error::invalid_argument(format!(
                "invalid old status: {old}, current is {}",
                self.status
            )));
        }
        if old == new {
            // A no-op CAS succeeds without minting or dropping a lease.
            return Ok(());
        }
        if !transition_allowed(old, new) {
            return Err(Error::invalid_argument(format!(
                "invalid status transition {old} -> {new}"
            )));
        }
        self.status = new;
        match new {
            HostStatus::Ready | HostStatus::Held => self.lease_id = None,
            HostStatus::Placing | HostStatus::Reserved => {
                self.lease_id = Some(Uuid::new_v4());
            }
        }
        Ok(())
    }

    fn reset_status(&self) -> HostStatus {
        if self.held_pods.is_empty() {
            HostStatus::Ready
        } else {
            HostStatus::Held
        }
    }

    fn match_filter(&self, filter: &HostFilter, hostname: &str) -> HostFilterResult {
        for label in &filter.required_labels {
            if !self.labels.contains(label) {
                return HostFilterResult::MismatchConstraints;
            }
        }
        if !self.available(hostname).contains(&filter.minimum) {
            return HostFilterResult::InsufficientResources;
        }
        HostFilterResult::Match
    }

    fn validate_new_pods(&self, new_pods: &Map<PodId, Resources>, hostname: &str) -> Result<()> {
        let mut needed = Resources::default();
        for (pod_id, resources) in new_pods {
            if self.pod_resources.contains_key(pod_id) {
                return Err(Error::invalid_argument(format!(
                    "pod {pod_id} already exists on host {hostname}"
                )));
            }
            needed = needed.add(resources);
        }
        if !self.available(hostname).contains(&needed) {
            return Err(Error::invalid_argument(format!(
                "host {hostname} has insufficient resources for new pods"
            )));
        }
        Ok(())
    }

    fn recalculate_allocated(&mut self) {
        self.allocated = Resources::sum(self.pod_resources.values());
    }

    fn available(&self, hostname: &str) -> Resources {
        match self.capacity.try_subtract(&self.allocated) {
            Some(available) => available,
            None => {
                log::error!(
                    "host {hostname}: allocated {} exceeds capacity {}",
                    self.allocated,
                    self.capacity
                );
                Resources::default()
            }
        }
    }

    fn lease(&self, hostname: &str) -> HostLease {
        HostLease {
            lease_id: self.lease_id.expect("lease requested without a lease id"),
            hostname: hostname.to_string(),
            available: self.available(hostname),
            labels: self.labels.clone(),
        }
    }
}

fn transition_allowed(old: HostStatus, new: HostStatus) -> bool {
    use HostStatus::*;
    matches!(
        (old, new),
        (Ready, Placing)
            | (Ready, Held)
            | (Ready, Reserved)
            | (Placing, Ready)
            | (Placing, Held)
            | (Held, Ready)
            | (Held, Placing)
            | (Reserved, Ready)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HostSummary {
        HostSummary::new(
            "hostname0",
            Resources::new(4.0, 8192.0, 100000.0, 0.0),
            "v1",
        )
    }

    fn pods(entries: &[(&str, Resources)]) -> Map<PodId, Resources> {
        entries
            .iter()
            .map(|(id, r)| (PodId::from(*id), *r))
            .collect()
    }

    #[test]
    fn test_lease_lifecycle() {
        let host = host();
        let matched = host.try_match(&HostFilter::with_minimum(Resources::new(
            1.0, 1024.0, 0.0, 0.0,
        )));
        assert!(matched.is_match());
        assert_eq!(host.status(), HostStatus::Placing);
        let lease = matched.lease.unwrap();
        assert!(host.lease_id().is_some());

        let launched = pods(&[("pod1", Resources::new(1.0, 1024.0, 0.0, 0.0))]);
        host.complete_lease(lease.lease_id, launched).unwrap();
        assert_eq!(host.status(), HostStatus::Ready);
        assert!(host.lease_id().is_none());
        assert!(host
            .allocated()
            .approx_eq(&Resources::new(1.0, 1024.0, 0.0, 0.0)));

        host.release_pod_resources(&PodId::from("pod1"));
        assert!(host.allocated().approx_eq(&Resources::default()));
    }

    #[test]
    fn test_stale_lease_rejected() {
        let host = host();
        let matched = host.try_match(&HostFilter::with_minimum(Resources::new(
            1.0, 1024.0, 0.0, 0.0,
        )));
        assert!(matched.is_match());

        let err = host.complete_lease(
            Uuid::new_v4(),
            pods(&[("pod1", Resources::new(1.0, 1024.0, 0.0, 0.0))]),
        );
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
        // The bad lease id must not have broken the Placing state.
        assert_eq!(host.status(), HostStatus::Placing);

        host.terminate_lease().unwrap();
        assert_eq!(host.status(), HostStatus::Ready);
        assert!(host.lease_id().is_none());
    }

    #[test]
    fn test_match_while_placing_refused() {
        let host = host();
        assert!(host
            .try_match(&HostFilter::with_minimum(Resources::default()))
            .is_match());
        let second = host.try_match(&HostFilter::with_minimum(Resources::default()));
        assert_eq!(second.result, HostFilterResult::MismatchStatus);
    }

    #[test]
    fn test_insufficient_resources() {
        let host = host();
        let matched = host.try_match(&HostFilter::with_minimum(Resources::new(
            64.0, 1024.0, 0.0, 0.0,
        )));
        assert_eq!(matched.result, HostFilterResult::InsufficientResources);
        assert_eq!(host.status(), HostStatus::Ready);
    }

    #[test]
    fn test_label_constraints() {
        let host = host();
        host.set_labels(vec![Label::new("zone", "dc1")]);
        let mut filter = HostFilter::with_minimum(Resources::default());
        filter.required_labels.push(Label::new("zone", "dc2"));
        assert_eq!(
            host.try_match(&filter).result,
            HostFilterResult::MismatchConstraints
        );
    }

    #[test]
    fn test_complete_lease_validation_still_terminates() {
        let host = host();
        let matched = host.try_match(&HostFilter::with_minimum(Resources::default()));
        let lease = matched.lease.unwrap();
        // Far more than the host has; validation must fail after the lease
        // is gone.
        let err = host.complete_lease(
            lease.lease_id,
            pods(&[("pod1", Resources::new(400.0, 1024.0, 0.0, 0.0))]),
        );
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
        assert_eq!(host.status(), HostStatus::Ready);
        assert!(host.allocated().approx_eq(&Resources::default()));
    }

    #[test]
    fn test_duplicate_pod_rejected() {
        let host = host();
        let lease = host
            .try_match(&HostFilter::with_minimum(Resources::default()))
            .lease
            .unwrap();
        host.complete_lease(
            lease.lease_id,
            pods(&[("pod1", Resources::new(1.0, 0.0, 0.0, 0.0))]),
        )
        .unwrap();

        let lease = host
            .try_match(&HostFilter::with_minimum(Resources::default()))
            .lease
            .unwrap();
        let err = host.complete_lease(
            lease.lease_id,
            pods(&[("pod1", Resources::new(1.0, 0.0, 0.0, 0.0))]),
        );
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_cas_status() {
        let host = host();
        // Same-state CAS is a successful no-op and must not mint a lease.
        host.cas_status(HostStatus::Ready, HostStatus::Ready).unwrap();
        assert!(host.lease_id().is_none());

        // Wrong old value fails without side effects.
        let err = host.cas_status(HostStatus::Placing, HostStatus::Ready);
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
        assert_eq!(host.status(), HostStatus::Ready);

        host.cas_status(HostStatus::Ready, HostStatus::Reserved)
            .unwrap();
        assert_eq!(host.status(), HostStatus::Reserved);
        assert!(host.lease_id().is_some());

        // Reserved can only go back to Ready.
        let err = host.cas_status(HostStatus::Reserved, HostStatus::Placing);
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
        host.cas_status(HostStatus::Reserved, HostStatus::Ready)
            .unwrap();
        assert!(host.lease_id().is_none());
    }

    #[test]
    fn test_release_unknown_pod_is_idempotent() {
        let host = host();
        host.release_pod_resources(&PodId::from("ghost"));
        host.release_pod_resources(&PodId::from("ghost"));
        assert!(host.allocated().approx_eq(&Resources::default()));
    }

    #[test]
    fn test_held_host_requires_hint() {
        let host = host();
        host.hold_for_pod(PodId::from("pod1"), DEFAULT_HELD_TIMEOUT)
            .unwrap();
        assert_eq!(host.status(), HostStatus::Held);

        let unhinted = host.try_match(&HostFilter::with_minimum(Resources::default()));
        assert_eq!(unhinted.result, HostFilterResult::MismatchStatus);

        let hinted =
            host.try_match(&HostFilter::with_minimum(Resources::default()).hinted("hostname0"));
        assert!(hinted.is_match());
        assert_eq!(host.status(), HostStatus::Placing);

        // Pods are still held, so closing the lease lands back in Held.
        host.terminate_lease().unwrap();
        assert_eq!(host.status(), HostStatus::Held);
    }

    #[test]
    fn test_hold_release_and_expiry() {
        let host = host();
        host.hold_for_pod(PodId::from("pod1"), DEFAULT_HELD_TIMEOUT)
            .unwrap();
        host.hold_for_pod(PodId::from("pod2"), Duration::from_secs(0))
            .unwrap();
        assert_eq!(host.held_pod_count(), 2);

        // pod2's hold has already expired.
        let dropped = host.reset_expired_holds(Instant::now() + Duration::from_millis(1));
        assert_eq!(dropped, 1);
        assert_eq!(host.status(), HostStatus::Held);

        host.release_hold_for_pod(&PodId::from("pod1")).unwrap();
        assert_eq!(host.status(), HostStatus::Ready);
        assert!(matches!(
            host.release_hold_for_pod(&PodId::from("pod1")),
            Err(Error::NotFound(_))
        ));
    }
}
