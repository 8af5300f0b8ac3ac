use crate::server::jobs::{pod_event, JobManager};
use crate::Map;
use drover::events::EventStream;
use drover::hostcache::{HostCache, HostFilter, HostSummary};
use drover::queue::{Gang, MultiLevelList};
use drover::ranker::Ranker;
use drover::resources::Resources;
use drover::respool::{PoolArena, PoolIdx};
use drover::state::TaskState;
use drover::{PodId, TaskId};
use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

/// Outcome of one placement round.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PlacementStats {
    /// Gangs launched onto a host.
    pub placed: usize,
    /// Gangs that found no host and went back to their pool.
    pub returned: usize,
    /// Gangs dropped because their tasks were killed while queued.
    pub dropped: usize,
}

/// Pulls admitted gangs out of the pool tree and binds them to hosts.
///
/// One round drains every dequeue-eligible leaf (in entitlement order) into
/// a priority-ordered ready list, then walks the ranker's host ordering and
/// tries to match each gang. An unplaced gang goes back to its pool with
/// its allocation reverted, so admission control stays accurate.
pub struct PlacementEngine {
    arena: Arc<Mutex<PoolArena>>,
    cache: Arc<HostCache>,
    ranker: Box<dyn Ranker>,
    jobs: Arc<JobManager>,
    pod_events: Arc<EventStream>,
    dequeue_limit: usize,
}

impl PlacementEngine {
    pub fn new(
        arena: Arc<Mutex<PoolArena>>,
        cache: Arc<HostCache>,
        ranker: Box<dyn Ranker>,
        jobs: Arc<JobManager>,
        pod_events: Arc<EventStream>,
        dequeue_limit: usize,
    ) -> Self {
        Self {
            arena,
            cache,
            ranker,
            jobs,
            pod_events,
            dequeue_limit,
        }
    }

    pub fn place_round(&self) -> PlacementStats {
        let ready = self.drain_ready_gangs();
        if ready.is_empty() {
            return PlacementStats::default();
        }
        let index = self.cache.snapshot();
        self.ranker.refresh_ranking(&index);
        let hosts = self.ranker.get_ranked_host_list(&index);

        let mut stats = PlacementStats::default();
        for (leaf, gang) in ready {
            if !self.gang_still_wanted(&gang) {
                self.revert(leaf, &gang.resources());
                stats.dropped += 1;
                continue;
            }
            if self.place_gang(&hosts, &gang) {
                stats.placed += 1;
            } else {
                self.return_gang(leaf, gang);
                stats.returned += 1;
            }
        }
        log::debug!(
            "placement round: {} placed, {} returned, {} dropped",
            stats.placed,
            stats.returned,
            stats.dropped
        );
        stats
    }

    /// Dequeues admitted gangs from every leaf, most free entitlement
    /// first, and yields them in gang-priority order.
    fn drain_ready_gangs(&self) -> Vec<(PoolIdx, Gang)> {
        let mut arena = self.arena.lock().unwrap();
        let mut leaves = arena.leaves();
        leaves.sort_by(|a, b| {
            let free_a = free_entitlement(&arena, *a);
            let free_b = free_entitlement(&arena, *b);
            compare_resources(&free_b, &free_a)
        });

        let mut ready: MultiLevelList<(PoolIdx, Gang)> = MultiLevelList::new();
        for leaf in leaves {
            match arena.dequeue_gangs(leaf, self.dequeue_limit) {
                Ok(gangs) => {
                    for gang in gangs {
                        ready.push(gang.priority(), (leaf, gang));
                    }
                }
                Err(e) => log::debug!("leaf {leaf:?} yielded no gangs: {e}"),
            }
        }
        let mut out = Vec::with_capacity(ready.len());
        while let Some((_, entry)) = ready.pop_highest() {
            out.push(entry);
        }
        out
    }

    /// A gang whose tasks were all killed while queued is dropped instead
    /// of placed.
    fn gang_still_wanted(&self, gang: &Gang) -> bool {
        gang.tasks().iter().any(|task| {
            self.jobs
                .task_runtime(task.id)
                .map(|runtime| runtime.state == TaskState::Pending)
                .unwrap_or(false)
        })
    }

    fn place_gang(&self, hosts: &[Arc<HostSummary>], gang: &Gang) -> bool {
        let filter = gang_filter(gang);
        for host in hosts {
            let matched = host.try_match(&filter);
            if !matched.is_match() {
                continue;
            }
            let lease = matched.lease.expect("match carries a lease");

            let mut pods: Map<PodId, Resources> = Map::default();
            let mut assignments: Vec<(TaskId, PodId)> = Vec::new();
            for task in gang.tasks() {
                match self.jobs.next_pod_id(task.id) {
                    Ok(pod_id) => {
                        pods.insert(pod_id.clone(), task.resources);
                        assignments.push((task.id, pod_id));
                    }
                    Err(e) => {
                        log::warn!("task {}: no pod id: {e}", task.id);
                    }
                }
            }

            match host.complete_lease(lease.lease_id, pods) {
                Ok(()) => {
                    for (task_id, pod_id) in assignments {
                        if let Err(e) =
                            self.jobs
                                .on_task_launched(task_id, host.hostname(), pod_id.clone())
                        {
                            log::error!("task {task_id}: launch bookkeeping failed: {e}");
                            continue;
                        }
                        self.pod_events.publish(
                            format!("{pod_id}-launched"),
                            pod_event(
                                task_id,
                                pod_id,
                                TaskState::Launched,
                                TaskState::Running,
                                host.hostname(),
                                "placed",
                            ),
                        );
                    }
                    return true;
                }
                Err(e) => {
                    // The lease is already terminated; this host just lost
                    // the race, keep looking.
                    log::warn!("host {}: lease completion failed: {e}", host.hostname());
                }
            }
        }
        false
    }

    fn return_gang(&self, leaf: PoolIdx, gang: Gang) {
        let resources = gang.resources();
        let mut arena = self.arena.lock().unwrap();
        arena.mark_it_done(leaf, &resources);
        if let Err(e) = arena.get_mut(leaf).enqueue_gang(gang) {
            log::error!("failed to return gang to its pool: {e}");
        }
    }

    fn revert(&self, leaf: PoolIdx, resources: &Resources) {
        let mut arena = self.arena.lock().unwrap();
        arena.mark_it_done(leaf, resources);
    }
}

fn gang_filter(gang: &Gang) -> HostFilter {
    let mut filter = HostFilter::with_minimum(gang.resources());
    filter.hints = gang.host_hints();
    for task in gang.tasks() {
        for label in &task.constraints.required_labels {
            if !filter.required_labels.contains(label) {
                filter.required_labels.push(label.clone());
            }
        }
    }
    filter
}

fn free_entitlement(arena: &PoolArena, idx: PoolIdx) -> Resources {
    let pool = arena.get(idx);
    pool.entitlement().subtract_clamped(&pool.allocation())
}

fn compare_resources(left: &Resources, right: &Resources) -> Ordering {
    left.cpu
        .total_cmp(&right.cpu)
        .then(left.mem.total_cmp(&right.mem))
        .then(left.disk.total_cmp(&right.disk))
        .then(left.gpu.total_cmp(&right.gpu))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::jobs::tests::{fixture, test_spec, Fixture};
    use drover::ranker::LeastAllocatedRanker;

    fn engine(f: &Fixture) -> PlacementEngine {
        PlacementEngine::new(
            f.arena.clone(),
            f.host_cache.clone(),
            Box::new(LeastAllocatedRanker::new()),
            f.jobs.clone(),
            f.pod_events.clone(),
            10,
        )
    }

    fn add_host(f: &Fixture, name: &str, cpu: f64) {
        f.host_cache
            .add_host(name, Resources::new(cpu, 8192.0, 1000.0, 0.0), "v1", vec![])
            .unwrap();
    }

    fn started_job(f: &Fixture, instances: u32) -> Vec<TaskId> {
        let job_id = f.jobs.create_job(test_spec(instances)).unwrap();
        f.jobs.create_tasks(job_id).unwrap();
        let tasks = f.jobs.task_ids(job_id);
        for task_id in &tasks {
            f.jobs.start_task(*task_id).unwrap();
        }
        tasks
    }

    #[test]
    fn test_round_places_pending_tasks() {
        let f = fixture();
        add_host(&f, "hostname0", 8.0);
        let tasks = started_job(&f, 2);

        let stats = engine(&f).place_round();
        assert_eq!(stats.placed, 2);
        for task_id in tasks {
            let runtime = f.jobs.task_runtime(task_id).unwrap();
            assert_eq!(runtime.state, TaskState::Launched);
            assert_eq!(runtime.host.as_deref(), Some("hostname0"));
        }
        let host = f.host_cache.get_host("hostname0").unwrap();
        assert_eq!(host.pod_count(), 2);
        assert!(host
            .allocated()
            .approx_eq(&Resources::new(2.0, 200.0, 20.0, 0.0)));
    }

    #[test]
    fn test_unplaced_gang_returns_to_pool() {
        let f = fixture();
        // No hosts at all.
        started_job(&f, 1);
        let stats = engine(&f).place_round();
        assert_eq!(stats.placed, 0);
        assert_eq!(stats.returned, 1);

        let arena = f.arena.lock().unwrap();
        let leaf = arena.lookup_by_path("/batch").unwrap();
        assert_eq!(arena.get(leaf).pending().total_len(), 1);
        assert!(arena.get(leaf).allocation().is_empty());
        assert!(arena.get(arena.root()).allocation().is_empty());
    }

    #[test]
    fn test_killed_while_queued_is_dropped() {
        let f = fixture();
        add_host(&f, "hostname0", 8.0);
        let tasks = started_job(&f, 1);
        f.jobs.stop_task(tasks[0]).unwrap();

        let stats = engine(&f).place_round();
        assert_eq!(stats.placed, 0);
        assert_eq!(stats.dropped, 1);
        let arena = f.arena.lock().unwrap();
        let leaf = arena.lookup_by_path("/batch").unwrap();
        assert!(arena.get(leaf).allocation().is_empty());
    }

    #[test]
    fn test_placement_publishes_pod_events() {
        let f = fixture();
        add_host(&f, "hostname0", 8.0);
        started_job(&f, 1);
        engine(&f).place_round();
        // The launch event is observable by the job layer's consumer.
        let drained = f.jobs.drain_pod_events(10).unwrap();
        assert_eq!(drained, 1);
    }
}
