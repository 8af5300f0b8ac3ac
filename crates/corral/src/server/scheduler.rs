use crate::config::ServerConfig;
use crate::server::goalstate::{JobEntity, TaskEntity};
use crate::server::host::HostService;
use crate::server::jobs::JobManager;
use crate::server::placement::PlacementEngine;
use crate::server::respool::ResourcePoolService;
use crate::server::update::UpdateService;
use crate::storage::ObjectStore;
use crate::transfer::messages::{JobSpec, JobStatus};
use crate::Result;
use drover::events::EventStream;
use drover::goalstate::Engine;
use drover::hostcache::{HostCache, Label};
use drover::ranker::new_ranker;
use drover::resources::{ResourceConfig, ResourceKind, Resources};
use drover::respool::{PoolArena, ResourcePoolConfig, SchedulingPolicy};
use drover::JobId;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// The long-lived state of the orchestrator process.
///
/// Everything scheduling-related hangs off this one value, which the
/// leader-elected process owns exclusively; non-leaders only serve reads
/// from snapshot copies.
pub struct Scheduler {
    config: ServerConfig,
    arena: Arc<Mutex<PoolArena>>,
    host_cache: Arc<HostCache>,
    pod_events: Arc<EventStream>,
    store: Arc<dyn ObjectStore>,
    jobs: Arc<JobManager>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn ObjectStore>, config: ServerConfig) -> Result<Self> {
        let root = root_pool_config(&config);
        let arena = Arc::new(Mutex::new(PoolArena::new(root)?));
        let host_cache = Arc::new(HostCache::new());
        let pod_events = Arc::new(EventStream::new("pod-events"));
        let jobs = JobManager::new(
            store.clone(),
            arena.clone(),
            host_cache.clone(),
            pod_events.clone(),
        );
        Ok(Self {
            config,
            arena,
            host_cache,
            pod_events,
            store,
            jobs,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn jobs(&self) -> Arc<JobManager> {
        self.jobs.clone()
    }

    pub fn host_cache(&self) -> Arc<HostCache> {
        self.host_cache.clone()
    }

    pub fn pod_events(&self) -> Arc<EventStream> {
        self.pod_events.clone()
    }

    pub fn respool_service(&self) -> ResourcePoolService {
        ResourcePoolService::new(self.arena.clone(), self.store.clone())
    }

    pub fn update_service(&self) -> UpdateService {
        UpdateService::new(self.jobs.clone(), self.store.clone())
    }

    pub fn host_service(&self) -> HostService {
        HostService::new(self.host_cache.clone())
    }

    pub fn placement_engine(&self) -> Result<PlacementEngine> {
        let ranker = new_ranker(self.config.placement.ranker, None)?;
        Ok(PlacementEngine::new(
            self.arena.clone(),
            self.host_cache.clone(),
            ranker,
            self.jobs.clone(),
            self.pod_events.clone(),
            self.config.placement.dequeue_limit,
        ))
    }

    pub fn register_host(
        &self,
        hostname: &str,
        capacity: Resources,
        labels: Vec<Label>,
    ) -> Result<()> {
        self.host_cache
            .add_host(hostname, capacity, "0", labels)
            .map(|_| ())?;
        self.refresh_entitlement();
        Ok(())
    }

    /// Total capacity of the observed hosts; falls back to the configured
    /// root reservation while no host has registered yet.
    pub fn cluster_capacity(&self) -> Resources {
        let observed = self
            .host_cache
            .snapshot()
            .iter()
            .fold(Resources::default(), |acc, host| acc.add(&host.capacity()));
        if observed.is_empty() {
            let cluster = &self.config.cluster;
            Resources::new(cluster.cpu, cluster.mem, cluster.disk, cluster.gpu)
        } else {
            observed
        }
    }

    pub fn refresh_entitlement(&self) {
        let capacity = self.cluster_capacity();
        self.arena.lock().unwrap().calculate_entitlement(capacity);
    }

    /// Submits a job and hands it to the goal-state engines.
    pub fn submit_job(
        &self,
        spec: JobSpec,
        job_engine: &Engine<JobEntity>,
        task_engine: &Engine<TaskEntity>,
    ) -> Result<JobId> {
        let job_id = self.jobs.create_job(spec)?;
        self.track_job(job_id, job_engine, task_engine);
        Ok(job_id)
    }

    /// Enqueues a job and all of its tasks for reconciliation.
    pub fn track_job(
        &self,
        job_id: JobId,
        job_engine: &Engine<JobEntity>,
        task_engine: &Engine<TaskEntity>,
    ) {
        let timeout = self.config.action_timeout();
        job_engine.enqueue(
            JobEntity::new(job_id, self.jobs.clone(), timeout),
            Duration::ZERO,
        );
        for task_id in self.jobs.task_ids(job_id) {
            task_engine.enqueue(
                TaskEntity::new(task_id, self.jobs.clone(), timeout),
                Duration::ZERO,
            );
        }
    }

    pub fn job_status(&self, job_id: JobId) -> Result<JobStatus> {
        let runtime = self
            .jobs
            .job_runtime(job_id)
            .ok_or_else(|| drover::Error::not_found(format!("job {job_id} not tracked")))?;
        Ok(JobStatus {
            job_id,
            state: runtime.state,
            goal_state: runtime.goal_state,
            task_states: self.jobs.task_state_histogram(job_id),
        })
    }

    /// Runs the convergence loops until shutdown is signalled.
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let job_engine: Engine<JobEntity> = Engine::start(self.config.engine_config());
        let task_engine: Engine<TaskEntity> = Engine::start(self.config.engine_config());
        for job_id in self.jobs.job_ids() {
            self.track_job(job_id, &job_engine, &task_engine);
        }

        let placement = self.placement_engine()?;
        let mut placement_tick = tokio::time::interval(Duration::from_secs(1));
        let mut entitlement_tick = tokio::time::interval(Duration::from_secs(
            self.config.placement.entitlement_refresh_secs.max(1),
        ));
        let mut hold_tick = tokio::time::interval(Duration::from_secs(30));

        log::info!("scheduler serving");
        loop {
            tokio::select! {
                _ = placement_tick.tick() => {
                    // New task rows appear between rounds; keep their
                    // entities tracked before gangs are drained.
                    for job_id in self.jobs.job_ids() {
                        self.track_job(job_id, &job_engine, &task_engine);
                    }
                    placement.place_round();
                    if let Err(e) = self.jobs.drain_pod_events(256) {
                        log::error!("pod event drain failed: {e}");
                    }
                    self.pod_events.purge();
                }
                _ = entitlement_tick.tick() => {
                    self.refresh_entitlement();
                }
                _ = hold_tick.tick() => {
                    self.host_cache.reset_expired_holds(Instant::now());
                }
                _ = tokio::signal::ctrl_c() => {
                    log::info!("shutting down");
                    break;
                }
            }
        }
        job_engine.stop();
        task_engine.stop();
        Ok(())
    }
}

fn root_pool_config(config: &ServerConfig) -> ResourcePoolConfig {
    let cluster = &config.cluster;
    let grid = [
        (ResourceKind::Cpu, cluster.cpu),
        (ResourceKind::Mem, cluster.mem),
        (ResourceKind::Disk, cluster.disk),
        (ResourceKind::Gpu, cluster.gpu),
    ];
    ResourcePoolConfig {
        name: "root".to_string(),
        parent: None,
        resources: grid
            .into_iter()
            .map(|(kind, amount)| ResourceConfig {
                kind,
                reservation: amount,
                limit: amount,
                share: 1.0,
            })
            .collect(),
        policy: SchedulingPolicy::PriorityFifo,
    }
}
