use crate::storage::{ObjectStore, StoreKey};
use crate::transfer::messages::JobSpec;
use crate::{Map, Result};
use chrono::Utc;
use drover::events::{DedupFilter, Event, EventStream, PodEvent};
use drover::hostcache::HostCache;
use drover::queue::{Gang, TaskDesc};
use drover::respool::PoolArena;
use drover::state::{JobState, JobStateVector, TaskState, TaskStateVector};
use drover::{Error as CoreError, InstanceId, JobId, PodId, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Sentinel for a configuration version that could not be resolved; version
/// checks are skipped against it.
pub const UNKNOWN_VERSION: u64 = u64::MAX;

/// Stream consumer name of the job layer.
const POD_EVENT_CONSUMER: &str = "jobmgr";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRuntime {
    pub state: JobState,
    pub goal_state: JobState,
    pub state_version: u64,
    pub goal_state_version: u64,
    pub config_version: u64,
    pub goal_config_version: u64,
}

impl JobRuntime {
    fn new() -> Self {
        Self {
            state: JobState::Initialized,
            goal_state: JobState::Running,
            state_version: 0,
            goal_state_version: 0,
            config_version: 0,
            goal_config_version: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRuntime {
    pub state: TaskState,
    pub goal_state: TaskState,
    pub config_version: u64,
    pub goal_config_version: u64,
    pub host: Option<String>,
    pub pod_id: Option<PodId>,
    pub run_id: u32,
}

impl TaskRuntime {
    fn new() -> Self {
        Self {
            state: TaskState::Initialized,
            goal_state: TaskState::Running,
            config_version: 0,
            goal_config_version: 0,
            host: None,
            pod_id: None,
            run_id: 0,
        }
    }

    /// True once the task's gang was dequeued and charged against its pool,
    /// i.e. there is an allocation to give back on termination. A `Pending`
    /// task still sits in the queue and holds nothing.
    fn holds_resources(&self) -> bool {
        matches!(
            self.state,
            TaskState::Launching | TaskState::Launched | TaskState::Running | TaskState::Killing
        )
    }
}

struct JobRecord {
    spec: JobSpec,
    respool_id: String,
    runtime: JobRuntime,
    tasks: Map<InstanceId, TaskRuntime>,
}

/// In-memory view of jobs and tasks, persisted through the object store.
///
/// The goal-state entities and the placement engine both act through this
/// layer; it owns the bookkeeping that ties tasks to pool allocations and
/// host pods.
pub struct JobManager {
    store: Arc<dyn ObjectStore>,
    arena: Arc<Mutex<PoolArena>>,
    host_cache: Arc<HostCache>,
    pod_events: Arc<EventStream>,
    inner: RwLock<Map<JobId, JobRecord>>,
    dedup: Mutex<DedupFilter>,
    next_job_id: AtomicU32,
}

impl JobManager {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        arena: Arc<Mutex<PoolArena>>,
        host_cache: Arc<HostCache>,
        pod_events: Arc<EventStream>,
    ) -> Arc<Self> {
        if let Err(e) = pod_events.subscribe(POD_EVENT_CONSUMER) {
            log::debug!("pod event subscription: {e}");
        }
        Arc::new(Self {
            store,
            arena,
            host_cache,
            pod_events,
            inner: RwLock::new(Map::default()),
            dedup: Mutex::new(DedupFilter::new()),
            next_job_id: AtomicU32::new(1),
        })
    }

    pub fn create_job(&self, spec: JobSpec) -> Result<JobId> {
        if spec.instance_count == 0 {
            return Err(CoreError::invalid_argument("job needs at least one instance").into());
        }
        let respool_id = {
            let arena = self.arena.lock().unwrap();
            let idx = arena.lookup_by_path(&spec.respool_path).ok_or_else(|| {
                CoreError::not_found(format!("resource pool {} not found", spec.respool_path))
            })?;
            if !arena.get(idx).is_leaf() {
                return Err(CoreError::invalid_argument(format!(
                    "resource pool {} is not a leaf",
                    spec.respool_path
                ))
                .into());
            }
            arena.get(idx).id().to_string()
        };

        let job_id = JobId::new(self.next_job_id.fetch_add(1, Ordering::SeqCst));
        let runtime = JobRuntime::new();
        self.store.create(
            StoreKey::job_config(job_id),
            serde_json::to_value(&spec)?,
            true,
        )?;
        self.persist_job_runtime(job_id, &runtime)?;

        self.inner.write().unwrap().insert(
            job_id,
            JobRecord {
                spec,
                respool_id,
                runtime,
                tasks: Map::default(),
            },
        );
        log::info!("job {job_id} created");
        Ok(job_id)
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.inner.read().unwrap().contains_key(&job_id)
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.inner.read().unwrap().keys().copied().collect()
    }

    pub fn spec(&self, job_id: JobId) -> Option<JobSpec> {
        self.inner
            .read()
            .unwrap()
            .get(&job_id)
            .map(|record| record.spec.clone())
    }

    pub fn job_runtime(&self, job_id: JobId) -> Option<JobRuntime> {
        self.inner
            .read()
            .unwrap()
            .get(&job_id)
            .map(|record| record.runtime.clone())
    }

    pub fn job_state_vector(&self, job_id: JobId) -> JobStateVector {
        match self.inner.read().unwrap().get(&job_id) {
            Some(record) => JobStateVector {
                state: record.runtime.state,
                state_version: record.runtime.state_version,
            },
            None => JobStateVector {
                state: JobState::Unknown,
                state_version: 0,
            },
        }
    }

    pub fn job_goal_vector(&self, job_id: JobId) -> JobStateVector {
        match self.inner.read().unwrap().get(&job_id) {
            Some(record) => JobStateVector {
                state: record.runtime.goal_state,
                state_version: record.runtime.goal_state_version,
            },
            None => JobStateVector {
                state: JobState::Unknown,
                state_version: 0,
            },
        }
    }

    pub fn task_state_vector(&self, task_id: TaskId) -> TaskStateVector {
        let inner = self.inner.read().unwrap();
        match inner
            .get(&task_id.job_id())
            .and_then(|record| record.tasks.get(&task_id.instance_id()))
        {
            Some(task) => TaskStateVector {
                state: task.state,
                config_version: task.config_version,
            },
            None => TaskStateVector {
                state: TaskState::Unknown,
                config_version: UNKNOWN_VERSION,
            },
        }
    }

    pub fn task_goal_vector(&self, task_id: TaskId) -> TaskStateVector {
        let inner = self.inner.read().unwrap();
        match inner
            .get(&task_id.job_id())
            .and_then(|record| record.tasks.get(&task_id.instance_id()))
        {
            Some(task) => TaskStateVector {
                state: task.goal_state,
                config_version: task.goal_config_version,
            },
            None => TaskStateVector {
                state: TaskState::Unknown,
                config_version: UNKNOWN_VERSION,
            },
        }
    }

    pub fn task_runtime(&self, task_id: TaskId) -> Option<TaskRuntime> {
        self.inner
            .read()
            .unwrap()
            .get(&task_id.job_id())
            .and_then(|record| record.tasks.get(&task_id.instance_id()).cloned())
    }

    /// Pod id of the task's next run, minted at placement time.
    pub fn next_pod_id(&self, task_id: TaskId) -> Result<PodId> {
        self.task_runtime(task_id)
            .map(|task| PodId::from_task(task_id, task.run_id + 1))
            .ok_or_else(|| CoreError::not_found(format!("task {task_id} not tracked")).into())
    }

    pub fn task_ids(&self, job_id: JobId) -> Vec<TaskId> {
        self.inner
            .read()
            .unwrap()
            .get(&job_id)
            .map(|record| {
                let mut instances: Vec<InstanceId> = record.tasks.keys().copied().collect();
                instances.sort();
                instances
                    .into_iter()
                    .map(|instance| TaskId::new(job_id, instance))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn task_state_histogram(&self, job_id: JobId) -> Vec<(TaskState, usize)> {
        let inner = self.inner.read().unwrap();
        let mut histogram: Map<TaskState, usize> = Map::default();
        if let Some(record) = inner.get(&job_id) {
            for task in record.tasks.values() {
                *histogram.entry(task.state).or_default() += 1;
            }
        }
        let mut entries: Vec<_> = histogram.into_iter().collect();
        entries.sort_by_key(|(state, _)| format!("{state:?}"));
        entries
    }

    /// Materializes the task rows of a freshly created job and moves the
    /// job to `Pending`.
    pub fn create_tasks(&self, job_id: JobId) -> Result<()> {
        let rows = {
            let mut inner = self.inner.write().unwrap();
            let record = known_job(&mut inner, job_id)?;
            let mut rows = Vec::new();
            for instance in 0..record.spec.instance_count {
                let instance = InstanceId::new(instance);
                let task = record.tasks.entry(instance).or_insert_with(TaskRuntime::new);
                rows.push((
                    StoreKey::task_runtime(TaskId::new(job_id, instance)),
                    serde_json::to_value(&*task)?,
                ));
            }
            record.runtime.state = JobState::Pending;
            rows
        };
        self.store.create_batch(rows, false)?;
        self.persist_current_job_runtime(job_id)?;
        Ok(())
    }

    /// Re-creates missing task rows of a partially created job.
    pub fn recover(&self, job_id: JobId) -> Result<()> {
        self.create_tasks(job_id)
    }

    /// Sets the kill goal on every task and marks the job `Killing`.
    pub fn kill_job(&self, job_id: JobId) -> Result<()> {
        {
            let mut inner = self.inner.write().unwrap();
            let record = known_job(&mut inner, job_id)?;
            for task in record.tasks.values_mut() {
                if !task.state.is_terminal() {
                    task.goal_state = TaskState::Killed;
                }
            }
            if !record.runtime.state.is_terminal() {
                record.runtime.state = JobState::Killing;
            }
        }
        self.persist_current_job_runtime(job_id)?;
        log::info!("job {job_id}: kill requested for all tasks");
        Ok(())
    }

    /// Changes the declared goal of a job, advancing the intent counter.
    pub fn set_job_goal(&self, job_id: JobId, goal: JobState) -> Result<()> {
        {
            let mut inner = self.inner.write().unwrap();
            let record = known_job(&mut inner, job_id)?;
            record.runtime.goal_state = goal;
            record.runtime.goal_state_version += 1;
        }
        self.persist_current_job_runtime(job_id)
    }

    /// Points a job (and its tasks' goals) at a new configuration version.
    pub fn set_goal_config_version(&self, job_id: JobId, version: u64) -> Result<()> {
        {
            let mut inner = self.inner.write().unwrap();
            let record = known_job(&mut inner, job_id)?;
            record.runtime.goal_config_version = version;
            for task in record.tasks.values_mut() {
                task.goal_config_version = version;
            }
        }
        self.persist_current_job_runtime(job_id)
    }

    /// Drops a fully terminal job from tracking and storage.
    pub fn untrack_job(&self, job_id: JobId) -> Result<()> {
        let tasks = {
            let inner = self.inner.read().unwrap();
            let Some(record) = inner.get(&job_id) else {
                return Ok(());
            };
            if record.tasks.values().any(|task| !task.state.is_terminal()) {
                return Err(CoreError::failed_precondition(format!(
                    "job {job_id} still has non-terminal tasks"
                ))
                .into());
            }
            record.tasks.keys().copied().collect::<Vec<_>>()
        };
        for instance in tasks {
            let _ = self
                .store
                .delete(&StoreKey::task_runtime(TaskId::new(job_id, instance)));
        }
        let _ = self.store.delete(&StoreKey::job_runtime(job_id));
        let _ = self.store.delete(&StoreKey::job_config(job_id));
        self.inner.write().unwrap().remove(&job_id);
        log::info!("job {job_id} untracked");
        Ok(())
    }

    /// Re-derives the job state from the task state histogram.
    pub fn update_job_runtime(&self, job_id: JobId) -> Result<()> {
        {
            let mut inner = self.inner.write().unwrap();
            let record = known_job(&mut inner, job_id)?;
            if record.tasks.is_empty() {
                return Ok(());
            }
            let tasks = record.tasks.values();
            let total = record.tasks.len();
            let mut terminal = 0;
            let mut succeeded = 0;
            let mut failed = 0;
            let mut running = 0;
            for task in tasks {
                if task.state.is_terminal() {
                    terminal += 1;
                }
                match task.state {
                    TaskState::Succeeded => succeeded += 1,
                    TaskState::Failed => failed += 1,
                    TaskState::Running => running += 1,
                    _ => {}
                }
            }
            let state = if succeeded == total {
                JobState::Succeeded
            } else if terminal == total && failed > 0 {
                JobState::Failed
            } else if terminal == total {
                JobState::Killed
            } else if record.runtime.state == JobState::Killing {
                JobState::Killing
            } else if running > 0 {
                JobState::Running
            } else {
                JobState::Pending
            };
            if state != record.runtime.state {
                log::debug!(
                    "job {job_id}: runtime state {} -> {state}",
                    record.runtime.state
                );
                record.runtime.state = state;
            }
            if record.runtime.state == record.runtime.goal_state {
                record.runtime.state_version = record.runtime.goal_state_version;
            }
        }
        self.persist_current_job_runtime(job_id)
    }

    /// Admits a task into its pool: the task turns `Pending` and its gang
    /// joins the leaf's pending queue.
    pub fn start_task(&self, task_id: TaskId) -> Result<()> {
        let (desc, respool_id) = {
            let mut inner = self.inner.write().unwrap();
            let record = known_job(&mut inner, task_id.job_id())?;
            let spec = record.spec.clone();
            let respool_id = record.respool_id.clone();
            let task = known_task(record, task_id)?;
            task.state = TaskState::Pending;
            let mut desc = TaskDesc::new(task_id, spec.priority, spec.resources_per_task);
            desc.config_version = task.config_version;
            (desc, respool_id)
        };
        {
            let mut arena = self.arena.lock().unwrap();
            let idx = arena.lookup(&respool_id).ok_or_else(|| {
                CoreError::not_found(format!("resource pool {respool_id} not found"))
            })?;
            arena.get_mut(idx).enqueue_gang(Gang::from_task(desc))?;
        }
        self.persist_task(task_id)?;
        self.append_task_state(task_id, TaskState::Pending);
        Ok(())
    }

    /// Stops a task, returning its host pod and pool allocation.
    pub fn stop_task(&self, task_id: TaskId) -> Result<()> {
        let (held, host, pod_id, resources, respool_id) = {
            let mut inner = self.inner.write().unwrap();
            let record = known_job(&mut inner, task_id.job_id())?;
            let resources = record.spec.resources_per_task;
            let respool_id = record.respool_id.clone();
            let task = known_task(record, task_id)?;
            if task.state.is_terminal() {
                return Ok(());
            }
            let held = task.holds_resources();
            let host = task.host.take();
            let pod_id = task.pod_id.take();
            task.state = TaskState::Killed;
            (held, host, pod_id, resources, respool_id)
        };
        if let (Some(host), Some(pod_id)) = (host.as_deref(), pod_id.as_ref()) {
            match self.host_cache.get_host(host) {
                Ok(summary) => summary.release_pod_resources(pod_id),
                Err(e) => log::warn!("task {task_id}: releasing pod on {host}: {e}"),
            }
        }
        if held {
            let mut arena = self.arena.lock().unwrap();
            if let Some(idx) = arena.lookup(&respool_id) {
                arena.mark_it_done(idx, &resources);
            }
        }
        self.persist_task(task_id)?;
        self.append_task_state(task_id, TaskState::Killed);
        Ok(())
    }

    /// Adopts the goal configuration version of a terminal task.
    pub fn use_goal_version(&self, task_id: TaskId) -> Result<()> {
        {
            let mut inner = self.inner.write().unwrap();
            let record = known_job(&mut inner, task_id.job_id())?;
            let task = known_task(record, task_id)?;
            task.config_version = task.goal_config_version;
        }
        self.persist_task(task_id)
    }

    /// Records a successful placement: the task is launched on the host.
    pub fn on_task_launched(&self, task_id: TaskId, hostname: &str, pod_id: PodId) -> Result<()> {
        {
            let mut inner = self.inner.write().unwrap();
            let record = known_job(&mut inner, task_id.job_id())?;
            let task = known_task(record, task_id)?;
            task.state = TaskState::Launched;
            task.host = Some(hostname.to_string());
            task.pod_id = Some(pod_id);
            task.run_id += 1;
        }
        self.persist_task(task_id)?;
        self.append_task_state(task_id, TaskState::Launched);
        Ok(())
    }

    /// Applies one pod event from the host-agent adapter. Redelivered
    /// events are dropped by event id.
    pub fn apply_pod_event(&self, event: &Event) -> Result<()> {
        if !self.dedup.lock().unwrap().accept(event) {
            log::debug!("pod event {} already applied", event.event_id);
            return Ok(());
        }
        let payload = &event.payload;
        let task_id = payload.task_id;
        let released = {
            let mut inner = self.inner.write().unwrap();
            let record = known_job(&mut inner, task_id.job_id())?;
            let resources = record.spec.resources_per_task;
            let respool_id = record.respool_id.clone();
            let task = known_task(record, task_id)?;
            if task.pod_id.as_ref() != Some(&payload.pod_id) {
                log::debug!(
                    "pod event {} is for a stale run of task {task_id}",
                    event.event_id
                );
                return Ok(());
            }
            let was_holding = task.holds_resources();
            task.state = payload.actual_state;
            if payload.actual_state.is_terminal() {
                task.host = None;
                task.pod_id = None;
            }
            (was_holding && payload.actual_state.is_terminal())
                .then_some((respool_id, resources, payload.hostname.clone(), payload.pod_id.clone()))
        };
        if let Some((respool_id, resources, hostname, pod_id)) = released {
            match self.host_cache.get_host(&hostname) {
                Ok(summary) => summary.release_pod_resources(&pod_id),
                Err(e) => log::warn!("task {task_id}: releasing pod on {hostname}: {e}"),
            }
            let mut arena = self.arena.lock().unwrap();
            if let Some(idx) = arena.lookup(&respool_id) {
                arena.mark_it_done(idx, &resources);
            }
        }
        self.persist_task(task_id)?;
        self.append_task_state(task_id, payload.actual_state);
        Ok(())
    }

    /// Polls and applies pending pod events; acknowledges what was applied.
    pub fn drain_pod_events(&self, max: usize) -> Result<usize> {
        let events = self.pod_events.poll(POD_EVENT_CONSUMER, max)?;
        let mut applied = 0;
        let mut last_offset = None;
        for event in &events {
            if let Err(e) = self.apply_pod_event(event) {
                log::error!("pod event {} failed to apply: {e}", event.event_id);
            } else {
                applied += 1;
            }
            last_offset = Some(event.offset);
        }
        if let Some(offset) = last_offset {
            self.pod_events.ack(POD_EVENT_CONSUMER, offset)?;
        }
        Ok(applied)
    }

    fn persist_job_runtime(&self, job_id: JobId, runtime: &JobRuntime) -> Result<()> {
        self.store.create(
            StoreKey::job_runtime(job_id),
            serde_json::to_value(runtime)?,
            false,
        )
    }

    fn persist_current_job_runtime(&self, job_id: JobId) -> Result<()> {
        let Some(runtime) = self.job_runtime(job_id) else {
            return Ok(());
        };
        self.persist_job_runtime(job_id, &runtime)
    }

    fn persist_task(&self, task_id: TaskId) -> Result<()> {
        let task = {
            let inner = self.inner.read().unwrap();
            inner
                .get(&task_id.job_id())
                .and_then(|record| record.tasks.get(&task_id.instance_id()).cloned())
        };
        let Some(task) = task else {
            return Ok(());
        };
        self.store.create(
            StoreKey::task_runtime(task_id),
            serde_json::to_value(&task)?,
            false,
        )
    }

    fn append_task_state(&self, task_id: TaskId, state: TaskState) {
        let entry = json!({
            "state": state,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Err(e) = self
            .store
            .append(&StoreKey::task_state_changes(task_id), entry)
        {
            log::error!("task {task_id}: state change log append failed: {e}");
        }
    }
}

fn known_job<'a>(
    inner: &'a mut Map<JobId, JobRecord>,
    job_id: JobId,
) -> Result<&'a mut JobRecord> {
    inner
        .get_mut(&job_id)
        .ok_or_else(|| CoreError::not_found(format!("job {job_id} not tracked")).into())
}

fn known_task(record: &mut JobRecord, task_id: TaskId) -> Result<&mut TaskRuntime> {
    record
        .tasks
        .get_mut(&task_id.instance_id())
        .ok_or_else(|| CoreError::not_found(format!("task {task_id} not tracked")).into())
}

/// Builds the payload of a pod event for the given task state change.
pub fn pod_event(
    task_id: TaskId,
    pod_id: PodId,
    actual: TaskState,
    desired: TaskState,
    hostname: &str,
    message: &str,
) -> PodEvent {
    PodEvent {
        pod_id,
        task_id,
        actual_state: actual,
        desired_state: desired,
        hostname: hostname.to_string(),
        message: message.to_string(),
        timestamp: Utc::now(),
    }
}
