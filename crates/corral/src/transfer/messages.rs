use chrono::{DateTime, Utc};
use drover::hostcache::{HostStatus, Label};
use drover::resources::Resources;
use drover::respool::ResourcePoolConfig;
use drover::state::{JobState, TaskState};
use drover::{InstanceId, JobId, Priority};
use serde::{Deserialize, Serialize};

/// Snapshot of one resource pool as served to clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourcePoolInfo {
    pub id: String,
    pub path: String,
    pub config: ResourcePoolConfig,
    pub entitlement: Resources,
    pub allocation: Resources,
    pub children: Vec<ResourcePoolInfo>,
}

/// Snapshot of one host as served to clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: String,
    pub status: HostStatus,
    pub capacity: Resources,
    pub allocated: Resources,
    pub labels: Vec<Label>,
    pub pod_count: usize,
}

/// Declarative job submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub owner: String,
    pub instance_count: u32,
    pub priority: Priority,
    pub resources_per_task: Resources,
    /// Path of the leaf pool the job's gangs are admitted through.
    pub respool_path: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub state: JobState,
    pub goal_state: JobState,
    pub task_states: Vec<(TaskState, usize)>,
}

/// Lifecycle states of a rolling update.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateState {
    Initialized,
    RollingForward,
    RollingBackward,
    Paused,
    Succeeded,
    Aborted,
    Failed,
    RolledBack,
}

impl UpdateState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpdateState::Succeeded
                | UpdateState::Aborted
                | UpdateState::Failed
                | UpdateState::RolledBack
        )
    }

    /// States a pause is legal from.
    pub fn is_rolling(&self) -> bool {
        matches!(
            self,
            UpdateState::RollingForward | UpdateState::RollingBackward
        )
    }
}

impl std::fmt::Display for UpdateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Rollout policy of an update.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateOptions {
    pub batch_size: u32,
    pub start_paused: bool,
    pub rollback_on_failure: bool,
    pub max_instance_attempts: u32,
    pub max_failure_instances: u32,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            batch_size: 1,
            start_paused: false,
            rollback_on_failure: false,
            max_instance_attempts: 3,
            max_failure_instances: 0,
        }
    }
}

/// Full update record; `status_only` reads strip the instance lists.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub id: String,
    pub job_id: JobId,
    pub state: UpdateState,
    pub config_version: u64,
    pub options: UpdateOptions,
    pub instances_total: u32,
    pub instances_done: u32,
    pub instances_failed: u32,
    pub instances_current: Vec<InstanceId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UpdateInfo {
    pub fn status_only(&self) -> UpdateInfo {
        UpdateInfo {
            instances_current: Vec::new(),
            ..self.clone()
        }
    }
}
