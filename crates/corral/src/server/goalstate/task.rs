use crate::server::jobs::{JobManager, UNKNOWN_VERSION};
use async_trait::async_trait;
use drover::goalstate::{ActionPlan, Entity};
use drover::state::{TaskState, TaskStateVector};
use drover::TaskId;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Actions the goal-state engine runs for tasks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TaskAction {
    Start,
    Stop,
    UseGoalVersion,
    Untrack,
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Goal-state view of one task instance.
pub struct TaskEntity {
    task_id: TaskId,
    jobs: Arc<JobManager>,
    action_timeout: Duration,
}

impl TaskEntity {
    pub fn new(task_id: TaskId, jobs: Arc<JobManager>, action_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            task_id,
            jobs,
            action_timeout,
        })
    }

    fn suggest(&self, state: &TaskStateVector, goal: &TaskStateVector) -> Option<TaskAction> {
        // A task off its goal configuration version is stopped and redeployed
        // at the new version; a terminal task just adopts the version.
        if state.config_version != goal.config_version {
            let unresolved = state.config_version == UNKNOWN_VERSION
                || goal.config_version == UNKNOWN_VERSION;
            if !unresolved {
                if state.state.is_terminal() {
                    return Some(TaskAction::UseGoalVersion);
                }
                return Some(TaskAction::Stop);
            }
        }

        use TaskState::*;
        match (goal.state, state.state) {
            (Running, Initialized) => Some(TaskAction::Start),
            (Succeeded, Initialized) => Some(TaskAction::Start),
            (Succeeded, Succeeded | Killed) => Some(TaskAction::Untrack),
            (Killed, Initialized | Pending | Launching | Launched | Running) => {
                Some(TaskAction::Stop)
            }
            (Killed, Killed | Succeeded | Failed) => Some(TaskAction::Untrack),
            (Failed, Failed | Succeeded | Killed) => Some(TaskAction::Untrack),
            _ => None,
        }
    }
}

#[async_trait]
impl Entity for TaskEntity {
    type State = TaskStateVector;
    type Action = TaskAction;

    fn id(&self) -> String {
        self.task_id.to_string()
    }

    async fn current_state(&self) -> TaskStateVector {
        self.jobs.task_state_vector(self.task_id)
    }

    async fn goal_state(&self) -> TaskStateVector {
        self.jobs.task_goal_vector(self.task_id)
    }

    fn is_unknown(state: &TaskStateVector) -> bool {
        state.state == TaskState::Unknown
    }

    fn plan(&self, state: &TaskStateVector, goal: &TaskStateVector) -> ActionPlan<TaskAction> {
        let suggested = self.suggest(state, goal);
        log::debug!(
            "task {}: state {} goal {} -> {:?}",
            self.task_id,
            state.state,
            goal.state,
            suggested
        );
        let plan = match suggested {
            Some(TaskAction::Untrack) => ActionPlan::untrack(Vec::new()),
            Some(action) => ActionPlan::run([action]),
            None => ActionPlan::noop(),
        };
        plan.with_timeout(self.action_timeout)
    }

    async fn execute(&self, action: &TaskAction) -> drover::Result<()> {
        let result = match action {
            TaskAction::Start => self.jobs.start_task(self.task_id),
            TaskAction::Stop => self.jobs.stop_task(self.task_id),
            TaskAction::UseGoalVersion => self.jobs.use_goal_version(self.task_id),
            TaskAction::Untrack => Ok(()),
        };
        result.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::jobs::tests::{fixture, test_spec};

    fn vector(state: TaskState, config_version: u64) -> TaskStateVector {
        TaskStateVector {
            state,
            config_version,
        }
    }

    fn test_entity() -> Arc<TaskEntity> {
        let f = fixture();
        let job_id = f.jobs.create_job(test_spec(1)).unwrap();
        f.jobs.create_tasks(job_id).unwrap();
        let task_id = f.jobs.task_ids(job_id)[0];
        TaskEntity::new(task_id, f.jobs.clone(), Duration::from_secs(5))
    }

    #[test]
    fn test_goal_running() {
        let entity = test_entity();
        let goal = vector(TaskState::Running, 0);
        assert_eq!(
            entity.suggest(&vector(TaskState::Initialized, 0), &goal),
            Some(TaskAction::Start)
        );
        assert_eq!(entity.suggest(&vector(TaskState::Running, 0), &goal), None);
    }

    #[test]
    fn test_goal_killed() {
        let entity = test_entity();
        let goal = vector(TaskState::Killed, 0);
        for live in [
            TaskState::Initialized,
            TaskState::Launching,
            TaskState::Launched,
            TaskState::Running,
        ] {
            assert_eq!(
                entity.suggest(&vector(live, 0), &goal),
                Some(TaskAction::Stop)
            );
        }
        for done in [TaskState::Killed, TaskState::Succeeded, TaskState::Failed] {
            assert_eq!(
                entity.suggest(&vector(done, 0), &goal),
                Some(TaskAction::Untrack)
            );
        }
    }

    #[test]
    fn test_version_mismatch_forces_redeploy() {
        let entity = test_entity();
        // Non-terminal task on a stale version stops first.
        assert_eq!(
            entity.suggest(
                &vector(TaskState::Running, 1),
                &vector(TaskState::Running, 2)
            ),
            Some(TaskAction::Stop)
        );
        // Terminal task switches to the goal version.
        assert_eq!(
            entity.suggest(
                &vector(TaskState::Killed, 1),
                &vector(TaskState::Killed, 2)
            ),
            Some(TaskAction::UseGoalVersion)
        );
        // Unknown versions are ignored.
        assert_eq!(
            entity.suggest(
                &vector(TaskState::Running, UNKNOWN_VERSION),
                &vector(TaskState::Running, 2)
            ),
            None
        );
    }

    #[test]
    fn test_untrack_plan_has_untrack_flag() {
        let entity = test_entity();
        let plan = entity.plan(
            &vector(TaskState::Succeeded, 0),
            &vector(TaskState::Succeeded, 0),
        );
        assert!(plan.untrack);
        assert!(plan.actions.is_empty());
    }
}
