use crate::server::jobs::JobManager;
use async_trait::async_trait;
use drover::goalstate::{ActionPlan, Entity};
use drover::state::{JobState, JobStateVector};
use drover::JobId;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Actions the goal-state engine runs for jobs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobAction {
    CreateTasks,
    Recover,
    Start,
    Kill,
    Untrack,
    StateInvalid,
    RuntimeUpdate,
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Goal-state view of one job.
pub struct JobEntity {
    job_id: JobId,
    jobs: Arc<JobManager>,
    action_timeout: Duration,
}

impl JobEntity {
    pub fn new(job_id: JobId, jobs: Arc<JobManager>, action_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            job_id,
            jobs,
            action_timeout,
        })
    }

    /// Action for the current/goal state pair: goal first, then current.
    fn suggest(&self, state: &JobStateVector, goal: &JobStateVector) -> Option<JobAction> {
        // A lagging state version means user intent changed and has not been
        // acted on yet; re-drive the transition.
        if state.state_version < goal.state_version {
            if goal.state == JobState::Running {
                return Some(if state.state == JobState::Initialized {
                    JobAction::CreateTasks
                } else {
                    JobAction::Start
                });
            }
            log::warn!(
                "job {}: state version {} diverged from goal state version {} with goal {}",
                self.job_id,
                state.state_version,
                goal.state_version,
                goal.state
            );
        }

        use JobState::*;
        match (goal.state, state.state) {
            (Running, Initialized) => Some(JobAction::CreateTasks),
            (Running, Succeeded | Failed | Killing) => Some(JobAction::StateInvalid),
            (Running, Uninitialized) => Some(JobAction::Recover),
            (Succeeded, Initialized) => Some(JobAction::CreateTasks),
            (Succeeded, Succeeded | Failed | Killed) => Some(JobAction::Untrack),
            (Succeeded, Killing) => Some(JobAction::StateInvalid),
            (Succeeded, Uninitialized) => Some(JobAction::Recover),
            (Killed, Succeeded | Failed | Killed | Uninitialized) => Some(JobAction::Untrack),
            (Killed, Initialized | Pending | Running) => Some(JobAction::Kill),
            (Failed, _) => Some(JobAction::StateInvalid),
            _ => None,
        }
    }
}

#[async_trait]
impl Entity for JobEntity {
    type State = JobStateVector;
    type Action = JobAction;

    fn id(&self) -> String {
        self.job_id.to_string()
    }

    async fn current_state(&self) -> JobStateVector {
        self.jobs.job_state_vector(self.job_id)
    }

    async fn goal_state(&self) -> JobStateVector {
        self.jobs.job_goal_vector(self.job_id)
    }

    fn is_unknown(state: &JobStateVector) -> bool {
        state.state == JobState::Unknown
    }

    fn plan(&self, state: &JobStateVector, goal: &JobStateVector) -> ActionPlan<JobAction> {
        let suggested = self.suggest(state, goal);
        log::debug!(
            "job {}: state {} goal {} -> {:?}",
            self.job_id,
            state.state,
            goal.state,
            suggested
        );
        let plan = match suggested {
            Some(JobAction::Untrack) => ActionPlan::untrack([JobAction::Untrack]),
            Some(JobAction::Recover) => ActionPlan::run([JobAction::Recover]),
            // The runtime updater tags along with every other pass so the
            // job state keeps tracking the task histogram.
            Some(action) => ActionPlan::run([action, JobAction::RuntimeUpdate]),
            None => ActionPlan::run([JobAction::RuntimeUpdate]),
        };
        plan.with_timeout(self.action_timeout)
    }

    async fn execute(&self, action: &JobAction) -> drover::Result<()> {
        let result = match action {
            JobAction::CreateTasks => self.jobs.create_tasks(self.job_id),
            JobAction::Recover => self.jobs.recover(self.job_id),
            JobAction::Start => {
                for task_id in self.jobs.task_ids(self.job_id) {
                    self.jobs.start_task(task_id)?;
                }
                Ok(())
            }
            JobAction::Kill => self.jobs.kill_job(self.job_id),
            JobAction::Untrack => self.jobs.untrack_job(self.job_id),
            JobAction::StateInvalid => {
                log::error!(
                    "job {}: unexpected state for its goal state, not acting",
                    self.job_id
                );
                Ok(())
            }
            JobAction::RuntimeUpdate => self.jobs.update_job_runtime(self.job_id),
        };
        result.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::jobs::tests::{fixture, test_spec};

    fn entity(jobs: &Arc<JobManager>, job_id: JobId) -> Arc<JobEntity> {
        JobEntity::new(job_id, jobs.clone(), Duration::from_secs(5))
    }

    fn vector(state: JobState, version: u64) -> JobStateVector {
        JobStateVector {
            state,
            state_version: version,
        }
    }

    #[test]
    fn test_action_table_goal_running() {
        let f = fixture();
        let job_id = f.jobs.create_job(test_spec(1)).unwrap();
        let entity = entity(&f.jobs, job_id);
        let goal = vector(JobState::Running, 0);
        assert_eq!(
            entity.suggest(&vector(JobState::Initialized, 0), &goal),
            Some(JobAction::CreateTasks)
        );
        assert_eq!(
            entity.suggest(&vector(JobState::Uninitialized, 0), &goal),
            Some(JobAction::Recover)
        );
        for terminal in [JobState::Succeeded, JobState::Failed, JobState::Killing] {
            assert_eq!(
                entity.suggest(&vector(terminal, 0), &goal),
                Some(JobAction::StateInvalid)
            );
        }
        assert_eq!(entity.suggest(&vector(JobState::Running, 0), &goal), None);
    }

    #[test]
    fn test_action_table_goal_killed() {
        let f = fixture();
        let job_id = f.jobs.create_job(test_spec(1)).unwrap();
        let entity = entity(&f.jobs, job_id);
        let goal = vector(JobState::Killed, 0);
        for live in [JobState::Initialized, JobState::Pending, JobState::Running] {
            assert_eq!(
                entity.suggest(&vector(live, 0), &goal),
                Some(JobAction::Kill)
            );
        }
        for done in [JobState::Succeeded, JobState::Failed, JobState::Killed] {
            assert_eq!(
                entity.suggest(&vector(done, 0), &goal),
                Some(JobAction::Untrack)
            );
        }
    }

    #[test]
    fn test_goal_failed_is_always_invalid() {
        let f = fixture();
        let job_id = f.jobs.create_job(test_spec(1)).unwrap();
        let entity = entity(&f.jobs, job_id);
        let goal = vector(JobState::Failed, 0);
        for state in [
            JobState::Initialized,
            JobState::Pending,
            JobState::Running,
            JobState::Succeeded,
            JobState::Failed,
            JobState::Killed,
            JobState::Killing,
            JobState::Uninitialized,
        ] {
            assert_eq!(
                entity.suggest(&vector(state, 0), &goal),
                Some(JobAction::StateInvalid)
            );
        }
    }

    #[test]
    fn test_state_version_divergence_redrives() {
        let f = fixture();
        let job_id = f.jobs.create_job(test_spec(1)).unwrap();
        let entity = entity(&f.jobs, job_id);
        let goal = vector(JobState::Running, 3);
        assert_eq!(
            entity.suggest(&vector(JobState::Initialized, 1), &goal),
            Some(JobAction::CreateTasks)
        );
        assert_eq!(
            entity.suggest(&vector(JobState::Running, 1), &goal),
            Some(JobAction::Start)
        );
    }

    #[test]
    fn test_plan_appends_runtime_update() {
        let f = fixture();
        let job_id = f.jobs.create_job(test_spec(1)).unwrap();
        let entity = entity(&f.jobs, job_id);
        let plan = entity.plan(
            &vector(JobState::Initialized, 0),
            &vector(JobState::Running, 0),
        );
        assert_eq!(
            plan.actions.as_slice(),
            [JobAction::CreateTasks, JobAction::RuntimeUpdate]
        );
        assert!(!plan.untrack);

        let plan = entity.plan(
            &vector(JobState::Killed, 0),
            &vector(JobState::Killed, 0),
        );
        assert!(plan.untrack);
    }
}
