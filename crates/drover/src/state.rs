use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of a job.
///
/// `Unknown` stands in for a state that could not be loaded; the goal-state
/// engine treats it as a signal to retry shortly.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum JobState {
    Uninitialized,
    Initialized,
    Pending,
    Running,
    Killing,
    Killed,
    Succeeded,
    Failed,
    Unknown,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Killed | JobState::Succeeded | JobState::Failed
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Lifecycle states of a task. A superset of [`JobState`] with the
/// launch-phase states a task passes through on its way to a host.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum TaskState {
    Uninitialized,
    Initialized,
    Pending,
    Launching,
    Launched,
    Running,
    Killing,
    Killed,
    Succeeded,
    Failed,
    Unknown,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Killed | TaskState::Succeeded | TaskState::Failed
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Snapshot of a job's state together with the user-intent counter.
/// `state_version` advances on user intent changes; a current vector lagging
/// behind the goal vector re-drives transitions.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobStateVector {
    pub state: JobState,
    pub state_version: u64,
}

/// Snapshot of a task's state together with the configuration rollout
/// counter. A mismatch between current and goal `config_version` forces a
/// stop-and-redeploy.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskStateVector {
    pub state: TaskState,
    pub config_version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Killed.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(!JobState::Killing.is_terminal());
        assert!(!JobState::Unknown.is_terminal());

        assert!(TaskState::Killed.is_terminal());
        assert!(!TaskState::Launching.is_terminal());
    }
}
