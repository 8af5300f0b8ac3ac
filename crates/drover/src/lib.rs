#[macro_use]
pub mod common;
pub mod events;
pub mod goalstate;
pub mod hostcache;
pub mod queue;
pub mod ranker;
pub mod resources;
pub mod respool;
pub mod state;

#[cfg(test)]
pub(crate) mod tests;

pub use common::{Map, Set};

pub type Error = crate::common::error::DroverError;
pub type Result<T> = std::result::Result<T, Error>;

// Priority: bigger number -> higher priority
pub type Priority = u32;

define_id_type!(JobId, u32);
define_id_type!(InstanceId, u32);

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};

/// Identifies a single task: an instance of a job.
#[derive(Default, Copy, Clone, Hash, PartialOrd, Ord, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskId {
    job_id: JobId,
    instance_id: InstanceId,
}

impl TaskId {
    #[inline]
    pub fn new(job_id: JobId, instance_id: InstanceId) -> Self {
        Self {
            job_id,
            instance_id,
        }
    }

    #[inline]
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    #[inline]
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.job_id, self.instance_id)
    }
}

impl Debug for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// Identifier of a single run of a task on a host.
/// Pods are keyed by this id in the host cache and in pod events.
#[derive(Clone, Hash, PartialOrd, Ord, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodId(String);

impl PodId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn from_task(task_id: TaskId, run: u32) -> Self {
        Self(format!("{task_id}-{run}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PodId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Display for PodId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for PodId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
