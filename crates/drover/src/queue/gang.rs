use crate::hostcache::Label;
use crate::resources::Resources;
use crate::{Error, Priority, Result, TaskId};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Placement requirements carried by a task.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlacementConstraints {
    /// Hosts the task prefers; required to match a host in `Held` status.
    pub host_hints: SmallVec<[String; 1]>,
    /// Labels the target host must carry.
    pub required_labels: Vec<Label>,
}

/// Scheduling-relevant description of a task.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDesc {
    pub id: TaskId,
    pub priority: Priority,
    pub resources: Resources,
    pub constraints: PlacementConstraints,
    pub config_version: u64,
}

impl TaskDesc {
    pub fn new(id: TaskId, priority: Priority, resources: Resources) -> Self {
        Self {
            id,
            priority,
            resources,
            constraints: PlacementConstraints::default(),
            config_version: 0,
        }
    }
}

/// A set of tasks admitted and placed all-or-nothing.
///
/// A lone task is a gang of size one. The aggregate resource demand is
/// computed once at construction; gang members never change afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Gang {
    tasks: SmallVec<[TaskDesc; 1]>,
    total: Resources,
    priority: Priority,
}

impl Gang {
    pub fn new(tasks: Vec<TaskDesc>) -> Result<Self> {
        if tasks.is_empty() {
            return Err(Error::invalid_argument("gang has no elements"));
        }
        let total = Resources::sum(tasks.iter().map(|t| &t.resources));
        let priority = tasks[0].priority;
        Ok(Self {
            tasks: tasks.into(),
            total,
            priority,
        })
    }

    pub fn from_task(task: TaskDesc) -> Self {
        let total = task.resources;
        let priority = task.priority;
        Self {
            tasks: smallvec::smallvec![task],
            total,
            priority,
        }
    }

    pub fn tasks(&self) -> &[TaskDesc] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Aggregate resource demand of all members.
    pub fn resources(&self) -> Resources {
        self.total
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Union of the members' host hints, used when matching held hosts.
    pub fn host_hints(&self) -> Vec<String> {
        let mut hints = Vec::new();
        for task in &self.tasks {
            for hint in &task.constraints.host_hints {
                if !hints.contains(hint) {
                    hints.push(hint.clone());
                }
            }
        }
        hints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::utils::task_desc;

    #[test]
    fn test_empty_gang_rejected() {
        assert!(Gang::new(vec![]).is_err());
    }

    #[test]
    fn test_gang_aggregates_resources() {
        let gang = Gang::new(vec![
            task_desc(1, 0, 0, Resources::new(1.0, 100.0, 10.0, 0.0)),
            task_desc(1, 1, 0, Resources::new(2.0, 200.0, 20.0, 1.0)),
        ])
        .unwrap();
        assert_eq!(gang.len(), 2);
        assert!(gang
            .resources()
            .approx_eq(&Resources::new(3.0, 300.0, 30.0, 1.0)));
    }
}
