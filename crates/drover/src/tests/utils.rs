use crate::queue::{Gang, TaskDesc};
use crate::resources::{ResourceConfig, ResourceKind, Resources};
use crate::respool::{ResourcePoolConfig, SchedulingPolicy};
use crate::{Priority, TaskId};

pub fn task_desc(job: u32, instance: u32, priority: Priority, resources: Resources) -> TaskDesc {
    TaskDesc::new(
        TaskId::new(job.into(), instance.into()),
        priority,
        resources,
    )
}

/// Single-task gang with a small fixed demand of 1 cpu, 100 mem, 10 disk.
pub fn gang_with_priority(job: u32, instance: u32, priority: Priority) -> Gang {
    Gang::from_task(task_desc(
        job,
        instance,
        priority,
        Resources::new(1.0, 100.0, 10.0, 0.0),
    ))
}

/// Resource grid with reservation == limit for every kind.
pub fn pool_resources(cpu: f64, mem: f64, disk: f64, gpu: f64, share: f64) -> Vec<ResourceConfig> {
    vec![
        ResourceConfig {
            kind: ResourceKind::Cpu,
            reservation: cpu,
            limit: cpu,
            share,
        },
        ResourceConfig {
            kind: ResourceKind::Mem,
            reservation: mem,
            limit: mem,
            share,
        },
        ResourceConfig {
            kind: ResourceKind::Disk,
            reservation: disk,
            limit: disk,
            share,
        },
        ResourceConfig {
            kind: ResourceKind::Gpu,
            reservation: gpu,
            limit: gpu,
            share,
        },
    ]
}

/// The resource grid most pool tests run with.
pub fn default_pool_resources() -> Vec<ResourceConfig> {
    vec![
        ResourceConfig {
            kind: ResourceKind::Cpu,
            reservation: 100.0,
            limit: 1000.0,
            share: 1.0,
        },
        ResourceConfig {
            kind: ResourceKind::Mem,
            reservation: 1000.0,
            limit: 1000.0,
            share: 1.0,
        },
        ResourceConfig {
            kind: ResourceKind::Disk,
            reservation: 100.0,
            limit: 1000.0,
            share: 1.0,
        },
        ResourceConfig {
            kind: ResourceKind::Gpu,
            reservation: 2.0,
            limit: 4.0,
            share: 1.0,
        },
    ]
}

pub fn pool_config(
    name: &str,
    parent: Option<&str>,
    resources: Vec<ResourceConfig>,
) -> ResourcePoolConfig {
    ResourcePoolConfig {
        name: name.to_string(),
        parent: parent.map(|p| p.to_string()),
        resources,
        policy: SchedulingPolicy::PriorityFifo,
    }
}
