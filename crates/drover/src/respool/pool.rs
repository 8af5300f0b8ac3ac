use crate::queue::{Gang, PriorityGangQueue};
use crate::resources::{ResourceKind, Resources};
use crate::respool::arena::PoolIdx;
use crate::respool::config::ResourcePoolConfig;
use crate::{Error, Result};

/// A node of the resource-pool tree.
///
/// Interior nodes aggregate policy and accounting; only leaves hold pending
/// gangs. Entitlement is computed by the owning [`PoolArena`], allocation is
/// updated on dequeue and on `mark_it_done`.
///
/// [`PoolArena`]: crate::respool::arena::PoolArena
#[derive(Debug)]
pub struct ResPool {
    id: String,
    parent: Option<PoolIdx>,
    children: Vec<PoolIdx>,
    config: ResourcePoolConfig,
    pending: PriorityGangQueue,
    entitlement: Resources,
    allocation: Resources,
}

impl ResPool {
    pub(crate) fn new(
        id: String,
        parent: Option<PoolIdx>,
        config: ResourcePoolConfig,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::invalid_argument(format!("error creating resource pool {id}: {e}")))?;
        Ok(Self {
            id,
            parent,
            children: Vec::new(),
            config,
            pending: PriorityGangQueue::new(),
            entitlement: Resources::default(),
            allocation: Resources::default(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ResourcePoolConfig {
        &self.config
    }

    pub(crate) fn set_config(&mut self, config: ResourcePoolConfig) {
        self.config = config;
    }

    pub fn parent(&self) -> Option<PoolIdx> {
        self.parent
    }

    pub fn children(&self) -> &[PoolIdx] {
        &self.children
    }

    pub(crate) fn add_child(&mut self, child: PoolIdx) {
        self.children.push(child);
    }

    pub(crate) fn remove_child(&mut self, child: PoolIdx) {
        self.children.retain(|c| *c != child);
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn reservation(&self) -> Resources {
        self.config.reservation()
    }

    pub fn limit(&self) -> Resources {
        self.config.limit()
    }

    pub fn entitlement(&self) -> Resources {
        self.entitlement
    }

    pub fn set_entitlement(&mut self, entitlement: Resources) {
        self.entitlement = entitlement;
    }

    pub fn set_entitlement_by_kind(&mut self, kind: ResourceKind, value: f64) {
        self.entitlement.set(kind, value);
    }

    pub fn allocation(&self) -> Resources {
        self.allocation
    }

    pub(crate) fn add_allocation(&mut self, r: &Resources) {
        self.allocation = self.allocation.add(r);
    }

    /// Returns the resources to a pool once its tasks are done with them.
    /// An over-release is clamped at zero and logged rather than propagated.
    pub fn mark_it_done(&mut self, r: &Resources) {
        if !self.allocation.contains(r) {
            log::warn!(
                "pool {}: releasing {} exceeds allocation {}, clamping at zero",
                self.id,
                r,
                self.allocation
            );
        }
        self.allocation = self.allocation.subtract_clamped(r);
    }

    /// Current resource demand: live allocation plus everything pending.
    pub fn demand(&self) -> Resources {
        self.allocation.add(&self.pending.pending_resources())
    }

    pub fn enqueue_gang(&mut self, gang: Gang) -> Result<()> {
        if !self.is_leaf() {
            return Err(Error::invalid_argument(format!(
                "pool {} is not a leaf, only leaf pools hold gangs",
                self.id
            )));
        }
        self.pending.enqueue(gang)
    }

    /// Dequeues up to `limit` gangs that fit the pool's entitlement.
    ///
    /// The head of the queue is never skipped: if it does not fit, the call
    /// fails (when nothing was dequeued yet) or returns the shorter batch.
    pub fn dequeue_gang_list(&mut self, limit: usize) -> Result<Vec<Gang>> {
        if limit == 0 {
            return Err(Error::invalid_argument(
                "dequeue limit must be greater than zero",
            ));
        }
        let mut gangs = Vec::new();
        while gangs.len() < limit {
            let fits = match self.pending.peek() {
                Some(gang) => {
                    let needed = self.allocation.add(&gang.resources());
                    self.entitlement.contains(&needed)
                }
                None => break,
            };
            if !fits {
                if gangs.is_empty() {
                    let gang = self.pending.peek().expect("peeked gang disappeared");
                    return Err(Error::failed_precondition(format!(
                        "gang resources {} do not fit entitlement {} of pool {}",
                        gang.resources(),
                        self.entitlement,
                        self.id
                    )));
                }
                break;
            }
            let gang = self.pending.pop().expect("peeked gang disappeared");
            self.allocation = self.allocation.add(&gang.resources());
            gangs.push(gang);
        }
        if gangs.is_empty() {
            return Err(Error::not_found(format!(
                "pending queue of pool {} is empty",
                self.id
            )));
        }
        Ok(gangs)
    }

    pub fn pending(&self) -> &PriorityGangQueue {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::respool::config::SchedulingPolicy;
    use crate::tests::utils::{default_pool_resources, gang_with_priority, task_desc};
    use crate::queue::Gang;

    fn leaf_pool() -> ResPool {
        let config = ResourcePoolConfig {
            name: "respool1".to_string(),
            parent: Some("root".to_string()),
            resources: default_pool_resources(),
            policy: SchedulingPolicy::PriorityFifo,
        };
        ResPool::new("pool-1".to_string(), Some(PoolIdx::new(0)), config).unwrap()
    }

    fn full_entitlement() -> Resources {
        Resources::new(100.0, 1000.0, 100.0, 2.0)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ResourcePoolConfig {
            name: "respool1".to_string(),
            parent: Some("root".to_string()),
            resources: default_pool_resources(),
            policy: SchedulingPolicy::Unknown,
        };
        assert!(ResPool::new("p".into(), None, config.clone()).is_err());
        config.policy = SchedulingPolicy::PriorityFifo;
        config.resources.pop();
        assert!(ResPool::new("p".into(), None, config).is_err());
    }

    #[test]
    fn test_enqueue_and_counts() {
        let mut pool = leaf_pool();
        for (priority, instance) in [(0, 0), (1, 1), (2, 2), (2, 3)] {
            pool.enqueue_gang(gang_with_priority(1, instance, priority))
                .unwrap();
        }
        assert_eq!(pool.pending().len(2), 2);
        assert_eq!(pool.pending().len(1), 1);
        assert_eq!(pool.pending().len(0), 1);
    }

    #[test]
    fn test_dequeue_updates_allocation() {
        let mut pool = leaf_pool();
        pool.set_entitlement(full_entitlement());
        pool.enqueue_gang(gang_with_priority(1, 0, 0)).unwrap();
        let gangs = pool.dequeue_gang_list(1).unwrap();
        assert_eq!(gangs.len(), 1);
        assert!(pool.allocation().approx_eq(&gangs[0].resources()));

        pool.mark_it_done(&gangs[0].resources());
        assert!(pool.allocation().approx_eq(&Resources::default()));
    }

    #[test]
    fn test_mark_it_done_clamps_at_zero() {
        let mut pool = leaf_pool();
        pool.mark_it_done(&Resources::new(5.0, 5.0, 5.0, 0.0));
        assert!(pool.allocation().approx_eq(&Resources::default()));
    }

    #[test]
    fn test_head_of_line_blocking() {
        let mut pool = leaf_pool();
        pool.set_entitlement(full_entitlement());
        let big = Gang::from_task(task_desc(
            3,
            0,
            3,
            Resources::new(200.0, 100.0, 10.0, 0.0),
        ));
        pool.enqueue_gang(big).unwrap();
        // Entitlement cpu=100 cannot admit a 200 cpu gang.
        assert!(matches!(
            pool.dequeue_gang_list(1),
            Err(Error::FailedPrecondition(_))
        ));
        // Raising the entitlement unblocks the head of the line.
        pool.set_entitlement_by_kind(ResourceKind::Cpu, 500.0);
        let gangs = pool.dequeue_gang_list(1).unwrap();
        assert_eq!(gangs.len(), 1);
    }

    #[test]
    fn test_head_blocked_batch_is_cut_short() {
        let mut pool = leaf_pool();
        pool.set_entitlement(Resources::new(2.0, 1000.0, 100.0, 0.0));
        pool.enqueue_gang(gang_with_priority(1, 0, 5)).unwrap();
        pool.enqueue_gang(gang_with_priority(1, 1, 5)).unwrap();
        pool.enqueue_gang(gang_with_priority(1, 2, 5)).unwrap();
        // Only two single-cpu gangs fit the cpu=2 entitlement.
        let gangs = pool.dequeue_gang_list(3).unwrap();
        assert_eq!(gangs.len(), 2);
        assert_eq!(pool.pending().len(5), 1);
    }

    #[test]
    fn test_interior_node_rejects_gangs() {
        let mut pool = leaf_pool();
        pool.add_child(PoolIdx::new(7));
        assert!(pool.enqueue_gang(gang_with_priority(1, 0, 0)).is_err());
    }
}
