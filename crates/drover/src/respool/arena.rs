use crate::queue::Gang;
use crate::resources::{ResourceKind, Resources, EPSILON};
use crate::respool::config::ResourcePoolConfig;
use crate::respool::pool::ResPool;
use crate::{Error, Map, Result};

define_id_type!(PoolIdx, u32);

/// Arena holding the resource-pool tree.
///
/// Nodes reference each other by [`PoolIdx`] instead of owning pointers, so
/// the parent/child cycle of the tree never turns into an ownership cycle.
/// Walks follow pre-order (parent before child), which is also the lock
/// order callers must keep when wrapping the arena.
#[derive(Debug)]
pub struct PoolArena {
    pools: Vec<Option<ResPool>>,
    by_id: Map<String, PoolIdx>,
    root: PoolIdx,
}

impl PoolArena {
    pub fn new(root_config: ResourcePoolConfig) -> Result<Self> {
        let root_id = crate::respool::config::ROOT_POOL_ID.to_string();
        let root_pool = ResPool::new(root_id.clone(), None, root_config)?;
        let mut by_id = Map::default();
        by_id.insert(root_id, PoolIdx::new(0));
        Ok(Self {
            pools: vec![Some(root_pool)],
            by_id,
            root: PoolIdx::new(0),
        })
    }

    pub fn root(&self) -> PoolIdx {
        self.root
    }

    pub fn get(&self, idx: PoolIdx) -> &ResPool {
        self.pools[idx.as_num() as usize]
            .as_ref()
            .expect("pool slot is empty")
    }

    pub fn get_mut(&mut self, idx: PoolIdx) -> &mut ResPool {
        self.pools[idx.as_num() as usize]
            .as_mut()
            .expect("pool slot is empty")
    }

    pub fn lookup(&self, id: &str) -> Option<PoolIdx> {
        self.by_id.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Adds a pool under `parent_id`. Fails on duplicate id, duplicate
    /// sibling name, unknown parent, invalid config, or a child reservation
    /// sum exceeding the parent's reservation.
    pub fn add_pool(
        &mut self,
        id: impl Into<String>,
        parent_id: &str,
        config: ResourcePoolConfig,
    ) -> Result<PoolIdx> {
        let id = id.into();
        if self.by_id.contains_key(&id) {
            return Err(Error::already_exists(format!("pool {id} already exists")));
        }
        let parent_idx = self
            .lookup(parent_id)
            .ok_or_else(|| Error::not_found(format!("parent pool {parent_id} not found")))?;
        config.validate()?;

        for child_idx in self.get(parent_idx).children() {
            if self.get(*child_idx).name() == config.name {
                return Err(Error::already_exists(format!(
                    "pool named {} already exists under {}",
                    config.name, parent_id
                )));
            }
        }
        self.check_sibling_reservations(parent_idx, &config, None)?;

        let pool = ResPool::new(id.clone(), Some(parent_idx), config)?;
        let idx = PoolIdx::new(self.pools.len() as u32);
        self.pools.push(Some(pool));
        self.by_id.insert(id, idx);
        self.get_mut(parent_idx).add_child(idx);
        Ok(idx)
    }

    /// Replaces a pool's configuration. Without `force`, shrinking the
    /// reservation below the children's aggregate reservation is rejected.
    pub fn update_pool(
        &mut self,
        id: &str,
        config: ResourcePoolConfig,
        force: bool,
    ) -> Result<()> {
        let idx = self
            .lookup(id)
            .ok_or_else(|| Error::not_found(format!("pool {id} not found")))?;
        config.validate()?;
        if let Some(parent_idx) = self.get(idx).parent() {
            self.check_sibling_reservations(parent_idx, &config, Some(idx))?;
        }
        if !force {
            let mut children_reservation = Resources::default();
            for child in self.get(idx).children().to_vec() {
                children_reservation = children_reservation.add(&self.get(child).reservation());
            }
            if !config.reservation().contains(&children_reservation) {
                return Err(Error::invalid_argument(format!(
                    "pool {id}: new reservation is below the children's aggregate reservation"
                )));
            }
        }
        self.get_mut(idx).set_config(config);
        Ok(())
    }

    /// Removes a leaf pool. Interior pools and pools with pending gangs or
    /// live allocation cannot be removed.
    pub fn remove_pool(&mut self, id: &str) -> Result<()> {
        let idx = self
            .lookup(id)
            .ok_or_else(|| Error::not_found(format!("pool {id} not found")))?;
        if idx == self.root {
            return Err(Error::invalid_argument("cannot delete the root pool"));
        }
        let pool = self.get(idx);
        if !pool.is_leaf() {
            return Err(Error::failed_precondition(format!(
                "pool {id} has children and cannot be deleted"
            )));
        }
        if !pool.pending().is_empty() || !pool.allocation().is_empty() {
            return Err(Error::failed_precondition(format!(
                "pool {id} is not empty and cannot be deleted"
            )));
        }
        let parent = pool.parent();
        if let Some(parent_idx) = parent {
            self.get_mut(parent_idx).remove_child(idx);
        }
        self.by_id.remove(id);
        self.pools[idx.as_num() as usize] = None;
        Ok(())
    }

    /// Rooted `/a/b/c` path of a pool; the root itself is `/`.
    pub fn path(&self, idx: PoolIdx) -> String {
        let mut segments = Vec::new();
        let mut current = idx;
        while let Some(parent) = self.get(current).parent() {
            segments.push(self.get(current).name().to_string());
            current = parent;
        }
        if segments.is_empty() {
            return "/".to_string();
        }
        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    pub fn lookup_by_path(&self, path: &str) -> Option<PoolIdx> {
        let mut current = self.root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let next = self
                .get(current)
                .children()
                .iter()
                .copied()
                .find(|child| self.get(*child).name() == segment)?;
            current = next;
        }
        Some(current)
    }

    /// Indices of all pools, parents before children.
    pub fn iter_pre_order(&self) -> Vec<PoolIdx> {
        let mut order = Vec::with_capacity(self.by_id.len());
        let mut stack = vec![self.root];
        while let Some(idx) = stack.pop() {
            order.push(idx);
            for child in self.get(idx).children() {
                stack.push(*child);
            }
        }
        order
    }

    pub fn leaves(&self) -> Vec<PoolIdx> {
        self.iter_pre_order()
            .into_iter()
            .filter(|idx| self.get(*idx).is_leaf())
            .collect()
    }

    /// Dequeues gangs from a leaf and charges the allocation to every
    /// ancestor, keeping `allocation = Σ children.allocation` on the way up.
    pub fn dequeue_gangs(&mut self, idx: PoolIdx, limit: usize) -> Result<Vec<Gang>> {
        let gangs = self.get_mut(idx).dequeue_gang_list(limit)?;
        let total = gangs
            .iter()
            .fold(Resources::default(), |acc, gang| acc.add(&gang.resources()));
        self.charge_ancestors(idx, &total);
        Ok(gangs)
    }

    /// Returns resources to a leaf and its ancestors.
    pub fn mark_it_done(&mut self, idx: PoolIdx, r: &Resources) {
        self.get_mut(idx).mark_it_done(r);
        let mut current = self.get(idx).parent();
        while let Some(parent_idx) = current {
            self.get_mut(parent_idx).mark_it_done(r);
            current = self.get(parent_idx).parent();
        }
    }

    fn charge_ancestors(&mut self, idx: PoolIdx, r: &Resources) {
        let mut current = self.get(idx).parent();
        while let Some(parent_idx) = current {
            self.get_mut(parent_idx).add_allocation(r);
            current = self.get(parent_idx).parent();
        }
    }

    /// Recomputes every pool's entitlement for the given cluster capacity.
    ///
    /// Deterministic for a fixed snapshot: reservation floors first, then
    /// the slack of every interior node is spread over its hungry children
    /// in proportion to their share, bounded by limit and demand, until a
    /// fixpoint (at most one round per child).
    pub fn calculate_entitlement(&mut self, capacity: Resources) {
        let demands = self.collect_demands();
        self.get_mut(self.root).set_entitlement(capacity);
        for idx in self.iter_pre_order() {
            let children = self.get(idx).children().to_vec();
            if children.is_empty() {
                continue;
            }
            let parent_entitlement = self.get(idx).entitlement();
            let mut entitlements = vec![Resources::default(); children.len()];
            for kind in ResourceKind::ALL {
                let entries: Vec<ChildEntry> = children
                    .iter()
                    .map(|child| {
                        let pool = self.get(*child);
                        let resource = pool.config().resource(kind);
                        ChildEntry {
                            reservation: resource.reservation,
                            limit: resource.limit,
                            share: resource.share,
                            demand: demands[child.as_num() as usize].get(kind),
                        }
                    })
                    .collect();
                let split = distribute_kind(parent_entitlement.get(kind), &entries);
                for (slot, value) in entitlements.iter_mut().zip(split) {
                    slot.set(kind, value);
                }
            }
            for (child, entitlement) in children.iter().zip(entitlements) {
                self.get_mut(*child).set_entitlement(entitlement);
            }
        }
    }

    /// Demand per pool: leaves report allocation + pending, interior nodes
    /// aggregate their children.
    fn collect_demands(&self) -> Vec<Resources> {
        let mut demands = vec![Resources::default(); self.pools.len()];
        let mut order = self.iter_pre_order();
        order.reverse();
        for idx in order {
            let pool = self.get(idx);
            if pool.is_leaf() {
                demands[idx.as_num() as usize] = pool.demand();
            } else {
                let total = pool
                    .children()
                    .iter()
                    .fold(Resources::default(), |acc, child| {
                        acc.add(&demands[child.as_num() as usize])
                    });
                demands[idx.as_num() as usize] = total;
            }
        }
        demands
    }

    fn check_sibling_reservations(
        &self,
        parent_idx: PoolIdx,
        config: &ResourcePoolConfig,
        skip: Option<PoolIdx>,
    ) -> Result<()> {
        let parent = self.get(parent_idx);
        for kind in ResourceKind::ALL {
            let mut total = config.resource(kind).reservation;
            for child in parent.children() {
                if Some(*child) == skip {
                    continue;
                }
                total += self.get(*child).config().resource(kind).reservation;
            }
            if total > parent.config().resource(kind).reservation + EPSILON {
                return Err(Error::invalid_argument(format!(
                    "aggregate child reservation {} for {} exceeds reservation of pool {}",
                    total,
                    kind,
                    parent.id()
                )));
            }
        }
        Ok(())
    }
}

struct ChildEntry {
    reservation: f64,
    limit: f64,
    share: f64,
    demand: f64,
}

/// Splits `total` of one resource kind among children.
fn distribute_kind(total: f64, entries: &[ChildEntry]) -> Vec<f64> {
    let mut entitlements: Vec<f64> = entries
        .iter()
        .map(|e| e.reservation.min(e.limit))
        .collect();
    let reserved: f64 = entitlements.iter().sum();
    if reserved > total + EPSILON {
        // Reservations outrun what the cluster currently offers; scale the
        // floors down proportionally so children never exceed the parent.
        let scale = if reserved > 0.0 { total / reserved } else { 0.0 };
        for entitlement in &mut entitlements {
            *entitlement *= scale;
        }
        return entitlements;
    }
    let mut remaining = (total - reserved).max(0.0);

    // Each round either exhausts the slack or saturates at least one child,
    // so the fixpoint is reached within one round per child.
    for _ in 0..entries.len() {
        if remaining <= EPSILON {
            break;
        }
        let hungry: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(i, e)| {
                let cap = e.limit.min(e.demand.max(e.reservation));
                e.share > 0.0 && entitlements[*i] + EPSILON < cap
            })
            .map(|(i, _)| i)
            .collect();
        if hungry.is_empty() {
            break;
        }
        let share_sum: f64 = hungry.iter().map(|i| entries[*i].share).sum();
        let mut moved = 0.0;
        for i in &hungry {
            let entry = &entries[*i];
            let cap = entry.limit.min(entry.demand.max(entry.reservation));
            let give = (remaining * entry.share / share_sum).min(cap - entitlements[*i]);
            entitlements[*i] += give;
            moved += give;
        }
        remaining -= moved;
        if moved <= EPSILON {
            break;
        }
    }
    entitlements
}
