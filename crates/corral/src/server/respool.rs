use crate::storage::{ObjectStore, StoreKey, Table};
use crate::transfer::messages::ResourcePoolInfo;
use crate::Result;
use drover::respool::{PoolArena, PoolIdx, ResourcePoolConfig, ROOT_POOL_ID};
use drover::Error as CoreError;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// User-facing resource pool operations over the pool tree.
pub struct ResourcePoolService {
    arena: Arc<Mutex<PoolArena>>,
    store: Arc<dyn ObjectStore>,
}

impl ResourcePoolService {
    pub fn new(arena: Arc<Mutex<PoolArena>>, store: Arc<dyn ObjectStore>) -> Self {
        Self { arena, store }
    }

    /// Creates a pool under the parent named in the config; returns its id.
    pub fn create(&self, config: ResourcePoolConfig) -> Result<String> {
        let parent_id = {
            let arena = self.arena.lock().unwrap();
            self.resolve_parent(&arena, &config)?
        };
        let id = Uuid::new_v4().to_string();
        self.arena
            .lock()
            .unwrap()
            .add_pool(id.clone(), &parent_id, config.clone())?;
        self.store.create(
            StoreKey::respool(&id),
            serde_json::to_value(&config)?,
            true,
        )?;
        log::info!("resource pool {} created as {id}", config.name);
        Ok(id)
    }

    /// Fetches a pool, optionally with its direct children.
    pub fn get(&self, id: &str, include_children: bool) -> Result<ResourcePoolInfo> {
        let arena = self.arena.lock().unwrap();
        let idx = lookup(&arena, id)?;
        Ok(info(&arena, idx, include_children))
    }

    /// Deletes an empty leaf pool.
    pub fn delete(&self, id: &str) -> Result<()> {
        self.arena.lock().unwrap().remove_pool(id)?;
        let _ = self.store.delete(&StoreKey::respool(id));
        log::info!("resource pool {id} deleted");
        Ok(())
    }

    /// Replaces a pool's configuration; `force` skips the shrink guard.
    pub fn update(&self, id: &str, config: ResourcePoolConfig, force: bool) -> Result<()> {
        self.arena
            .lock()
            .unwrap()
            .update_pool(id, config.clone(), force)?;
        self.store
            .create(StoreKey::respool(id), serde_json::to_value(&config)?, false)?;
        Ok(())
    }

    pub fn lookup_by_path(&self, path: &str) -> Result<ResourcePoolInfo> {
        let arena = self.arena.lock().unwrap();
        let idx = arena
            .lookup_by_path(path)
            .ok_or_else(|| CoreError::not_found(format!("resource pool {path} not found")))?;
        Ok(info(&arena, idx, false))
    }

    /// All pools of the tree, parents before children.
    pub fn query(&self) -> Vec<ResourcePoolInfo> {
        let arena = self.arena.lock().unwrap();
        arena
            .iter_pre_order()
            .into_iter()
            .map(|idx| info(&arena, idx, false))
            .collect()
    }

    /// Rebuilds the tree from persisted configs, for restart recovery.
    pub fn recover(&self) -> Result<usize> {
        let rows = self.store.query(Table::ResourcePools, &|_, _| true)?;
        let mut pending: Vec<(String, ResourcePoolConfig)> = rows
            .into_iter()
            .map(|(id, value)| Ok((id, serde_json::from_value(value)?)))
            .collect::<Result<_>>()?;
        let mut recovered = 0;
        // Parents may appear after their children; retry until a pass makes
        // no progress.
        while !pending.is_empty() {
            let before = pending.len();
            pending.retain(|(id, config)| {
                let mut arena = self.arena.lock().unwrap();
                if arena.contains(id) {
                    return false;
                }
                let parent_id = match self.resolve_parent(&arena, config) {
                    Ok(parent_id) => parent_id,
                    Err(_) => return true,
                };
                match arena.add_pool(id.clone(), &parent_id, config.clone()) {
                    Ok(_) => {
                        recovered += 1;
                        false
                    }
                    Err(e) => {
                        log::error!("resource pool {id} failed to recover: {e}");
                        true
                    }
                }
            });
            if pending.len() == before {
                for (id, _) in &pending {
                    log::error!("resource pool {id} could not be attached to the tree");
                }
                break;
            }
        }
        Ok(recovered)
    }

    fn resolve_parent(&self, arena: &PoolArena, config: &ResourcePoolConfig) -> Result<String> {
        let parent = config.parent.as_deref().unwrap_or(ROOT_POOL_ID);
        let idx = arena
            .lookup(parent)
            .or_else(|| arena.lookup_by_path(parent))
            .ok_or_else(|| CoreError::not_found(format!("parent pool {parent} not found")))?;
        Ok(arena.get(idx).id().to_string())
    }
}

fn lookup(arena: &PoolArena, id: &str) -> Result<PoolIdx> {
    arena
        .lookup(id)
        .ok_or_else(|| CoreError::not_found(format!("resource pool {id} not found")).into())
}

fn info(arena: &PoolArena, idx: PoolIdx, include_children: bool) -> ResourcePoolInfo {
    let pool = arena.get(idx);
    let children = if include_children {
        pool.children()
            .to_vec()
            .into_iter()
            .map(|child| info(arena, child, false))
            .collect()
    } else {
        Vec::new()
    };
    ResourcePoolInfo {
        id: pool.id().to_string(),
        path: arena.path(idx),
        config: pool.config().clone(),
        entitlement: pool.entitlement(),
        allocation: pool.allocation(),
        children,
    }
}
