use crate::resources::{ResourceConfig, ResourceKind, Resources};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Id of the root of every pool tree.
pub const ROOT_POOL_ID: &str = "root";

/// How a pool orders its pending gangs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicy {
    #[default]
    Unknown,
    PriorityFifo,
}

/// Declarative configuration of a resource pool node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourcePoolConfig {
    pub name: String,
    /// Id of the parent pool; `None` only for the root.
    pub parent: Option<String>,
    pub resources: Vec<ResourceConfig>,
    pub policy: SchedulingPolicy,
}

impl ResourcePoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::invalid_argument("pool name must not be empty"));
        }
        if self.name.contains('/') {
            return Err(Error::invalid_argument(format!(
                "pool name {} must not contain '/'",
                self.name
            )));
        }
        if self.policy == SchedulingPolicy::Unknown {
            return Err(Error::invalid_argument("invalid queue type"));
        }
        for kind in ResourceKind::ALL {
            let count = self.resources.iter().filter(|r| r.kind == kind).count();
            if count != 1 {
                return Err(Error::invalid_argument(format!(
                    "pool {}: resource kind {} must be configured exactly once",
                    self.name, kind
                )));
            }
        }
        for resource in &self.resources {
            resource.validate()?;
        }
        Ok(())
    }

    pub fn resource(&self, kind: ResourceKind) -> &ResourceConfig {
        self.resources
            .iter()
            .find(|r| r.kind == kind)
            .expect("validated config is missing a resource kind")
    }

    pub fn reservation(&self) -> Resources {
        self.vector(|r| r.reservation)
    }

    pub fn limit(&self) -> Resources {
        self.vector(|r| r.limit)
    }

    fn vector(&self, field: impl Fn(&ResourceConfig) -> f64) -> Resources {
        let mut out = Resources::default();
        for resource in &self.resources {
            out.set(resource.kind, field(resource));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::utils::default_pool_resources;

    fn config() -> ResourcePoolConfig {
        ResourcePoolConfig {
            name: "respool1".to_string(),
            parent: Some(ROOT_POOL_ID.to_string()),
            resources: default_pool_resources(),
            policy: SchedulingPolicy::PriorityFifo,
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let mut cfg = config();
        cfg.policy = SchedulingPolicy::Unknown;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_missing_kind_rejected() {
        let mut cfg = config();
        cfg.resources.retain(|r| r.kind != ResourceKind::Gpu);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_reservation_above_limit_rejected() {
        let mut cfg = config();
        cfg.resources[0].reservation = cfg.resources[0].limit + 1.0;
        assert!(cfg.validate().is_err());
    }
}
