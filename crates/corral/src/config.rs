use crate::Result;
use drover::goalstate::EngineConfig;
use drover::ranker::RankerPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Server configuration, loaded from TOML.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub cluster: ClusterSettings,
    pub goalstate: GoalStateSettings,
    pub host: HostSettings,
    pub placement: PlacementSettings,
}

/// Root reservation of the pool tree. Child pools carve their reservations
/// out of this; the live entitlement is computed from observed host
/// capacity and can be smaller.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    pub cpu: f64,
    pub mem: f64,
    pub disk: f64,
    pub gpu: f64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            cpu: 1000.0,
            mem: 4_000_000.0,
            disk: 10_000_000.0,
            gpu: 64.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GoalStateSettings {
    pub success_retry_delay_secs: u64,
    pub failure_retry_delay_secs: u64,
    pub max_retry_delay_secs: u64,
    pub action_timeout_secs: u64,
    pub max_parallel_actions: usize,
}

impl Default for GoalStateSettings {
    fn default() -> Self {
        Self {
            success_retry_delay_secs: 5,
            failure_retry_delay_secs: 10,
            max_retry_delay_secs: 60,
            action_timeout_secs: 5,
            max_parallel_actions: 16,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    pub held_timeout_secs: u64,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            held_timeout_secs: 180,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementSettings {
    pub ranker: RankerPolicy,
    pub dequeue_limit: usize,
    pub entitlement_refresh_secs: u64,
}

impl Default for PlacementSettings {
    fn default() -> Self {
        Self {
            ranker: RankerPolicy::default(),
            dequeue_limit: 10,
            entitlement_refresh_secs: 60,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            success_retry_delay: Duration::from_secs(self.goalstate.success_retry_delay_secs),
            failure_retry_delay: Duration::from_secs(self.goalstate.failure_retry_delay_secs),
            max_retry_delay: Duration::from_secs(self.goalstate.max_retry_delay_secs),
            unknown_retry_delay: Duration::from_secs(1),
            max_parallel_actions: self.goalstate.max_parallel_actions,
        }
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.goalstate.action_timeout_secs)
    }

    pub fn held_timeout(&self) -> Duration {
        Duration::from_secs(self.host.held_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.goalstate.success_retry_delay_secs, 5);
        assert_eq!(config.goalstate.failure_retry_delay_secs, 10);
        assert_eq!(config.host.held_timeout_secs, 180);
        assert_eq!(config.placement.dequeue_limit, 10);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: ServerConfig = toml::from_str(
            r#"
            [goalstate]
            failure_retry_delay_secs = 30

            [placement]
            ranker = "bin_packing"
            "#,
        )
        .unwrap();
        assert_eq!(config.goalstate.failure_retry_delay_secs, 30);
        assert_eq!(config.goalstate.success_retry_delay_secs, 5);
        assert_eq!(config.placement.ranker, RankerPolicy::BinPacking);
    }
}
