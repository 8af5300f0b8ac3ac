use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tolerance used for floating point comparisons of resource amounts.
/// Absorbs rounding accumulated by repeated add/subtract cycles.
pub const EPSILON: f64 = 1e-6;

#[inline]
fn less_than_or_equal(left: f64, right: f64) -> bool {
    left <= right + EPSILON
}

/// Kinds of scalar resources tracked per task, pool and host.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cpu,
    Mem,
    Disk,
    Gpu,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Cpu,
        ResourceKind::Mem,
        ResourceKind::Disk,
        ResourceKind::Gpu,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Mem => "memory",
            ResourceKind::Disk => "disk",
            ResourceKind::Gpu => "gpu",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scalar resource vector.
///
/// All operations are pure; the value is small enough to be `Copy`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu: f64,
    pub mem: f64,
    pub disk: f64,
    pub gpu: f64,
}

impl Resources {
    pub fn new(cpu: f64, mem: f64, disk: f64, gpu: f64) -> Self {
        Self {
            cpu,
            mem,
            disk,
            gpu,
        }
    }

    #[inline]
    pub fn get(&self, kind: ResourceKind) -> f64 {
        match kind {
            ResourceKind::Cpu => self.cpu,
            ResourceKind::Mem => self.mem,
            ResourceKind::Disk => self.disk,
            ResourceKind::Gpu => self.gpu,
        }
    }

    #[inline]
    pub fn set(&mut self, kind: ResourceKind, value: f64) {
        match kind {
            ResourceKind::Cpu => self.cpu = value,
            ResourceKind::Mem => self.mem = value,
            ResourceKind::Disk => self.disk = value,
            ResourceKind::Gpu => self.gpu = value,
        }
    }

    pub fn add(&self, other: &Resources) -> Resources {
        Resources {
            cpu: self.cpu + other.cpu,
            mem: self.mem + other.mem,
            disk: self.disk + other.disk,
            gpu: self.gpu + other.gpu,
        }
    }

    /// Subtracts `other`, succeeding only if every component of `self`
    /// dominates the corresponding component of `other`.
    pub fn try_subtract(&self, other: &Resources) -> Option<Resources> {
        if !self.contains(other) {
            return None;
        }
        Some(Resources {
            cpu: (self.cpu - other.cpu).max(0.0),
            mem: (self.mem - other.mem).max(0.0),
            disk: (self.disk - other.disk).max(0.0),
            gpu: (self.gpu - other.gpu).max(0.0),
        })
    }

    /// Subtracts `other` componentwise, clamping every component at zero.
    pub fn subtract_clamped(&self, other: &Resources) -> Resources {
        Resources {
            cpu: (self.cpu - other.cpu).max(0.0),
            mem: (self.mem - other.mem).max(0.0),
            disk: (self.disk - other.disk).max(0.0),
            gpu: (self.gpu - other.gpu).max(0.0),
        }
    }

    /// True if every component of `self` is >= the corresponding component
    /// of `other` (up to [`EPSILON`]).
    pub fn contains(&self, other: &Resources) -> bool {
        less_than_or_equal(other.cpu, self.cpu)
            && less_than_or_equal(other.mem, self.mem)
            && less_than_or_equal(other.disk, self.disk)
            && less_than_or_equal(other.gpu, self.gpu)
    }

    /// Componentwise minimum.
    pub fn minimum(&self, other: &Resources) -> Resources {
        Resources {
            cpu: self.cpu.min(other.cpu),
            mem: self.mem.min(other.mem),
            disk: self.disk.min(other.disk),
            gpu: self.gpu.min(other.gpu),
        }
    }

    pub fn has_gpu(&self) -> bool {
        self.gpu > EPSILON
    }

    pub fn is_empty(&self) -> bool {
        self.cpu <= EPSILON && self.mem <= EPSILON && self.disk <= EPSILON && self.gpu <= EPSILON
    }

    /// Kinds with a non-zero amount.
    pub fn non_empty_fields(&self) -> Vec<ResourceKind> {
        ResourceKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.get(*kind) > EPSILON)
            .collect()
    }

    pub fn approx_eq(&self, other: &Resources) -> bool {
        self.contains(other) && other.contains(self)
    }

    pub fn sum<'a>(items: impl IntoIterator<Item = &'a Resources>) -> Resources {
        items
            .into_iter()
            .fold(Resources::default(), |acc, r| acc.add(r))
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu:{} mem:{} disk:{} gpu:{}",
            self.cpu, self.mem, self.disk, self.gpu
        )
    }
}

/// Per-kind sharing policy of a resource pool.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub kind: ResourceKind,
    pub reservation: f64,
    pub limit: f64,
    pub share: f64,
}

impl ResourceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.reservation < 0.0 {
            return Err(Error::invalid_argument(format!(
                "resource {}: reservation must be non-negative",
                self.kind
            )));
        }
        if self.reservation > self.limit + EPSILON {
            return Err(Error::invalid_argument(format!(
                "resource {}: reservation {} exceeds limit {}",
                self.kind, self.reservation, self.limit
            )));
        }
        if self.share < 0.0 {
            return Err(Error::invalid_argument(format!(
                "resource {}: share must be non-negative",
                self.kind
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res(cpu: f64, mem: f64, disk: f64, gpu: f64) -> Resources {
        Resources::new(cpu, mem, disk, gpu)
    }

    #[test]
    fn test_contains() {
        let empty = Resources::default();
        assert!(empty.contains(&empty));

        let r1 = res(1.0, 0.0, 0.0, 0.0);
        assert!(r1.contains(&r1));
        assert!(!empty.contains(&r1));
        assert!(r1.contains(&empty));

        let r2 = res(0.0, 1.0, 0.0, 0.0);
        assert!(!r1.contains(&r2));
        assert!(!r2.contains(&r1));

        let r3 = res(1.0, 1.0, 1.0, 1.0);
        assert!(!r1.contains(&r3));
        assert!(r3.contains(&r1));
        assert!(r3.contains(&r2));
    }

    #[test]
    fn test_add() {
        let r1 = res(1.0, 0.0, 0.0, 0.0);
        let r2 = res(4.0, 3.0, 2.0, 1.0);
        let result = r1.add(&r2);
        assert!(result.approx_eq(&res(5.0, 3.0, 2.0, 1.0)));

        let result = Resources::default().add(&Resources::default());
        assert!(result.approx_eq(&Resources::default()));
    }

    #[test]
    fn test_try_subtract() {
        let empty = Resources::default();
        let r1 = res(1.0, 2.0, 3.0, 4.0);

        assert!(empty.try_subtract(&empty).is_some());
        assert!(empty.try_subtract(&r1).is_none());

        let result = r1.try_subtract(&r1).unwrap();
        assert!(result.approx_eq(&empty));

        let r3 = res(5.0, 6.0, 7.0, 8.0);
        let result = r3.try_subtract(&r1).unwrap();
        assert!(result.approx_eq(&res(4.0, 4.0, 4.0, 4.0)));
    }

    #[test]
    fn test_add_subtract_round_trip() {
        let a = res(1.5, 512.0, 10.0, 1.0);
        let b = res(0.5, 256.0, 5.0, 0.0);
        let round_trip = a.add(&b).try_subtract(&b).unwrap();
        assert!(round_trip.approx_eq(&a));
    }

    #[test]
    fn test_has_gpu() {
        assert!(!Resources::default().has_gpu());
        assert!(!res(1.0, 0.0, 0.0, 0.0).has_gpu());
        assert!(res(1.0, 0.0, 0.0, 1.0).has_gpu());
    }

    #[test]
    fn test_minimum() {
        let r1 = res(4.0, 100.0, 10.0, 2.0);
        let r2 = res(2.0, 200.0, 5.0, 3.0);
        assert!(r1.minimum(&r2).approx_eq(&res(2.0, 100.0, 5.0, 2.0)));
    }

    #[test]
    fn test_non_empty_fields() {
        assert!(Resources::default().non_empty_fields().is_empty());
        let fields = res(1.0, 0.0, 2.0, 0.0).non_empty_fields();
        assert_eq!(fields, vec![ResourceKind::Cpu, ResourceKind::Disk]);
    }

    #[test]
    fn test_resource_config_validation() {
        let ok = ResourceConfig {
            kind: ResourceKind::Cpu,
            reservation: 10.0,
            limit: 100.0,
            share: 1.0,
        };
        assert!(ok.validate().is_ok());

        let bad = ResourceConfig {
            kind: ResourceKind::Cpu,
            reservation: 200.0,
            limit: 100.0,
            share: 1.0,
        };
        assert!(bad.validate().is_err());

        let bad_share = ResourceConfig {
            kind: ResourceKind::Cpu,
            reservation: 10.0,
            limit: 100.0,
            share: -1.0,
        };
        assert!(bad_share.validate().is_err());
    }
}
