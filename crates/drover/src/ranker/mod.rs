use crate::hostcache::HostSummary;
use crate::resources::Resources;
use crate::{Error, Map, Result};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

/// Remote advisor handing out a load score per host, 0 (idle) to 100
/// (saturated). Hosts missing from the response are treated as saturated.
pub trait LoadAdvisor: Send + Sync {
    fn host_scores(&self, hostnames: &[String]) -> Result<Map<String, u32>>;
}

/// Which ordering strategy the placement engine runs with.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankerPolicy {
    LoadAware,
    BinPacking,
    #[default]
    LeastAllocated,
    RandomOrder,
}

/// Orders host candidates for placement.
///
/// `get_ranked_host_list` serves the most recent snapshot and only computes
/// one if none exists yet; callers tolerate the snapshot being stale by one
/// refresh interval.
pub trait Ranker: Send + Sync {
    fn name(&self) -> &'static str;
    fn refresh_ranking(&self, index: &[Arc<HostSummary>]);
    fn get_ranked_host_list(&self, index: &[Arc<HostSummary>]) -> Vec<Arc<HostSummary>>;
}

pub fn new_ranker(
    policy: RankerPolicy,
    advisor: Option<Arc<dyn LoadAdvisor>>,
) -> Result<Box<dyn Ranker>> {
    match policy {
        RankerPolicy::LoadAware => {
            let advisor = advisor.ok_or_else(|| {
                Error::invalid_argument("load_aware ranking requires a load advisor")
            })?;
            Ok(Box::new(LoadAwareRanker::new(advisor)))
        }
        RankerPolicy::BinPacking => Ok(Box::new(BinPackingRanker::new())),
        RankerPolicy::LeastAllocated => Ok(Box::new(LeastAllocatedRanker::new())),
        RankerPolicy::RandomOrder => Ok(Box::new(RandomRanker::new())),
    }
}

/// Most recent ranking, shared by all strategies.
#[derive(Default)]
struct RankingSnapshot {
    hosts: Mutex<Option<Vec<Arc<HostSummary>>>>,
}

impl RankingSnapshot {
    fn serve(
        &self,
        index: &[Arc<HostSummary>],
        rank: impl FnOnce(&[Arc<HostSummary>]) -> Vec<Arc<HostSummary>>,
    ) -> Vec<Arc<HostSummary>> {
        if let Some(hosts) = self.hosts.lock().unwrap().as_ref() {
            return hosts.clone();
        }
        // Ranking may consult a remote advisor, so it runs outside the
        // lock; a racing first call just computes the snapshot twice.
        let ranked = rank(index);
        *self.hosts.lock().unwrap() = Some(ranked.clone());
        ranked
    }

    fn replace(&self, ranked: Vec<Arc<HostSummary>>) {
        *self.hosts.lock().unwrap() = Some(ranked);
    }
}

// Orders free capacity vectors; ties are broken by the caller on hostname.
fn compare_free(left: &Resources, right: &Resources) -> Ordering {
    left.cpu
        .total_cmp(&right.cpu)
        .then(left.mem.total_cmp(&right.mem))
        .then(left.disk.total_cmp(&right.disk))
        .then(left.gpu.total_cmp(&right.gpu))
}

/// Sorts hosts by the advisor's load score, least loaded first. Hosts the
/// advisor does not know about go to the tail.
pub struct LoadAwareRanker {
    advisor: Arc<dyn LoadAdvisor>,
    snapshot: RankingSnapshot,
}

impl LoadAwareRanker {
    pub fn new(advisor: Arc<dyn LoadAdvisor>) -> Self {
        Self {
            advisor,
            snapshot: RankingSnapshot::default(),
        }
    }

    fn rank(&self, index: &[Arc<HostSummary>]) -> Vec<Arc<HostSummary>> {
        let hostnames: Vec<String> = index.iter().map(|h| h.hostname().to_string()).collect();
        let scores = match self.advisor.host_scores(&hostnames) {
            Ok(scores) => scores,
            Err(e) => {
                log::error!("load advisor query failed: {e}");
                Map::default()
            }
        };
        let mut hosts: Vec<_> = index.to_vec();
        hosts.sort_by(|a, b| {
            let score_a = scores.get(a.hostname()).copied().unwrap_or(u32::MAX);
            let score_b = scores.get(b.hostname()).copied().unwrap_or(u32::MAX);
            score_a
                .cmp(&score_b)
                .then_with(|| a.hostname().cmp(b.hostname()))
        });
        hosts
    }
}

impl Ranker for LoadAwareRanker {
    fn name(&self) -> &'static str {
        "load_aware"
    }

    fn refresh_ranking(&self, index: &[Arc<HostSummary>]) {
        self.snapshot.replace(self.rank(index));
    }

    fn get_ranked_host_list(&self, index: &[Arc<HostSummary>]) -> Vec<Arc<HostSummary>> {
        self.snapshot.serve(index, |hosts| self.rank(hosts))
    }
}

/// First-fit-decreasing: hosts with the least free capacity first, packing
/// work onto already busy hosts.
pub struct BinPackingRanker {
    snapshot: RankingSnapshot,
}

impl BinPackingRanker {
    pub fn new() -> Self {
        Self {
            snapshot: RankingSnapshot::default(),
        }
    }
}

impl Default for BinPackingRanker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ranker for BinPackingRanker {
    fn name(&self) -> &'static str {
        "bin_packing"
    }

    fn refresh_ranking(&self, index: &[Arc<HostSummary>]) {
        self.snapshot.replace(rank_by_free(index, false));
    }

    fn get_ranked_host_list(&self, index: &[Arc<HostSummary>]) -> Vec<Arc<HostSummary>> {
        self.snapshot.serve(index, |hosts| rank_by_free(hosts, false))
    }
}

/// Spreads load: hosts with the most free capacity first.
pub struct LeastAllocatedRanker {
    snapshot: RankingSnapshot,
}

impl LeastAllocatedRanker {
    pub fn new() -> Self {
        Self {
            snapshot: RankingSnapshot::default(),
        }
    }
}

impl Default for LeastAllocatedRanker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ranker for LeastAllocatedRanker {
    fn name(&self) -> &'static str {
        "least_allocated"
    }

    fn refresh_ranking(&self, index: &[Arc<HostSummary>]) {
        self.snapshot.replace(rank_by_free(index, true));
    }

    fn get_ranked_host_list(&self, index: &[Arc<HostSummary>]) -> Vec<Arc<HostSummary>> {
        self.snapshot.serve(index, |hosts| rank_by_free(hosts, true))
    }
}

fn rank_by_free(index: &[Arc<HostSummary>], most_free_first: bool) -> Vec<Arc<HostSummary>> {
    let mut hosts: Vec<_> = index.to_vec();
    hosts.sort_by(|a, b| {
        let ordering = compare_free(&a.available(), &b.available())
            .then_with(|| a.hostname().cmp(b.hostname()));
        if most_free_first {
            ordering.reverse()
        } else {
            ordering
        }
    });
    hosts
}

/// Shuffles hosts on every refresh; breaks up herd effects between
/// placement engines running the same strategy.
pub struct RandomRanker {
    snapshot: RankingSnapshot,
}

impl RandomRanker {
    pub fn new() -> Self {
        Self {
            snapshot: RankingSnapshot::default(),
        }
    }

    fn rank(index: &[Arc<HostSummary>]) -> Vec<Arc<HostSummary>> {
        let mut hosts: Vec<_> = index.to_vec();
        hosts.shuffle(&mut rand::thread_rng());
        hosts
    }
}

impl Default for RandomRanker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ranker for RandomRanker {
    fn name(&self) -> &'static str {
        "random"
    }

    fn refresh_ranking(&self, index: &[Arc<HostSummary>]) {
        self.snapshot.replace(Self::rank(index));
    }

    fn get_ranked_host_list(&self, index: &[Arc<HostSummary>]) -> Vec<Arc<HostSummary>> {
        self.snapshot.serve(index, Self::rank)
    }
}
