pub mod memory;

pub use memory::InMemoryStore;

use crate::{Error, Result};
use drover::{JobId, TaskId};
use serde_json::Value;

/// Upper bound on rows in one batch write.
pub const MAX_BATCH_ROWS: usize = 1000;

/// Tables of the persisted state layout.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum Table {
    ResourcePools,
    JobRuntimes,
    JobConfigs,
    TaskRuntimes,
    TaskConfigs,
    /// Append-only per-task state change log.
    TaskStateChanges,
    Updates,
    Volumes,
    FrameworkInfo,
}

impl Table {
    pub const ALL: [Table; 9] = [
        Table::ResourcePools,
        Table::JobRuntimes,
        Table::JobConfigs,
        Table::TaskRuntimes,
        Table::TaskConfigs,
        Table::TaskStateChanges,
        Table::Updates,
        Table::Volumes,
        Table::FrameworkInfo,
    ];
}

/// Row address: a table plus the row key within it.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct StoreKey {
    pub table: Table,
    pub key: String,
}

impl StoreKey {
    pub fn new(table: Table, key: impl Into<String>) -> Self {
        Self {
            table,
            key: key.into(),
        }
    }

    pub fn respool(id: &str) -> Self {
        Self::new(Table::ResourcePools, id)
    }

    pub fn job_runtime(job_id: JobId) -> Self {
        Self::new(Table::JobRuntimes, job_id.to_string())
    }

    pub fn job_config(job_id: JobId) -> Self {
        Self::new(Table::JobConfigs, job_id.to_string())
    }

    pub fn task_runtime(task_id: TaskId) -> Self {
        Self::new(Table::TaskRuntimes, task_id.to_string())
    }

    pub fn task_state_changes(task_id: TaskId) -> Self {
        Self::new(Table::TaskStateChanges, task_id.to_string())
    }

    pub fn update(id: &str) -> Self {
        Self::new(Table::Updates, id)
    }
}

/// Key-value/columnar storage the orchestrator persists through.
///
/// The concrete backend is a collaborator; everything the services need is
/// expressed in terms of rows of JSON values.
pub trait ObjectStore: Send + Sync {
    /// Writes a row. With `if_not_exist` a colliding key fails with
    /// `AlreadyExists`; without it the write is an upsert.
    fn create(&self, key: StoreKey, value: Value, if_not_exist: bool) -> Result<()>;

    /// Merges the fields of `patch` into an existing row.
    fn update(&self, key: &StoreKey, patch: Value) -> Result<()>;

    fn get(&self, key: &StoreKey) -> Result<Value>;

    fn delete(&self, key: &StoreKey) -> Result<()>;

    /// Appends an entry to an append-only row (state change logs).
    fn append(&self, key: &StoreKey, entry: Value) -> Result<()>;

    /// Rows of a table matching the predicate.
    fn query(
        &self,
        table: Table,
        predicate: &dyn Fn(&str, &Value) -> bool,
    ) -> Result<Vec<(String, Value)>>;

    /// Must-contain search: rows whose serialized form contains every
    /// keyword. Backs owner/label/keyword discovery.
    fn query_contains(&self, table: Table, keywords: &[String]) -> Result<Vec<(String, Value)>> {
        self.query(table, &|_, value| {
            let haystack = value.to_string();
            keywords.iter().all(|keyword| haystack.contains(keyword))
        })
    }

    /// Writes up to [`MAX_BATCH_ROWS`] rows. Failed rows do not abort the
    /// rest; the error reports how many failed so callers can retry the
    /// failed subset.
    fn create_batch(&self, rows: Vec<(StoreKey, Value)>, if_not_exist: bool) -> Result<()> {
        if rows.len() > MAX_BATCH_ROWS {
            return Err(Error::Core(drover::Error::invalid_argument(format!(
                "batch of {} rows exceeds the {MAX_BATCH_ROWS} row bound",
                rows.len()
            ))));
        }
        let total = rows.len();
        let mut failed = 0;
        let mut first_error = None;
        for (key, value) in rows {
            if let Err(e) = self.create(key, value, if_not_exist) {
                failed += 1;
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            None => Ok(()),
            Some(e) => Err(Error::Core(drover::Error::internal(format!(
                "{failed} of {total} batch rows failed, first error: {e}"
            )))),
        }
    }
}
