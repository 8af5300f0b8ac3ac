use crate::storage::{ObjectStore, StoreKey, Table};
use crate::{Error, Map, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Object store backed by process memory; the storage seam used by tests
/// and single-node deployments.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Map<Table, BTreeMap<String, Value>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self, table: Table) -> usize {
        self.tables
            .read()
            .unwrap()
            .get(&table)
            .map_or(0, |rows| rows.len())
    }
}

impl ObjectStore for InMemoryStore {
    fn create(&self, key: StoreKey, value: Value, if_not_exist: bool) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        let rows = tables.entry(key.table).or_default();
        if if_not_exist && rows.contains_key(&key.key) {
            return Err(Error::Core(drover::Error::already_exists(format!(
                "row {} already exists in {:?}",
                key.key, key.table
            ))));
        }
        rows.insert(key.key, value);
        Ok(())
    }

    fn update(&self, key: &StoreKey, patch: Value) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        let row = tables
            .get_mut(&key.table)
            .and_then(|rows| rows.get_mut(&key.key))
            .ok_or_else(|| {
                Error::Core(drover::Error::not_found(format!(
                    "row {} not found in {:?}",
                    key.key, key.table
                )))
            })?;
        match (row, patch) {
            (Value::Object(row), Value::Object(patch)) => {
                for (field, value) in patch {
                    row.insert(field, value);
                }
                Ok(())
            }
            (row, patch) => {
                *row = patch;
                Ok(())
            }
        }
    }

    fn get(&self, key: &StoreKey) -> Result<Value> {
        self.tables
            .read()
            .unwrap()
            .get(&key.table)
            .and_then(|rows| rows.get(&key.key))
            .cloned()
            .ok_or_else(|| {
                Error::Core(drover::Error::not_found(format!(
                    "row {} not found in {:?}",
                    key.key, key.table
                )))
            })
    }

    fn delete(&self, key: &StoreKey) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        let removed = tables
            .get_mut(&key.table)
            .and_then(|rows| rows.remove(&key.key));
        match removed {
            Some(_) => Ok(()),
            None => Err(Error::Core(drover::Error::not_found(format!(
                "row {} not found in {:?}",
                key.key, key.table
            )))),
        }
    }

    fn append(&self, key: &StoreKey, entry: Value) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        let rows = tables.entry(key.table).or_default();
        let row = rows.entry(key.key.clone()).or_insert(Value::Array(vec![]));
        match row {
            Value::Array(entries) => {
                entries.push(entry);
                Ok(())
            }
            _ => Err(Error::Core(drover::Error::internal(format!(
                "row {} in {:?} is not an append-only log",
                key.key, key.table
            )))),
        }
    }

    fn query(
        &self,
        table: Table,
        predicate: &dyn Fn(&str, &Value) -> bool,
    ) -> Result<Vec<(String, Value)>> {
        let tables = self.tables.read().unwrap();
        Ok(tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|(key, value)| predicate(key, value))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_get_delete() {
        let store = InMemoryStore::new();
        let key = StoreKey::respool("pool-1");
        store
            .create(key.clone(), json!({"name": "batch"}), true)
            .unwrap();
        assert!(matches!(
            store.create(key.clone(), json!({}), true),
            Err(Error::Core(drover::Error::AlreadyExists(_)))
        ));
        assert_eq!(store.get(&key).unwrap()["name"], "batch");
        store.delete(&key).unwrap();
        assert!(matches!(
            store.get(&key),
            Err(Error::Core(drover::Error::NotFound(_)))
        ));
    }

    #[test]
    fn test_update_merges_fields() {
        let store = InMemoryStore::new();
        let key = StoreKey::new(Table::JobRuntimes, "1");
        store
            .create(key.clone(), json!({"state": "Pending", "version": 1}), false)
            .unwrap();
        store.update(&key, json!({"state": "Running"})).unwrap();
        let row = store.get(&key).unwrap();
        assert_eq!(row["state"], "Running");
        assert_eq!(row["version"], 1);
    }

    #[test]
    fn test_append_log() {
        let store = InMemoryStore::new();
        let key = StoreKey::new(Table::TaskStateChanges, "1-0");
        store.append(&key, json!({"state": "Pending"})).unwrap();
        store.append(&key, json!({"state": "Running"})).unwrap();
        let log = store.get(&key).unwrap();
        assert_eq!(log.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_query_contains() {
        let store = InMemoryStore::new();
        store
            .create(
                StoreKey::new(Table::JobConfigs, "1"),
                json!({"owner": "ads", "keywords": ["nightly", "batch"]}),
                false,
            )
            .unwrap();
        store
            .create(
                StoreKey::new(Table::JobConfigs, "2"),
                json!({"owner": "maps", "keywords": ["batch"]}),
                false,
            )
            .unwrap();
        let rows = store
            .query_contains(Table::JobConfigs, &["ads".to_string(), "batch".to_string()])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "1");
    }

    #[test]
    fn test_batch_bound_and_partial_failure() {
        let store = InMemoryStore::new();
        let too_many: Vec<_> = (0..1001)
            .map(|i| (StoreKey::new(Table::TaskRuntimes, i.to_string()), json!({})))
            .collect();
        assert!(matches!(
            store.create_batch(too_many, false),
            Err(Error::Core(drover::Error::InvalidArgument(_)))
        ));

        store
            .create(StoreKey::new(Table::TaskRuntimes, "0"), json!({}), true)
            .unwrap();
        let rows: Vec<_> = (0..3)
            .map(|i| (StoreKey::new(Table::TaskRuntimes, i.to_string()), json!({})))
            .collect();
        // Row "0" collides; the other two must still land.
        let err = store.create_batch(rows, true).unwrap_err();
        assert!(err.to_string().contains("1 of 3"));
        assert_eq!(store.row_count(Table::TaskRuntimes), 3);
    }
}
