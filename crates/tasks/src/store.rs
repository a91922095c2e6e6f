//! Record store and server registry collaborators.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use aigc_core::error::CoreError;
use aigc_core::types::DbId;
use aigc_remote::ServerFunctions;
use async_trait::async_trait;

use crate::record::{TaskPatch, TaskRecord};

/// Persistent storage of task records of one type.
#[async_trait]
pub trait RecordStore<P>: Send + Sync {
    async fn get(&self, id: DbId) -> Result<Option<TaskRecord<P>>, CoreError>;

    /// Apply `patch` to record `id`. Fails with
    /// [`CoreError::NotFound`] for an unknown id.
    async fn update(&self, id: DbId, patch: TaskPatch) -> Result<(), CoreError>;

    /// Records not yet in a terminal status, in id order.
    async fn list_unfinished(&self) -> Result<Vec<TaskRecord<P>>, CoreError>;
}

/// In-process [`RecordStore`].
pub struct MemoryRecordStore<P> {
    records: RwLock<BTreeMap<DbId, TaskRecord<P>>>,
}

impl<P> Default for MemoryRecordStore<P> {
    fn default() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<P: Clone> MemoryRecordStore<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: TaskRecord<P>) {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(record.id, record);
    }

    /// Snapshot of record `id`.
    pub fn snapshot(&self, id: DbId) -> Option<TaskRecord<P>> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned()
    }
}

#[async_trait]
impl<P> RecordStore<P> for MemoryRecordStore<P>
where
    P: Clone + Send + Sync + 'static,
{
    async fn get(&self, id: DbId) -> Result<Option<TaskRecord<P>>, CoreError> {
        Ok(self.snapshot(id))
    }

    async fn update(&self, id: DbId, patch: TaskPatch) -> Result<(), CoreError> {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let record = records
            .get_mut(&id)
            .ok_or(CoreError::NotFound { entity: "task", id })?;
        patch.apply(record);
        Ok(())
    }

    async fn list_unfinished(&self) -> Result<Vec<TaskRecord<P>>, CoreError> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect())
    }
}

/// Resolves the server a record refers to.
pub trait ServerRegistry: Send + Sync {
    fn resolve(&self, name: &str, version: &str) -> Option<Arc<dyn ServerFunctions>>;
}

/// [`ServerRegistry`] over a fixed set of servers keyed by name and version.
#[derive(Default)]
pub struct StaticServerRegistry {
    servers: HashMap<(String, String), Arc<dyn ServerFunctions>>,
}

impl StaticServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        version: impl Into<String>,
        server: Arc<dyn ServerFunctions>,
    ) -> &mut Self {
        self.servers.insert((name.into(), version.into()), server);
        self
    }
}

impl ServerRegistry for StaticServerRegistry {
    fn resolve(&self, name: &str, version: &str) -> Option<Arc<dyn ServerFunctions>> {
        self.servers
            .get(&(name.to_string(), version.to_string()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TaskStatus;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn update_unknown_record_is_not_found() {
        let store = MemoryRecordStore::<()>::new();
        let err = store
            .update(7, TaskPatch::status(TaskStatus::Running))
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::NotFound { entity: "task", id: 7 });
    }

    #[tokio::test]
    async fn unfinished_excludes_terminal_records() {
        let store = MemoryRecordStore::new();
        for (id, status) in [
            (1, TaskStatus::Wait),
            (2, TaskStatus::Success),
            (3, TaskStatus::Querying),
            (4, TaskStatus::Fail),
        ] {
            let mut record = TaskRecord::new(id, "s", "1", ());
            record.status = status;
            store.insert(record);
        }

        let ids: Vec<_> = store
            .list_unfinished()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn registry_misses_unknown_version() {
        let registry = StaticServerRegistry::new();
        assert!(registry.resolve("cosyvoice", "1.0.0").is_none());
    }
}
