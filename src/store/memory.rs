//! The in-memory store backend.
//!
//! Data lives in a process-global registry keyed by namespace, so opening
//! the same `memory:` URI twice yields the same store. Nothing survives the
//! process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use async_trait::async_trait;
use lazy_static::lazy_static;
use std::collections::BTreeMap;
use crate::api::project::{Organization, ProjectId, ProjectIdentity};
use crate::api::recommendation::Recommendation;
use crate::api::report::UpdateBatch;
use crate::api::time::{Day, Timestamp};
use crate::store::{EvidenceStore, Records, StoreError};

lazy_static! {
    static ref STORES: Mutex<HashMap<String, Arc<Mutex<Records>>>> = Mutex::new(HashMap::new());
}

//------------ MemoryStore ---------------------------------------------------

#[derive(Clone, Debug)]
pub struct MemoryStore {
    inner: Arc<Mutex<Records>>,
}

impl MemoryStore {
    pub fn new(namespace: &str) -> Self {
        let mut stores = STORES.lock().unwrap_or_else(PoisonError::into_inner);
        let inner = stores.entry(namespace.to_string()).or_default().clone();
        MemoryStore { inner }
    }

    /// A poisoned lock only means some test thread panicked mid-operation;
    /// carry on with the data as it is.
    fn lock(&self) -> MutexGuard<'_, Records> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EvidenceStore for MemoryStore {
    async fn projects(&self) -> Result<Vec<ProjectIdentity>, StoreError> {
        Ok(self.lock().projects())
    }

    async fn organizations(&self) -> Result<Vec<Organization>, StoreError> {
        Ok(self.lock().organizations())
    }

    async fn organization_for(
        &self,
        project: &ProjectId,
    ) -> Result<Option<Organization>, StoreError> {
        Ok(self.lock().organization_for(project))
    }

    async fn average_bindings_past_year(&self, project: &ProjectId) -> Result<f64, StoreError> {
        Ok(self.lock().average_bindings_past_year(project))
    }

    async fn bindings_by_day(&self, project: &ProjectId) -> Result<BTreeMap<Day, u64>, StoreError> {
        Ok(self.lock().bindings_by_day(project))
    }

    async fn recommendations_by_day(
        &self,
        project: &ProjectId,
    ) -> Result<BTreeMap<Day, Recommendation>, StoreError> {
        Ok(self.lock().recommendations_by_day(project))
    }

    async fn most_recent_timestamp(&self) -> Result<Option<Timestamp>, StoreError> {
        Ok(self.lock().most_recent_timestamp())
    }

    /// Applied under a single lock, so the batch is visible all at once.
    async fn upsert_batch(&self, batch: UpdateBatch) -> Result<(), StoreError> {
        self.lock().upsert(batch);
        Ok(())
    }

    async fn delete_bindings_older_than(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        Ok(self.lock().delete_bindings_older_than(cutoff))
    }

    async fn delete_recommendations_older_than(
        &self,
        cutoff: Timestamp,
    ) -> Result<u64, StoreError> {
        Ok(self.lock().delete_recommendations_older_than(cutoff))
    }
}

//============ Tests =========================================================
