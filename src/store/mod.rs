//! Persistent storage of snapshots and recommendations.
//!
//! The engine only talks to the [`EvidenceStore`] trait. Two backends are
//! provided, selected by the scheme of the configured storage URI:
//! `memory:` for an ephemeral in-process store and `local:` for a directory
//! of JSON files.

pub mod disk;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::{fmt, io};
use async_trait::async_trait;
use url::Url;
use crate::api::project::{Organization, ProjectId, ProjectIdentity};
use crate::api::recommendation::Recommendation;
use crate::api::report::UpdateBatch;
use crate::api::snapshot::BindingSnapshot;
use crate::api::time::{Day, Timestamp};
use crate::constants::RETENTION_DAYS;

pub use self::disk::DiskStore;
pub use self::memory::MemoryStore;

//------------ StoreError ----------------------------------------------------

#[derive(Debug)]
pub enum StoreError {
    /// An I/O problem, with some context on what was attempted.
    Io(String, io::Error),

    Json(serde_json::Error),

    UnknownScheme(String),

    Other(String),
}

impl StoreError {
    pub fn io(context: impl fmt::Display, e: io::Error) -> Self {
        StoreError::Io(context.to_string(), e)
    }

    pub fn other(msg: impl fmt::Display) -> Self {
        StoreError::Other(msg.to_string())
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreError::Io(context, e) => write!(f, "{}: {}", context, e),
            StoreError::Json(e) => e.fmt(f),
            StoreError::UnknownScheme(scheme) => {
                write!(f, "unsupported storage scheme: {}", scheme)
            }
            StoreError::Other(msg) => msg.fmt(f),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Json(e)
    }
}

//------------ EvidenceStore -------------------------------------------------

/// The read and write contract the engine and the dashboard queries rely
/// on. All writes are idempotent under the compound keys
/// `(project_id, day)` for snapshots and `(project_id, accepted_timestamp)`
/// for recommendations.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// The identities of all projects with stored snapshots.
    async fn projects(&self) -> Result<Vec<ProjectIdentity>, StoreError>;

    /// All organizations referenced by stored snapshots.
    async fn organizations(&self) -> Result<Vec<Organization>, StoreError>;

    /// The organization recorded for a project, from its most recent
    /// snapshot.
    async fn organization_for(
        &self,
        project: &ProjectId,
    ) -> Result<Option<Organization>, StoreError>;

    /// The mean binding count over the project's snapshots within the
    /// retention year, measured back from the most recent stored timestamp.
    /// Zero when the project has no data.
    async fn average_bindings_past_year(&self, project: &ProjectId) -> Result<f64, StoreError>;

    /// Day to binding count, ascending by day.
    async fn bindings_by_day(&self, project: &ProjectId) -> Result<BTreeMap<Day, u64>, StoreError>;

    /// Day to recommendation, ascending by day. Multiple acceptances on one
    /// day collapse to the latest.
    async fn recommendations_by_day(
        &self,
        project: &ProjectId,
    ) -> Result<BTreeMap<Day, Recommendation>, StoreError>;

    /// The maximum timestamp in the snapshot table, or `None` when the
    /// store is empty.
    async fn most_recent_timestamp(&self) -> Result<Option<Timestamp>, StoreError>;

    /// Persists everything one run produced. All or nothing: when this
    /// returns an error none of the batch is observable.
    async fn upsert_batch(&self, batch: UpdateBatch) -> Result<(), StoreError>;

    /// Removes snapshots strictly older than the cutoff. Returns how many.
    async fn delete_bindings_older_than(&self, cutoff: Timestamp) -> Result<u64, StoreError>;

    /// Removes recommendations strictly older than the cutoff. Returns how
    /// many.
    async fn delete_recommendations_older_than(&self, cutoff: Timestamp)
    -> Result<u64, StoreError>;
}

//------------ open ----------------------------------------------------------

/// Creates the store for the given storage URI.
pub fn open(storage_uri: &Url) -> Result<Arc<dyn EvidenceStore>, StoreError> {
    match storage_uri.scheme() {
        "local" => {
            let path = format!(
                "{}{}",
                storage_uri.host_str().unwrap_or_default(),
                storage_uri.path()
            );
            Ok(Arc::new(DiskStore::create(path.as_ref())?))
        }
        "memory" => {
            let namespace = format!(
                "{}{}",
                storage_uri.host_str().unwrap_or_default(),
                storage_uri.path()
            );
            Ok(Arc::new(MemoryStore::new(&namespace)))
        }
        scheme => Err(StoreError::UnknownScheme(scheme.to_string())),
    }
}

//------------ Records -------------------------------------------------------

/// The two tables, keyed the way the upsert contract dedups. Both backends
/// answer queries through this; the disk backend loads it from files first.
#[derive(Clone, Debug, Default)]
pub(crate) struct Records {
    pub snapshots: BTreeMap<(ProjectId, Timestamp), BindingSnapshot>,
    pub recommendations: BTreeMap<(ProjectId, Timestamp), Recommendation>,
}

impl Records {
    pub fn upsert(&mut self, batch: UpdateBatch) {
        for snapshot in batch.snapshots {
            self.snapshots
                .insert((snapshot.project_id.clone(), snapshot.timestamp), snapshot);
        }
        for recommendation in batch.recommendations {
            self.recommendations
                .insert(recommendation.key(), recommendation);
        }
    }

    /// One identity per project, taking names from the most recent
    /// snapshot.
    pub fn projects(&self) -> Vec<ProjectIdentity> {
        let mut latest: BTreeMap<ProjectId, ProjectIdentity> = BTreeMap::new();
        for snapshot in self.snapshots.values() {
            // Ascending key order, so later entries are more recent.
            latest.insert(snapshot.project_id.clone(), snapshot.identity());
        }
        latest.into_values().collect()
    }

    pub fn organizations(&self) -> Vec<Organization> {
        let mut orgs: BTreeMap<String, Organization> = BTreeMap::new();
        for snapshot in self.snapshots.values() {
            if let Some(org) = snapshot.organization() {
                orgs.insert(snapshot.organization_id.clone(), org);
            }
        }
        orgs.into_values().collect()
    }

    pub fn organization_for(&self, project: &ProjectId) -> Option<Organization> {
        self.project_snapshots(project)
            .last()
            .and_then(|snapshot| snapshot.organization())
    }

    pub fn average_bindings_past_year(&self, project: &ProjectId) -> f64 {
        let Some(most_recent) = self.most_recent_timestamp() else {
            return 0.0;
        };
        let cutoff = most_recent.minus_days(RETENTION_DAYS);
        let counts: Vec<u64> = self
            .project_snapshots(project)
            .filter(|snapshot| snapshot.timestamp >= cutoff)
            .map(|snapshot| snapshot.binding_count)
            .collect();
        if counts.is_empty() {
            0.0
        } else {
            counts.iter().sum::<u64>() as f64 / counts.len() as f64
        }
    }

    pub fn bindings_by_day(&self, project: &ProjectId) -> BTreeMap<Day, u64> {
        self.project_snapshots(project)
            .map(|snapshot| (snapshot.day(), snapshot.binding_count))
            .collect()
    }

    pub fn recommendations_by_day(&self, project: &ProjectId) -> BTreeMap<Day, Recommendation> {
        let mut map = BTreeMap::new();
        for ((id, _), recommendation) in &self.recommendations {
            if id == project {
                // Ascending order; the latest acceptance of a day wins.
                map.insert(recommendation.day(), recommendation.clone());
            }
        }
        map
    }

    pub fn most_recent_timestamp(&self) -> Option<Timestamp> {
        self.snapshots.keys().map(|(_, ts)| *ts).max()
    }

    pub fn delete_bindings_older_than(&mut self, cutoff: Timestamp) -> u64 {
        let before = self.snapshots.len();
        self.snapshots.retain(|(_, ts), _| *ts >= cutoff);
        (before - self.snapshots.len()) as u64
    }

    pub fn delete_recommendations_older_than(&mut self, cutoff: Timestamp) -> u64 {
        let before = self.recommendations.len();
        self.recommendations.retain(|(_, ts), _| *ts >= cutoff);
        (before - self.recommendations.len()) as u64
    }

    fn project_snapshots<'a>(
        &'a self,
        project: &'a ProjectId,
    ) -> impl Iterator<Item = &'a BindingSnapshot> {
        self.snapshots.iter().filter_map(move |((id, _), snapshot)| {
            if id == project { Some(snapshot) } else { None }
        })
    }
}

//============ Tests =========================================================
