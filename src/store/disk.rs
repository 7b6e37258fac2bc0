//! The disk store backend.
//!
//! One JSON file per record:
//!
//! ```text
//!   <root>/snapshots/<project>/<millis>.json
//!   <root>/recommendations/<project>/<millis>.json
//! ```
//!
//! New values are written to `<root>/tmp` first and then renamed into
//! place, so a crash or full disk never leaves a partially written record
//! behind. Queries load the affected table in full; the store is sized for
//! dashboard-scale data, not bulk analytics.

use std::fs;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tempfile::NamedTempFile;
use crate::api::project::{Organization, ProjectId, ProjectIdentity};
use crate::api::recommendation::Recommendation;
use crate::api::report::UpdateBatch;
use crate::api::snapshot::BindingSnapshot;
use crate::api::time::{Day, Timestamp};
use crate::store::{EvidenceStore, Records, StoreError};

const SNAPSHOTS_DIR: &str = "snapshots";
const RECOMMENDATIONS_DIR: &str = "recommendations";
const TMP_DIR: &str = "tmp";

//------------ DiskStore -----------------------------------------------------

#[derive(Clone, Debug)]
pub struct DiskStore {
    root: PathBuf,
    tmp: PathBuf,
}

impl DiskStore {
    /// Creates the store under the given directory, making sure the tmp
    /// directory for staged writes exists.
    pub fn create(path: &Path) -> Result<Self, StoreError> {
        let root = path.to_path_buf();
        let tmp = root.join(TMP_DIR);
        if !tmp.exists() {
            fs::create_dir_all(&tmp).map_err(|e| {
                StoreError::io(
                    format!("cannot create directory for tmp files: {}", tmp.display()),
                    e,
                )
            })?;
        }
        Ok(DiskStore { root, tmp })
    }

    fn load(&self) -> Result<Records, StoreError> {
        let mut records = Records::default();
        for file in table_files(&self.root.join(SNAPSHOTS_DIR))? {
            let snapshot: BindingSnapshot = read_json(&file)?;
            records
                .snapshots
                .insert((snapshot.project_id.clone(), snapshot.timestamp), snapshot);
        }
        for file in table_files(&self.root.join(RECOMMENDATIONS_DIR))? {
            let recommendation: Recommendation = read_json(&file)?;
            records
                .recommendations
                .insert(recommendation.key(), recommendation);
        }
        Ok(records)
    }

    fn record_path(&self, table: &str, project: &ProjectId, ts: Timestamp) -> PathBuf {
        self.root
            .join(table)
            .join(project.as_str())
            .join(format!("{}.json", ts.millis()))
    }

    /// Serializes a record into the tmp directory and returns it together
    /// with its final path.
    fn stage<V: Serialize>(
        &self,
        table: &str,
        project: &ProjectId,
        ts: Timestamp,
        value: &V,
    ) -> Result<(NamedTempFile, PathBuf), StoreError> {
        let target = self.record_path(table, project, ts);
        let tmp = NamedTempFile::new_in(&self.tmp).map_err(|e| {
            StoreError::io(
                format!("cannot create tmp file in {}", self.tmp.display()),
                e,
            )
        })?;
        serde_json::to_writer_pretty(tmp.as_file(), value)?;
        Ok((tmp, target))
    }

    fn delete_older_than(&self, table: &str, cutoff: Timestamp) -> Result<u64, StoreError> {
        let mut deleted = 0;
        for project_dir in subdirs(&self.root.join(table))? {
            for file in files_in(&project_dir)? {
                if let Some(ts) = timestamp_from_path(&file) {
                    if ts < cutoff {
                        fs::remove_file(&file).map_err(|e| {
                            StoreError::io(format!("cannot remove {}", file.display()), e)
                        })?;
                        deleted += 1;
                    }
                }
            }
            // Only removes the directory if the project has nothing left.
            let _ = fs::remove_dir(&project_dir);
        }
        Ok(deleted)
    }
}

#[async_trait]
impl EvidenceStore for DiskStore {
    async fn projects(&self) -> Result<Vec<ProjectIdentity>, StoreError> {
        Ok(self.load()?.projects())
    }

    async fn organizations(&self) -> Result<Vec<Organization>, StoreError> {
        Ok(self.load()?.organizations())
    }

    async fn organization_for(
        &self,
        project: &ProjectId,
    ) -> Result<Option<Organization>, StoreError> {
        Ok(self.load()?.organization_for(project))
    }

    async fn average_bindings_past_year(&self, project: &ProjectId) -> Result<f64, StoreError> {
        Ok(self.load()?.average_bindings_past_year(project))
    }

    async fn bindings_by_day(&self, project: &ProjectId) -> Result<BTreeMap<Day, u64>, StoreError> {
        Ok(self.load()?.bindings_by_day(project))
    }

    async fn recommendations_by_day(
        &self,
        project: &ProjectId,
    ) -> Result<BTreeMap<Day, Recommendation>, StoreError> {
        Ok(self.load()?.recommendations_by_day(project))
    }

    async fn most_recent_timestamp(&self) -> Result<Option<Timestamp>, StoreError> {
        let mut most_recent = None;
        for project_dir in subdirs(&self.root.join(SNAPSHOTS_DIR))? {
            for file in files_in(&project_dir)? {
                if let Some(ts) = timestamp_from_path(&file) {
                    most_recent = Some(most_recent.map_or(ts, |max: Timestamp| max.max(ts)));
                }
            }
        }
        Ok(most_recent)
    }

    async fn upsert_batch(&self, batch: UpdateBatch) -> Result<(), StoreError> {
        // Stage the entire batch before the first rename, so that
        // serialization or I/O trouble leaves the store untouched.
        let mut staged = Vec::with_capacity(batch.snapshots.len() + batch.recommendations.len());
        for snapshot in &batch.snapshots {
            staged.push(self.stage(
                SNAPSHOTS_DIR,
                &snapshot.project_id,
                snapshot.timestamp,
                snapshot,
            )?);
        }
        for recommendation in &batch.recommendations {
            staged.push(self.stage(
                RECOMMENDATIONS_DIR,
                &recommendation.project_id,
                recommendation.accepted_timestamp,
                recommendation,
            )?);
        }

        for (tmp, target) in staged {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    StoreError::io(format!("cannot create directory {}", parent.display()), e)
                })?;
            }
            tmp.persist(&target).map_err(|e| {
                StoreError::io(
                    format!("cannot move value into place: {}", target.display()),
                    e.error,
                )
            })?;
        }
        Ok(())
    }

    async fn delete_bindings_older_than(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        self.delete_older_than(SNAPSHOTS_DIR, cutoff)
    }

    async fn delete_recommendations_older_than(
        &self,
        cutoff: Timestamp,
    ) -> Result<u64, StoreError> {
        self.delete_older_than(RECOMMENDATIONS_DIR, cutoff)
    }
}

//------------ Directory walking ---------------------------------------------

fn subdirs(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    entries(dir, |path| path.is_dir())
}

/// All record files of a table, across its per-project directories.
fn table_files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut files = Vec::new();
    for project_dir in subdirs(dir)? {
        files.extend(files_in(&project_dir)?);
    }
    Ok(files)
}

fn files_in(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    entries(dir, |path| path.is_file())
}

/// A missing directory counts as empty.
fn entries(dir: &Path, keep: fn(&Path) -> bool) -> Result<Vec<PathBuf>, StoreError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let read = fs::read_dir(dir)
        .map_err(|e| StoreError::io(format!("cannot read directory {}", dir.display()), e))?;
    let mut found = Vec::new();
    for entry in read {
        let entry = entry
            .map_err(|e| StoreError::io(format!("cannot read directory {}", dir.display()), e))?;
        let path = entry.path();
        if keep(&path) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// The record timestamp encoded in a file name, if it is one of ours.
fn timestamp_from_path(path: &Path) -> Option<Timestamp> {
    let stem = path.file_stem()?.to_str()?;
    if path.extension()?.to_str()? != "json" {
        return None;
    }
    stem.parse::<i64>().ok().map(Timestamp::new)
}

fn read_json<V: DeserializeOwned>(path: &Path) -> Result<V, StoreError> {
    let data = fs::read_to_string(path)
        .map_err(|e| StoreError::io(format!("cannot read {}", path.display()), e))?;
    Ok(serde_json::from_str(&data)?)
}

//============ Tests =========================================================
