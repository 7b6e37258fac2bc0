//! Run modes and the reports an update or retention pass produces.

use std::fmt;
use serde::{Deserialize, Serialize};
use crate::api::project::ProjectId;
use crate::api::recommendation::Recommendation;
use crate::api::snapshot::BindingSnapshot;
use crate::api::time::Timestamp;

//------------ Mode ----------------------------------------------------------

/// How an update run selects its fetch windows.
///
/// Automatic runs are the recurring kind: known projects get the delta since
/// yesterday, newly discovered projects get full history. Manual runs are
/// triggered by an operator after adding projects and backfill only the new
/// ones, excluding the current day.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Automatic,
    Manual,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Mode::Automatic => write!(f, "automatic"),
            Mode::Manual => write!(f, "manual"),
        }
    }
}

//------------ UpdateBatch ---------------------------------------------------

/// Everything one run wants persisted. Handed to the store in a single
/// all-or-nothing call.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct UpdateBatch {
    pub snapshots: Vec<BindingSnapshot>,
    pub recommendations: Vec<Recommendation>,
}

impl UpdateBatch {
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty() && self.recommendations.is_empty()
    }

    /// Moves another batch's records into this one.
    pub fn absorb(&mut self, other: UpdateBatch) {
        self.snapshots.extend(other.snapshots);
        self.recommendations.extend(other.recommendations);
    }
}

//------------ ProjectFailure ------------------------------------------------

/// One project that contributed nothing to a run, and why.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProjectFailure {
    pub project_id: ProjectId,
    pub reason: String,
}

impl ProjectFailure {
    pub fn new(project_id: ProjectId, reason: impl fmt::Display) -> Self {
        ProjectFailure {
            project_id,
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for ProjectFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.project_id, self.reason)
    }
}

//------------ UpdateReport --------------------------------------------------

/// The outcome of one update run. Partial success is a valid outcome: the
/// failures list names the projects that contributed nothing.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct UpdateReport {
    pub mode: Mode,

    /// Projects processed with the incremental window.
    pub known_projects: usize,

    /// Projects processed with the backfill window.
    pub new_projects: usize,

    pub snapshots_written: usize,

    pub recommendations_written: usize,

    pub failures: Vec<ProjectFailure>,
}

impl UpdateReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for UpdateReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "update ({}): {} known and {} new projects",
            self.mode, self.known_projects, self.new_projects
        )?;
        writeln!(f, "  snapshots written:       {}", self.snapshots_written)?;
        writeln!(f, "  recommendations written: {}", self.recommendations_written)?;
        if self.failures.is_empty() {
            write!(f, "  failed projects:         none")
        } else {
            write!(f, "  failed projects:         {}", self.failures.len())?;
            for failure in &self.failures {
                write!(f, "\n    {}", failure)?;
            }
            Ok(())
        }
    }
}

//------------ RetentionReport -----------------------------------------------

/// The outcome of one retention pass.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RetentionReport {
    /// Records strictly older than this were removed. `None` when the store
    /// was empty and the pass was a no-op.
    pub cutoff: Option<Timestamp>,

    pub snapshots_deleted: u64,

    pub recommendations_deleted: u64,
}

impl RetentionReport {
    pub fn noop() -> Self {
        RetentionReport {
            cutoff: None,
            snapshots_deleted: 0,
            recommendations_deleted: 0,
        }
    }
}

impl fmt::Display for RetentionReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.cutoff {
            None => write!(f, "retention: store is empty, nothing to do"),
            Some(cutoff) => write!(
                f,
                "retention: removed {} snapshots and {} recommendations older than {}",
                self.snapshots_deleted,
                self.recommendations_deleted,
                cutoff.to_rfc3339()
            ),
        }
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_absorb_concatenates() {
        let mut batch = UpdateBatch::default();
        assert!(batch.is_empty());

        let other = UpdateBatch {
            snapshots: Vec::new(),
            recommendations: Vec::new(),
        };
        batch.absorb(other);
        assert!(batch.is_empty());
    }

    #[test]
    fn update_report_display() {
        let report = UpdateReport {
            mode: Mode::Automatic,
            known_projects: 2,
            new_projects: 1,
            snapshots_written: 14,
            recommendations_written: 3,
            failures: vec![ProjectFailure::new("project-9".into(), "connection reset")],
        };
        let text = report.to_string();
        assert!(text.contains("update (automatic): 2 known and 1 new projects"));
        assert!(text.contains("project-9: connection reset"));
        assert!(!report.is_complete());
    }

    #[test]
    fn retention_report_display() {
        assert_eq!(
            RetentionReport::noop().to_string(),
            "retention: store is empty, nothing to do"
        );
        let report = RetentionReport {
            cutoff: Some(Timestamp::new(0)),
            snapshots_deleted: 10,
            recommendations_deleted: 2,
        };
        let text = report.to_string();
        assert!(text.contains("removed 10 snapshots and 2 recommendations"));

        // The cutoff is spelled out as an RFC 3339 instant.
        let cutoff = regex::Regex::new(r"older than \d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}").unwrap();
        assert!(cutoff.is_match(&text));
    }
}
