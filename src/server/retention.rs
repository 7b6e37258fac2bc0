//! Ageing out records past the retention horizon.

use std::sync::Arc;
use log::{debug, info};
use crate::api::report::RetentionReport;
use crate::commons::TallyResult;
use crate::commons::error::Error;
use crate::constants::RETENTION_DAYS;
use crate::store::EvidenceStore;

//------------ RetentionEnforcer ---------------------------------------------

/// Deletes snapshots and recommendations older than the retention year.
///
/// The horizon is measured back from the most recent *stored* snapshot
/// rather than from the wall clock, so a store that stops receiving updates
/// keeps its final year of history indefinitely instead of slowly draining
/// to nothing.
pub struct RetentionEnforcer {
    store: Arc<dyn EvidenceStore>,
}

impl RetentionEnforcer {
    pub fn new(store: Arc<dyn EvidenceStore>) -> Self {
        RetentionEnforcer { store }
    }

    /// Runs one retention pass. An empty store is a no-op, not an error.
    pub async fn enforce(&self) -> TallyResult<RetentionReport> {
        let most_recent = self
            .store
            .most_recent_timestamp()
            .await
            .map_err(Error::Retention)?;

        let Some(most_recent) = most_recent else {
            debug!("Retention: store holds no snapshots, nothing to age out");
            return Ok(RetentionReport::noop());
        };

        let cutoff = most_recent.minus_days(RETENTION_DAYS);
        let snapshots_deleted = self
            .store
            .delete_bindings_older_than(cutoff)
            .await
            .map_err(Error::Retention)?;
        let recommendations_deleted = self
            .store
            .delete_recommendations_older_than(cutoff)
            .await
            .map_err(Error::Retention)?;

        let report = RetentionReport {
            cutoff: Some(cutoff),
            snapshots_deleted,
            recommendations_deleted,
        };
        if snapshots_deleted > 0 || recommendations_deleted > 0 {
            info!("{}", report);
        } else {
            debug!("Retention: nothing older than {}", cutoff.to_rfc3339());
        }
        Ok(report)
    }
}

//============ Tests =========================================================
