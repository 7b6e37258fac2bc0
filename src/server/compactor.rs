//! Compacting raw observations into one snapshot per calendar day.

use crate::api::snapshot::{BindingSnapshot, Observation, ProjectContext};
use crate::api::time::DayRange;

/// Compacts an unordered pile of observations into at most one snapshot
/// per calendar day of the range, using carry-forward semantics: each day
/// gets the most recent observation made before the day ended, whether that
/// observation happened on the day itself or earlier.
///
/// Days before the first observation yield nothing; a project is never
/// materialized with a fabricated zero-bindings day. Callers that need the
/// leading days covered supply the latest prior state as an extra
/// observation.
///
/// Observations with identical timestamps collapse to the one delivered
/// last; duplicate delivery of the same event therefore cannot change the
/// outcome.
pub fn compact(
    project: &ProjectContext,
    mut observations: Vec<Observation>,
    range: DayRange,
) -> Vec<BindingSnapshot> {
    if observations.is_empty() {
        return Vec::new();
    }

    // Stable, so input order breaks timestamp ties.
    observations.sort_by_key(|observation| observation.timestamp);

    let mut snapshots = Vec::new();
    let mut pending = observations.into_iter().peekable();
    let mut carried = None;

    for day in range.days() {
        let day_end = day.next().start();
        while let Some(observation) = pending.peek() {
            if observation.timestamp < day_end {
                carried = Some(observation.binding_count);
                pending.next();
            } else {
                break;
            }
        }
        if let Some(count) = carried {
            snapshots.push(BindingSnapshot::new(project, day, count));
        }
    }
    snapshots
}

//============ Tests =========================================================
