//! Splitting discovered projects into known and new.

use std::collections::HashSet;
use crate::api::project::{ProjectId, ProjectIdentity};

//------------ Reconciled ----------------------------------------------------

/// The outcome of matching a registry listing against the store.
///
/// Projects the store has never seen are new and get a historical backfill;
/// projects it has seen are known and get an incremental update. Projects in
/// the store that the registry no longer lists appear in neither bucket:
/// their history stays untouched until retention ages it out.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Reconciled {
    pub known: Vec<ProjectIdentity>,
    pub new: Vec<ProjectIdentity>,
}

/// Matches `discovered` against the identities the store already holds.
///
/// Membership is decided by project id alone, so a renamed project stays
/// known and its bucket entry carries the freshly discovered name and
/// number. Discovery order is preserved and repeated listings of the same
/// project collapse to the first.
pub fn reconcile(stored: &[ProjectIdentity], discovered: Vec<ProjectIdentity>) -> Reconciled {
    let stored_ids: HashSet<&ProjectId> = stored.iter().map(|p| &p.project_id).collect();

    let mut seen = HashSet::new();
    let mut known = Vec::new();
    let mut new = Vec::new();

    for project in discovered {
        if !seen.insert(project.project_id.clone()) {
            continue;
        }
        if stored_ids.contains(&project.project_id) {
            known.push(project);
        } else {
            new.push(project);
        }
    }

    Reconciled { known, new }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commons::test;

    #[test]
    fn splits_discovered_projects_by_store_membership() {
        let stored = vec![test::project(1), test::project(2)];
        let discovered = vec![test::project(2), test::project(3), test::project(1)];

        let reconciled = reconcile(&stored, discovered);
        assert_eq!(reconciled.known, vec![test::project(2), test::project(1)]);
        assert_eq!(reconciled.new, vec![test::project(3)]);
    }

    #[test]
    fn everything_is_new_against_an_empty_store() {
        let reconciled = reconcile(&[], vec![test::project(1), test::project(2)]);
        assert!(reconciled.known.is_empty());
        assert_eq!(reconciled.new.len(), 2);
    }

    #[test]
    fn undiscovered_stored_projects_are_left_alone() {
        let stored = vec![test::project(1), test::project(2)];
        let reconciled = reconcile(&stored, vec![test::project(2)]);

        assert_eq!(reconciled.known, vec![test::project(2)]);
        assert!(reconciled.new.is_empty());
        // Project 1 is in neither bucket.
    }

    #[test]
    fn repeated_listings_collapse_to_the_first() {
        let discovered = vec![test::project(1), test::project(1), test::project(2)];
        let reconciled = reconcile(&[], discovered);
        assert_eq!(reconciled.new, vec![test::project(1), test::project(2)]);
    }

    #[test]
    fn a_renamed_project_stays_known_under_its_new_name() {
        let stored = vec![test::project(1)];
        let renamed = ProjectIdentity::new("A better name", "project-1", 1);

        let reconciled = reconcile(&stored, vec![renamed.clone()]);
        assert_eq!(reconciled.known, vec![renamed.clone()]);
        assert_eq!(reconciled.known[0].name, "A better name");
    }
}
