//! Binding counts: raw observations and compacted per-day snapshots.

use std::fmt;
use serde::{Deserialize, Serialize};
use crate::api::project::{Organization, ProjectId, ProjectIdentity};
use crate::api::time::{Day, Timestamp};

//------------ Observation ---------------------------------------------------

/// One normalized policy-change event: the total binding count of a project
/// at one instant. Input to compaction.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Observation {
    pub timestamp: Timestamp,
    pub binding_count: u64,
}

impl Observation {
    pub fn new(timestamp: Timestamp, binding_count: u64) -> Self {
        Observation {
            timestamp,
            binding_count,
        }
    }
}

//------------ ProjectContext ------------------------------------------------

/// A project plus its resolved organization, as carried through one update
/// pipeline.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProjectContext {
    pub identity: ProjectIdentity,
    pub organization: Option<Organization>,
}

impl ProjectContext {
    pub fn new(identity: ProjectIdentity, organization: Option<Organization>) -> Self {
        ProjectContext {
            identity,
            organization,
        }
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.identity.project_id
    }
}

//------------ BindingSnapshot -----------------------------------------------

/// The binding count of one project on one calendar day. At most one of
/// these exists per `(project_id, day)` in the store; a later compaction of
/// the same day replaces the earlier snapshot.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BindingSnapshot {
    pub project_id: ProjectId,

    pub project_name: String,

    pub project_number: i64,

    /// Empty when ancestry lookup found no organization.
    pub organization_id: String,

    pub organization_name: String,

    /// Stamped at the start of the snapshot's day.
    pub timestamp: Timestamp,

    pub binding_count: u64,
}

impl BindingSnapshot {
    /// Mints the snapshot for `day`, stamped at the day's first instant.
    pub fn new(project: &ProjectContext, day: Day, binding_count: u64) -> Self {
        let (organization_id, organization_name) = match &project.organization {
            Some(org) => (org.organization_id.to_string(), org.organization_name.clone()),
            None => (String::new(), String::new()),
        };
        BindingSnapshot {
            project_id: project.identity.project_id.clone(),
            project_name: project.identity.name.clone(),
            project_number: project.identity.project_number,
            organization_id,
            organization_name,
            timestamp: day.start(),
            binding_count,
        }
    }

    pub fn day(&self) -> Day {
        self.timestamp.day()
    }

    pub fn identity(&self) -> ProjectIdentity {
        ProjectIdentity {
            name: self.project_name.clone(),
            project_id: self.project_id.clone(),
            project_number: self.project_number,
        }
    }

    pub fn organization(&self) -> Option<Organization> {
        if self.organization_id.is_empty() {
            None
        } else {
            Some(Organization::new(&self.organization_id, &self.organization_name))
        }
    }
}

impl fmt::Display for BindingSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}: {} bindings on {}",
            self.project_id,
            self.binding_count,
            self.day()
        )
    }
}

//============ Tests =========================================================
