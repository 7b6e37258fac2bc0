//! Projects and the organizations they belong to.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;
use serde::{Deserialize, Serialize};

//------------ ProjectId -----------------------------------------------------

/// The unique identifier of a cloud project.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ProjectId(Arc<str>);

impl ProjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        ProjectId(s.into())
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        ProjectId(s.into())
    }
}

impl FromStr for ProjectId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.into())
    }
}

impl AsRef<str> for ProjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

//------------ ProjectIdentity -----------------------------------------------

/// Identity of a project as discovered in the external registry. Immutable
/// once discovered.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProjectIdentity {
    /// Human readable display name.
    pub name: String,

    /// The unique project identifier.
    pub project_id: ProjectId,

    /// The numeric identifier assigned by the platform.
    pub project_number: i64,
}

impl ProjectIdentity {
    pub fn new(name: &str, project_id: &str, project_number: i64) -> Self {
        ProjectIdentity {
            name: name.to_string(),
            project_id: project_id.into(),
            project_number,
        }
    }
}

/// Equality is by project id only.
impl PartialEq for ProjectIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.project_id == other.project_id
    }
}

impl Eq for ProjectIdentity {}

impl Hash for ProjectIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.project_id.hash(state)
    }
}

impl fmt::Display for ProjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.project_id.fmt(f)
    }
}

//------------ OrganizationId ------------------------------------------------

/// The unique identifier of an organization.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct OrganizationId(Arc<str>);

impl OrganizationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OrganizationId {
    fn from(s: &str) -> Self {
        OrganizationId(s.into())
    }
}

impl From<String> for OrganizationId {
    fn from(s: String) -> Self {
        OrganizationId(s.into())
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

//------------ Organization --------------------------------------------------

/// An organization, associated many-to-one from projects. Resolved once at
/// discovery time through ancestry lookup and immutable thereafter.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Organization {
    pub organization_id: OrganizationId,
    pub organization_name: String,
}

impl Organization {
    pub fn new(organization_id: &str, organization_name: &str) -> Self {
        Organization {
            organization_id: organization_id.into(),
            organization_name: organization_name.to_string(),
        }
    }
}

impl fmt::Display for Organization {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.organization_name, self.organization_id)
    }
}

//============ Tests =========================================================
