//! Accepted recommendations and their actions.

use std::fmt;
use serde::{Deserialize, Serialize};
use crate::api::project::ProjectId;
use crate::api::time::{Day, Timestamp};

//------------ ActionType ----------------------------------------------------

/// What an accepted recommendation did to one role grant.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    RemoveRole,
    ReplaceRole,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ActionType::RemoveRole => write!(f, "remove_role"),
            ActionType::ReplaceRole => write!(f, "replace_role"),
        }
    }
}

//------------ RecommendationAction ------------------------------------------

/// One change applied to an account's role when the recommendation was
/// accepted.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RecommendationAction {
    /// The account whose grant changed.
    pub affected_account: String,

    /// The role the account held before.
    pub previous_role: String,

    /// The role granted instead. Empty when the role was removed outright.
    pub new_role: String,

    pub action_type: ActionType,
}

impl RecommendationAction {
    pub fn remove_role(affected_account: &str, previous_role: &str) -> Self {
        RecommendationAction {
            affected_account: affected_account.to_string(),
            previous_role: previous_role.to_string(),
            new_role: String::new(),
            action_type: ActionType::RemoveRole,
        }
    }

    pub fn replace_role(affected_account: &str, previous_role: &str, new_role: &str) -> Self {
        RecommendationAction {
            affected_account: affected_account.to_string(),
            previous_role: previous_role.to_string(),
            new_role: new_role.to_string(),
            action_type: ActionType::ReplaceRole,
        }
    }

    pub fn is_removal(&self) -> bool {
        self.action_type == ActionType::RemoveRole
    }
}

//------------ RecommenderType -----------------------------------------------

/// The recommender that produced a recommendation. One variant today;
/// stored data must survive new ones.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommenderType {
    IamBinding,
}

impl fmt::Display for RecommenderType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecommenderType::IamBinding => write!(f, "iam_binding"),
        }
    }
}

//------------ RecommendationMetadata ----------------------------------------

/// Recommender specific payload, tagged by the recommender type.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "recommender_type", rename_all = "snake_case")]
pub enum RecommendationMetadata {
    IamBinding(IamBindingImpact),
}

impl RecommendationMetadata {
    pub fn recommender_type(&self) -> RecommenderType {
        match self {
            RecommendationMetadata::IamBinding(_) => RecommenderType::IamBinding,
        }
    }
}

/// Payload of an IAM binding recommendation: how many bindings accepting it
/// changed. Negative when bindings were removed.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IamBindingImpact {
    pub impact_in_bindings: i64,
}

//------------ Recommendation ------------------------------------------------

/// An accepted recommendation for one project. Immutable once created and
/// uniquely keyed by `(project_id, accepted_timestamp)`; the store treats
/// a duplicate key as a replace.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Recommendation {
    pub project_id: ProjectId,

    /// Empty when the project has no organization.
    pub organization_id: String,

    /// Who accepted the recommendation.
    pub actor: String,

    /// The role changes applied, in the order they were reported.
    pub actions: Vec<RecommendationAction>,

    pub accepted_timestamp: Timestamp,

    #[serde(flatten)]
    pub metadata: RecommendationMetadata,
}

impl Recommendation {
    pub fn recommender_type(&self) -> RecommenderType {
        self.metadata.recommender_type()
    }

    pub fn day(&self) -> Day {
        self.accepted_timestamp.day()
    }

    pub fn key(&self) -> (ProjectId, Timestamp) {
        (self.project_id.clone(), self.accepted_timestamp)
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} accepted by {} at {}",
            self.recommender_type(),
            self.actor,
            self.accepted_timestamp.to_rfc3339()
        )
    }
}

//============ Tests =========================================================
