//! Turning raw log events into canonical records.

use std::fmt;
use crate::api::recommendation::{
    IamBindingImpact, Recommendation, RecommendationAction, RecommendationMetadata,
};
use crate::api::snapshot::{Observation, ProjectContext};
use crate::sources::{RawPolicyEvent, RawRecommendationEvent};

//------------ NormalizeError ------------------------------------------------

/// A raw event that cannot be turned into a canonical record. The pipeline
/// skips such events with a warning rather than aborting the project.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NormalizeError {
    MissingField(&'static str),
    UnsupportedRecommender(String),
    Timestamp(i64),
    NoActions,
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NormalizeError::MissingField(field) => {
                write!(f, "required field '{}' is missing or empty", field)
            }
            NormalizeError::UnsupportedRecommender(found) => {
                write!(f, "unsupported recommender '{}'", found)
            }
            NormalizeError::Timestamp(millis) => {
                write!(f, "timestamp {} is out of range", millis)
            }
            NormalizeError::NoActions => write!(f, "event carries no actions"),
        }
    }
}

impl std::error::Error for NormalizeError {}

//------------ Policy events -------------------------------------------------

/// The total number of role-member grants a policy event reports: members
/// summed across all roles.
pub fn binding_count(event: &RawPolicyEvent) -> u64 {
    event
        .bindings
        .iter()
        .map(|binding| binding.members.len() as u64)
        .sum()
}

/// The observation a policy event amounts to.
pub fn observation(event: &RawPolicyEvent) -> Result<Observation, NormalizeError> {
    if !event.timestamp.is_representable() {
        return Err(NormalizeError::Timestamp(event.timestamp.millis()));
    }
    Ok(Observation::new(event.timestamp, binding_count(event)))
}

//------------ Recommendation events -----------------------------------------

/// The recommender name the one supported recommender type goes by in raw
/// events.
const RECOMMENDER_IAM_BINDING: &str = "iam_binding";

/// Resolves a raw acceptance event into a canonical recommendation for the
/// given project.
pub fn recommendation(
    project: &ProjectContext,
    event: RawRecommendationEvent,
) -> Result<Recommendation, NormalizeError> {
    if !event.timestamp.is_representable() {
        return Err(NormalizeError::Timestamp(event.timestamp.millis()));
    }
    if event.actor.is_empty() {
        return Err(NormalizeError::MissingField("actor"));
    }
    if event.recommender != RECOMMENDER_IAM_BINDING {
        return Err(NormalizeError::UnsupportedRecommender(event.recommender));
    }
    let impact_in_bindings = event
        .impact_in_bindings
        .ok_or(NormalizeError::MissingField("impact_in_bindings"))?;
    if event.actions.is_empty() {
        return Err(NormalizeError::NoActions);
    }

    let mut actions = Vec::with_capacity(event.actions.len());
    for action in event.actions {
        if action.affected_account.is_empty() {
            return Err(NormalizeError::MissingField("affected_account"));
        }
        if action.new_role.is_empty() {
            actions.push(RecommendationAction::remove_role(
                &action.affected_account,
                &action.previous_role,
            ));
        } else {
            actions.push(RecommendationAction::replace_role(
                &action.affected_account,
                &action.previous_role,
                &action.new_role,
            ));
        }
    }

    let organization_id = project
        .organization
        .as_ref()
        .map(|org| org.organization_id.to_string())
        .unwrap_or_default();

    Ok(Recommendation {
        project_id: project.identity.project_id.clone(),
        organization_id,
        actor: event.actor,
        actions,
        accepted_timestamp: event.timestamp,
        metadata: RecommendationMetadata::IamBinding(IamBindingImpact { impact_in_bindings }),
    })
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::recommendation::ActionType;
    use crate::api::time::Timestamp;
    use crate::commons::test;
    use crate::sources::{RawBinding, RawRecommendationAction};

    fn policy_event(ts: Timestamp) -> RawPolicyEvent {
        RawPolicyEvent {
            timestamp: ts,
            bindings: vec![
                RawBinding {
                    role: "roles/owner".to_string(),
                    members: vec!["user:a@example.org".to_string()],
                },
                RawBinding {
                    role: "roles/viewer".to_string(),
                    members: vec![
                        "user:b@example.org".to_string(),
                        "group:eng@example.org".to_string(),
                    ],
                },
            ],
        }
    }

    fn acceptance_event(ts: Timestamp) -> RawRecommendationEvent {
        RawRecommendationEvent {
            timestamp: ts,
            actor: "alice@example.org".to_string(),
            recommender: "iam_binding".to_string(),
            impact_in_bindings: Some(-2),
            actions: vec![
                RawRecommendationAction {
                    affected_account: "svc@example.org".to_string(),
                    previous_role: "roles/editor".to_string(),
                    new_role: String::new(),
                },
                RawRecommendationAction {
                    affected_account: "bob@example.org".to_string(),
                    previous_role: "roles/owner".to_string(),
                    new_role: "roles/viewer".to_string(),
                },
            ],
        }
    }

    #[test]
    fn counts_members_across_roles() {
        let event = policy_event(test::at_hour("2023-04-05", 9));
        assert_eq!(binding_count(&event), 3);

        let observed = observation(&event).unwrap();
        assert_eq!(observed.binding_count, 3);
        assert_eq!(observed.timestamp, event.timestamp);
    }

    #[test]
    fn rejects_unrepresentable_timestamps() {
        let event = policy_event(Timestamp::new(i64::MAX));
        assert_eq!(
            observation(&event).unwrap_err(),
            NormalizeError::Timestamp(i64::MAX)
        );
    }

    #[test]
    fn resolves_acceptance_events() {
        let ts = test::at_hour("2023-04-05", 9);
        let rec = recommendation(&test::context(1), acceptance_event(ts)).unwrap();

        assert_eq!(rec.project_id, "project-1".into());
        assert_eq!(rec.organization_id, "org-1");
        assert_eq!(rec.accepted_timestamp, ts);
        assert_eq!(rec.actions.len(), 2);
        assert_eq!(rec.actions[0].action_type, ActionType::RemoveRole);
        assert_eq!(rec.actions[1].action_type, ActionType::ReplaceRole);
        assert_eq!(rec.actions[1].new_role, "roles/viewer");
    }

    #[test]
    fn organization_may_be_absent() {
        let project = ProjectContext::new(test::project(1), None);
        let rec =
            recommendation(&project, acceptance_event(test::at_hour("2023-04-05", 9))).unwrap();
        assert!(rec.organization_id.is_empty());
    }

    #[test]
    fn rejects_malformed_acceptance_events() {
        let ts = test::at_hour("2023-04-05", 9);
        let project = test::context(1);

        let mut event = acceptance_event(ts);
        event.recommender = "cost_saver".to_string();
        assert_eq!(
            recommendation(&project, event).unwrap_err(),
            NormalizeError::UnsupportedRecommender("cost_saver".to_string())
        );

        let mut event = acceptance_event(ts);
        event.impact_in_bindings = None;
        assert_eq!(
            recommendation(&project, event).unwrap_err(),
            NormalizeError::MissingField("impact_in_bindings")
        );

        let mut event = acceptance_event(ts);
        event.actor = String::new();
        assert_eq!(
            recommendation(&project, event).unwrap_err(),
            NormalizeError::MissingField("actor")
        );

        let mut event = acceptance_event(ts);
        event.actions.clear();
        assert_eq!(
            recommendation(&project, event).unwrap_err(),
            NormalizeError::NoActions
        );

        let mut event = acceptance_event(ts);
        event.actions[0].affected_account = String::new();
        assert_eq!(
            recommendation(&project, event).unwrap_err(),
            NormalizeError::MissingField("affected_account")
        );
    }
}
