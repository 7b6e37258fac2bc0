//! A deterministic sample backend.
//!
//! Stands in for the real registry and event logs so that a binary run
//! against a `memory://` store works end-to-end without network access.
//! All data is derived from the configured seed; two sources built from the
//! same configuration serve identical histories.

use async_trait::async_trait;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Deserialize;
use crate::api::project::{Organization, OrganizationId, ProjectId, ProjectIdentity};
use crate::api::time::{Day, FetchWindow, Timestamp};
use crate::sources::{
    BindingEventSource, EventPage, PageToken, ProjectRegistry, RawBinding, RawPolicyEvent,
    RawRecommendationAction, RawRecommendationEvent, RecommendationEventSource, SourceError,
};

const SAMPLE_ROLES: &[&str] = &["roles/owner", "roles/editor", "roles/viewer"];

const REC_PAGE_SIZE: usize = 50;

//------------ SampleConfig --------------------------------------------------

/// Settings for the sample backend, the `[sample]` table of the config
/// file.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct SampleConfig {
    /// The number of projects the registry reports.
    #[serde(default = "SampleConfig::dflt_projects")]
    pub projects: u32,

    /// Seed for the generated histories.
    #[serde(default = "SampleConfig::dflt_seed")]
    pub seed: u64,

    /// How many days of history each project has, counted back from today.
    #[serde(default = "SampleConfig::dflt_history_days")]
    pub history_days: i64,
}

impl SampleConfig {
    fn dflt_projects() -> u32 {
        3
    }

    fn dflt_seed() -> u64 {
        0
    }

    fn dflt_history_days() -> i64 {
        45
    }
}

impl Default for SampleConfig {
    fn default() -> Self {
        SampleConfig {
            projects: Self::dflt_projects(),
            seed: Self::dflt_seed(),
            history_days: Self::dflt_history_days(),
        }
    }
}

//------------ SampleSource --------------------------------------------------

/// Implements all three collaborator traits over generated data.
#[derive(Clone, Debug)]
pub struct SampleSource {
    config: SampleConfig,
}

impl SampleSource {
    pub fn new(config: SampleConfig) -> Self {
        SampleSource { config }
    }

    fn identities(&self) -> Vec<ProjectIdentity> {
        (1..=self.config.projects)
            .map(|nr| {
                ProjectIdentity::new(
                    &format!("Sample Project {}", nr),
                    &format!("sample-project-{}", nr),
                    4_200_000_000 + nr as i64,
                )
            })
            .collect()
    }

    fn project_nr(&self, project: &ProjectId) -> Option<u32> {
        let nr: u32 = project.as_str().strip_prefix("sample-project-")?.parse().ok()?;
        if nr >= 1 && nr <= self.config.projects {
            Some(nr)
        } else {
            None
        }
    }

    /// Every fourth project lives outside any organization.
    fn organization_for_nr(nr: u32) -> Option<Organization> {
        if nr % 4 == 0 {
            None
        } else {
            Some(Organization::new("sample-org", "Sample Organization"))
        }
    }

    /// The full generated history for one project, ascending by timestamp.
    fn history(&self, nr: u32) -> ProjectHistory {
        let mut rng = StdRng::seed_from_u64(
            self.config.seed ^ (nr as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15),
        );
        let mut policy_events = Vec::new();
        let mut acceptance_events = Vec::new();

        let first_day = Day::today().minus_days(self.config.history_days);
        let mut count: i64 = rng.random_range(10..40);

        for offset in 0..self.config.history_days {
            let day = first_day.plus_days(offset);

            for _ in 0..rng.random_range(0..3u32) {
                let at = day.start() + chrono::Duration::minutes(rng.random_range(0..1440));
                count = (count + rng.random_range(-3..5)).max(1);
                policy_events.push(policy_event(at, count as u64, &mut rng));
            }

            // The occasional accepted recommendation, mirrored by the
            // policy change applying it.
            if count > 5 && rng.random_bool(0.12) {
                let at = day.start() + chrono::Duration::minutes(rng.random_range(0..1380));
                let impact = -rng.random_range(1..4i64);
                acceptance_events.push(acceptance_event(at, impact, &mut rng));
                count = (count + impact).max(1);
                policy_events
                    .push(policy_event(at + chrono::Duration::minutes(1), count as u64, &mut rng));
            }
        }

        policy_events.sort_by_key(|event| event.timestamp);
        acceptance_events.sort_by_key(|event| event.timestamp);
        ProjectHistory {
            policy_events,
            acceptance_events,
        }
    }
}

struct ProjectHistory {
    policy_events: Vec<RawPolicyEvent>,
    acceptance_events: Vec<RawRecommendationEvent>,
}

fn policy_event(at: Timestamp, count: u64, rng: &mut StdRng) -> RawPolicyEvent {
    // Spread the members over one to three roles.
    let roles = rng.random_range(1..=SAMPLE_ROLES.len().min(count.max(1) as usize));
    let mut bindings: Vec<RawBinding> = SAMPLE_ROLES
        .iter()
        .take(roles)
        .map(|role| RawBinding {
            role: role.to_string(),
            members: Vec::new(),
        })
        .collect();
    for member in 0..count {
        let slot = (member as usize) % bindings.len();
        bindings[slot]
            .members
            .push(format!("user:member-{}@example.com", member));
    }
    RawPolicyEvent {
        timestamp: at,
        bindings,
    }
}

fn acceptance_event(at: Timestamp, impact: i64, rng: &mut StdRng) -> RawRecommendationEvent {
    let role = SAMPLE_ROLES[rng.random_range(0..SAMPLE_ROLES.len())];
    RawRecommendationEvent {
        timestamp: at,
        actor: "admin@example.com".to_string(),
        recommender: "iam_binding".to_string(),
        impact_in_bindings: Some(impact),
        actions: vec![RawRecommendationAction {
            affected_account: format!("user:member-{}@example.com", rng.random_range(0..10)),
            previous_role: role.to_string(),
            new_role: String::new(),
        }],
    }
}

/// Slices one page out of a filtered event list. The token is the offset
/// into the list.
fn page<T: Clone>(events: &[T], page_size: usize, token: Option<PageToken>) -> EventPage<T> {
    let offset = token
        .and_then(|t| t.as_str().parse::<usize>().ok())
        .unwrap_or(0);
    let page_size = page_size.max(1);
    let items: Vec<T> = events.iter().skip(offset).take(page_size).cloned().collect();
    let consumed = offset + items.len();
    if consumed < events.len() {
        EventPage::more(items, consumed.to_string().into())
    } else {
        EventPage::last(items)
    }
}

//--- ProjectRegistry

#[async_trait]
impl ProjectRegistry for SampleSource {
    async fn discoverable_projects(&self) -> Result<Vec<ProjectIdentity>, SourceError> {
        Ok(self.identities())
    }

    async fn organization_id(
        &self,
        project: &ProjectId,
    ) -> Result<Option<OrganizationId>, SourceError> {
        match self.project_nr(project) {
            Some(nr) => Ok(Self::organization_for_nr(nr).map(|org| org.organization_id)),
            None => Err(SourceError::new(project, "unknown sample project")),
        }
    }

    async fn organization_name(
        &self,
        organization: &OrganizationId,
    ) -> Result<Option<String>, SourceError> {
        if organization.as_str() == "sample-org" {
            Ok(Some("Sample Organization".to_string()))
        } else {
            Ok(None)
        }
    }
}

//--- BindingEventSource

#[async_trait]
impl BindingEventSource for SampleSource {
    async fn binding_events(
        &self,
        project: &ProjectId,
        window: &FetchWindow,
        page_size: usize,
        token: Option<PageToken>,
    ) -> Result<EventPage<RawPolicyEvent>, SourceError> {
        let nr = self
            .project_nr(project)
            .ok_or_else(|| SourceError::new(project, "unknown sample project"))?;
        let events: Vec<_> = self
            .history(nr)
            .policy_events
            .into_iter()
            .filter(|event| window.contains(event.timestamp))
            .collect();
        Ok(page(&events, page_size, token))
    }

    async fn latest_before(
        &self,
        project: &ProjectId,
        before: Timestamp,
    ) -> Result<Option<RawPolicyEvent>, SourceError> {
        let nr = self
            .project_nr(project)
            .ok_or_else(|| SourceError::new(project, "unknown sample project"))?;
        Ok(self
            .history(nr)
            .policy_events
            .into_iter()
            .rev()
            .find(|event| event.timestamp < before))
    }
}

//--- RecommendationEventSource

#[async_trait]
impl RecommendationEventSource for SampleSource {
    async fn recommendation_events(
        &self,
        project: &ProjectId,
        window: &FetchWindow,
        token: Option<PageToken>,
    ) -> Result<EventPage<RawRecommendationEvent>, SourceError> {
        let nr = self
            .project_nr(project)
            .ok_or_else(|| SourceError::new(project, "unknown sample project"))?;
        let events: Vec<_> = self
            .history(nr)
            .acceptance_events
            .into_iter()
            .filter(|event| window.contains(event.timestamp))
            .collect();
        Ok(page(&events, REC_PAGE_SIZE, token))
    }
}

//============ Tests =========================================================
