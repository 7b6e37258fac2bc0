//! Test update runs end to end against scripted evidence sources.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use async_trait::async_trait;
use chrono::Duration;
use rand::Rng;
use url::Url;
use tally::api::project::{Organization, OrganizationId, ProjectId, ProjectIdentity};
use tally::api::recommendation::{Recommendation, RecommendationMetadata};
use tally::api::report::{Mode, UpdateBatch};
use tally::api::time::{Day, FetchWindow, Timestamp};
use tally::commons::error::Error;
use tally::server::retention::RetentionEnforcer;
use tally::server::updater::{Updater, UpdaterOptions};
use tally::sources::{
    BindingEventSource, EventPage, PageToken, ProjectRegistry, RawBinding, RawPolicyEvent,
    RawRecommendationAction, RawRecommendationEvent, RecommendationEventSource, SourceError,
};
use tally::store::{self, EvidenceStore, StoreError};

//------------ Helpers -------------------------------------------------------

fn init_logging() {
    let _ = stderrlog::new().verbosity(3).init();
}

fn mem_store() -> Arc<dyn EvidenceStore> {
    let nr: u64 = rand::rng().random();
    let uri = Url::parse(&format!("memory:update-cycle-{:016x}", nr)).unwrap();
    store::open(&uri).unwrap()
}

fn day(s: &str) -> Day {
    s.parse().unwrap()
}

fn at(day: &str, hour: i64) -> Timestamp {
    self::day(day).start() + Duration::hours(hour)
}

fn policy_event(at: Timestamp, count: u64) -> RawPolicyEvent {
    RawPolicyEvent {
        timestamp: at,
        bindings: vec![RawBinding {
            role: "roles/editor".to_string(),
            members: (0..count)
                .map(|member| format!("user:member-{}@example.com", member))
                .collect(),
        }],
    }
}

fn acceptance_event(at: Timestamp, impact: i64) -> RawRecommendationEvent {
    RawRecommendationEvent {
        timestamp: at,
        actor: "alice@example.com".to_string(),
        recommender: "iam_binding".to_string(),
        impact_in_bindings: Some(impact),
        actions: vec![RawRecommendationAction {
            affected_account: "svc@example.com".to_string(),
            previous_role: "roles/editor".to_string(),
            new_role: String::new(),
        }],
    }
}

fn impact_of(recommendation: &Recommendation) -> i64 {
    match &recommendation.metadata {
        RecommendationMetadata::IamBinding(impact) => impact.impact_in_bindings,
    }
}

fn counts(days: &BTreeMap<Day, u64>) -> Vec<(Day, u64)> {
    days.iter().map(|(day, count)| (*day, *count)).collect()
}

//------------ Script --------------------------------------------------------

/// A scripted stand-in for the registry and both event logs.
#[derive(Clone, Default)]
struct Script {
    projects: Vec<ProjectIdentity>,
    organizations: HashMap<ProjectId, OrganizationId>,
    policy_events: HashMap<ProjectId, Vec<RawPolicyEvent>>,
    acceptance_events: HashMap<ProjectId, Vec<RawRecommendationEvent>>,
    /// Projects whose event fetches fail.
    broken: HashSet<ProjectId>,
}

impl Script {
    fn new() -> Self {
        Self::default()
    }

    fn project(mut self, nr: u32) -> Self {
        self.projects.push(ProjectIdentity::new(
            &format!("Project {}", nr),
            &format!("project-{}", nr),
            nr as i64,
        ));
        self
    }

    fn organized(mut self, project: &str, organization: &str) -> Self {
        self.organizations.insert(project.into(), organization.into());
        self
    }

    fn policy(mut self, project: &str, at: Timestamp, count: u64) -> Self {
        self.policy_events
            .entry(project.into())
            .or_default()
            .push(policy_event(at, count));
        self
    }

    fn acceptance(mut self, project: &str, at: Timestamp, impact: i64) -> Self {
        self.acceptance_events
            .entry(project.into())
            .or_default()
            .push(acceptance_event(at, impact));
        self
    }

    fn broken(mut self, project: &str) -> Self {
        self.broken.insert(project.into());
        self
    }

    fn updater(self, store: Arc<dyn EvidenceStore>) -> Updater {
        let script = Arc::new(self);
        Updater::new(
            store,
            script.clone(),
            script.clone(),
            script,
            UpdaterOptions::default(),
        )
    }

    fn available(&self, project: &ProjectId) -> Result<(), SourceError> {
        if self.broken.contains(project) {
            Err(SourceError::new(project, "scripted outage"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ProjectRegistry for Script {
    async fn discoverable_projects(&self) -> Result<Vec<ProjectIdentity>, SourceError> {
        Ok(self.projects.clone())
    }

    async fn organization_id(
        &self,
        project: &ProjectId,
    ) -> Result<Option<OrganizationId>, SourceError> {
        Ok(self.organizations.get(project).cloned())
    }

    async fn organization_name(
        &self,
        _organization: &OrganizationId,
    ) -> Result<Option<String>, SourceError> {
        Ok(Some("Acme".to_string()))
    }
}

#[async_trait]
impl BindingEventSource for Script {
    async fn binding_events(
        &self,
        project: &ProjectId,
        window: &FetchWindow,
        _page_size: usize,
        _token: Option<PageToken>,
    ) -> Result<EventPage<RawPolicyEvent>, SourceError> {
        self.available(project)?;
        let events = self
            .policy_events
            .get(project)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter(|event| window.contains(event.timestamp))
            .cloned()
            .collect();
        Ok(EventPage::last(events))
    }

    async fn latest_before(
        &self,
        project: &ProjectId,
        before: Timestamp,
    ) -> Result<Option<RawPolicyEvent>, SourceError> {
        self.available(project)?;
        Ok(self
            .policy_events
            .get(project)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter(|event| event.timestamp < before)
            .max_by_key(|event| event.timestamp)
            .cloned())
    }
}

#[async_trait]
impl RecommendationEventSource for Script {
    async fn recommendation_events(
        &self,
        project: &ProjectId,
        window: &FetchWindow,
        _token: Option<PageToken>,
    ) -> Result<EventPage<RawRecommendationEvent>, SourceError> {
        self.available(project)?;
        let events = self
            .acceptance_events
            .get(project)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter(|event| window.contains(event.timestamp))
            .cloned()
            .collect();
        Ok(EventPage::last(events))
    }
}

//------------ RejectingStore ------------------------------------------------

/// Delegates reads to a real store but refuses any write.
struct RejectingStore {
    inner: Arc<dyn EvidenceStore>,
}

#[async_trait]
impl EvidenceStore for RejectingStore {
    async fn projects(&self) -> Result<Vec<ProjectIdentity>, StoreError> {
        self.inner.projects().await
    }

    async fn organizations(&self) -> Result<Vec<Organization>, StoreError> {
        self.inner.organizations().await
    }

    async fn organization_for(
        &self,
        project: &ProjectId,
    ) -> Result<Option<Organization>, StoreError> {
        self.inner.organization_for(project).await
    }

    async fn average_bindings_past_year(&self, project: &ProjectId) -> Result<f64, StoreError> {
        self.inner.average_bindings_past_year(project).await
    }

    async fn bindings_by_day(&self, project: &ProjectId) -> Result<BTreeMap<Day, u64>, StoreError> {
        self.inner.bindings_by_day(project).await
    }

    async fn recommendations_by_day(
        &self,
        project: &ProjectId,
    ) -> Result<BTreeMap<Day, Recommendation>, StoreError> {
        self.inner.recommendations_by_day(project).await
    }

    async fn most_recent_timestamp(&self) -> Result<Option<Timestamp>, StoreError> {
        self.inner.most_recent_timestamp().await
    }

    async fn upsert_batch(&self, _batch: UpdateBatch) -> Result<(), StoreError> {
        Err(StoreError::other("scripted write failure"))
    }

    async fn delete_bindings_older_than(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        self.inner.delete_bindings_older_than(cutoff).await
    }

    async fn delete_recommendations_older_than(
        &self,
        cutoff: Timestamp,
    ) -> Result<u64, StoreError> {
        self.inner.delete_recommendations_older_than(cutoff).await
    }
}

//------------ Scenarios -----------------------------------------------------

#[tokio::test]
async fn a_new_project_gets_its_full_history_backfilled() {
    init_logging();
    let store = mem_store();

    // One project with a policy change on April 1st and an accepted
    // recommendation on April 3rd, mirrored by the policy change that
    // applied it.
    let updater = Script::new()
        .project(1)
        .organized("project-1", "org-1")
        .policy("project-1", at("2023-04-01", 9), 43)
        .acceptance("project-1", at("2023-04-03", 9), -3)
        .policy("project-1", at("2023-04-03", 9) + Duration::minutes(1), 40)
        .updater(store.clone());

    let report = updater
        .run_at(Mode::Automatic, at("2023-04-05", 13))
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_eq!(report.new_projects, 1);
    assert_eq!(report.known_projects, 0);
    assert_eq!(report.snapshots_written, 5);
    assert_eq!(report.recommendations_written, 1);

    // Carry-forward from the first event through today.
    let project: ProjectId = "project-1".into();
    assert_eq!(
        counts(&store.bindings_by_day(&project).await.unwrap()),
        vec![
            (day("2023-04-01"), 43),
            (day("2023-04-02"), 43),
            (day("2023-04-03"), 40),
            (day("2023-04-04"), 40),
            (day("2023-04-05"), 40),
        ]
    );

    // The acceptance day's snapshot reflects the post-acceptance count.
    let recommendations = store.recommendations_by_day(&project).await.unwrap();
    assert_eq!(recommendations.len(), 1);
    assert_eq!(impact_of(&recommendations[&day("2023-04-03")]), -3);

    // The organization resolved at discovery sticks to the snapshots.
    assert_eq!(
        store.organization_for(&project).await.unwrap(),
        Some(Organization::new("org-1", "Acme"))
    );
}

#[tokio::test]
async fn rerunning_the_same_evidence_changes_nothing() {
    init_logging();
    let store = mem_store();
    let script = Script::new()
        .project(1)
        .policy("project-1", at("2023-04-01", 9), 43)
        .policy("project-1", at("2023-04-03", 10), 40);

    let updater = script.clone().updater(store.clone());
    updater
        .run_at(Mode::Automatic, at("2023-04-05", 13))
        .await
        .unwrap();
    let project: ProjectId = "project-1".into();
    let before = store.bindings_by_day(&project).await.unwrap();

    // The later run sees the project as known and re-materializes only
    // yesterday and today, to the same values.
    let report = updater
        .run_at(Mode::Automatic, at("2023-04-05", 14))
        .await
        .unwrap();
    assert_eq!(report.known_projects, 1);
    assert_eq!(report.new_projects, 0);
    assert_eq!(report.snapshots_written, 2);

    assert_eq!(store.bindings_by_day(&project).await.unwrap(), before);
}

#[tokio::test]
async fn a_known_project_gets_yesterday_and_today_refreshed() {
    init_logging();
    let store = mem_store();

    let script = Script::new()
        .project(1)
        .policy("project-1", at("2023-04-01", 9), 30)
        .policy("project-1", at("2023-04-04", 10), 40);
    script
        .clone()
        .updater(store.clone())
        .run_at(Mode::Automatic, at("2023-04-04", 12))
        .await
        .unwrap();

    // A day later a new policy change has appeared.
    let report = script
        .policy("project-1", at("2023-04-05", 9), 50)
        .updater(store.clone())
        .run_at(Mode::Automatic, at("2023-04-05", 13))
        .await
        .unwrap();
    assert_eq!(report.known_projects, 1);

    let project: ProjectId = "project-1".into();
    assert_eq!(
        counts(&store.bindings_by_day(&project).await.unwrap()),
        vec![
            (day("2023-04-01"), 30),
            (day("2023-04-02"), 30),
            (day("2023-04-03"), 30),
            (day("2023-04-04"), 40),
            (day("2023-04-05"), 50),
        ]
    );
}

#[tokio::test]
async fn manual_backfill_covers_the_window_but_not_today() {
    init_logging();
    let store = mem_store();

    // Events on three days of the last week; the run happens on the 20th.
    let report = Script::new()
        .project(1)
        .policy("project-1", at("2023-04-13", 9), 40)
        .policy("project-1", at("2023-04-15", 9), 35)
        .policy("project-1", at("2023-04-18", 9), 30)
        .updater(store.clone())
        .run_at(Mode::Manual, at("2023-04-20", 13))
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_eq!(report.new_projects, 1);

    let project: ProjectId = "project-1".into();
    assert_eq!(
        counts(&store.bindings_by_day(&project).await.unwrap()),
        vec![
            (day("2023-04-13"), 40),
            (day("2023-04-14"), 40),
            (day("2023-04-15"), 35),
            (day("2023-04-16"), 35),
            (day("2023-04-17"), 35),
            (day("2023-04-18"), 30),
            (day("2023-04-19"), 30),
        ]
    );
}

#[tokio::test]
async fn a_manual_run_leaves_known_projects_untouched() {
    init_logging();
    let store = mem_store();
    let script = Script::new()
        .project(1)
        .policy("project-1", at("2023-04-01", 9), 30);

    script
        .clone()
        .updater(store.clone())
        .run_at(Mode::Automatic, at("2023-04-05", 13))
        .await
        .unwrap();

    let report = script
        .updater(store.clone())
        .run_at(Mode::Manual, at("2023-04-05", 14))
        .await
        .unwrap();
    assert_eq!(report.known_projects, 0);
    assert_eq!(report.new_projects, 0);
    assert_eq!(report.snapshots_written, 0);
}

#[tokio::test]
async fn an_acceptance_delivered_in_two_runs_is_stored_once() {
    init_logging();
    let store = mem_store();
    let script = Script::new()
        .project(1)
        .policy("project-1", at("2023-04-04", 9), 20)
        .acceptance("project-1", at("2023-04-04", 9), -2);
    let updater = script.updater(store.clone());

    // The second run's incremental window covers the acceptance again.
    updater
        .run_at(Mode::Automatic, at("2023-04-05", 13))
        .await
        .unwrap();
    let report = updater
        .run_at(Mode::Automatic, at("2023-04-05", 14))
        .await
        .unwrap();
    assert_eq!(report.recommendations_written, 1);

    let project: ProjectId = "project-1".into();
    let recommendations = store.recommendations_by_day(&project).await.unwrap();
    assert_eq!(recommendations.len(), 1);
}

#[tokio::test]
async fn one_broken_project_does_not_stop_the_others() {
    init_logging();
    let store = mem_store();
    let script = Script::new()
        .project(1)
        .project(2)
        .policy("project-1", at("2023-04-01", 9), 30)
        .policy("project-2", at("2023-04-01", 9), 60);

    let report = script
        .clone()
        .broken("project-2")
        .updater(store.clone())
        .run_at(Mode::Automatic, at("2023-04-05", 13))
        .await
        .unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].project_id, "project-2".into());

    // The healthy project landed in full.
    let stored = store.projects().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].project_id, "project-1".into());

    // Once the outage is over the next run backfills the failed project.
    let report = script
        .updater(store.clone())
        .run_at(Mode::Automatic, at("2023-04-06", 13))
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_eq!(report.new_projects, 1);
    assert_eq!(store.projects().await.unwrap().len(), 2);
}

#[tokio::test]
async fn projects_no_longer_listed_keep_their_history() {
    init_logging();
    let store = mem_store();

    Script::new()
        .project(1)
        .policy("project-1", at("2023-04-01", 9), 30)
        .updater(store.clone())
        .run_at(Mode::Automatic, at("2023-04-05", 13))
        .await
        .unwrap();
    let project: ProjectId = "project-1".into();
    let before = store.bindings_by_day(&project).await.unwrap();

    // The registry now lists a different project entirely.
    let report = Script::new()
        .project(2)
        .policy("project-2", at("2023-04-03", 9), 60)
        .updater(store.clone())
        .run_at(Mode::Automatic, at("2023-04-05", 14))
        .await
        .unwrap();
    assert_eq!(report.known_projects, 0);
    assert_eq!(report.new_projects, 1);

    assert_eq!(store.bindings_by_day(&project).await.unwrap(), before);
    assert_eq!(store.projects().await.unwrap().len(), 2);
}

#[tokio::test]
async fn a_rejected_write_fails_the_run_with_a_store_error() {
    init_logging();
    let inner = mem_store();
    let store: Arc<dyn EvidenceStore> = Arc::new(RejectingStore {
        inner: inner.clone(),
    });

    let err = Script::new()
        .project(1)
        .policy("project-1", at("2023-04-01", 9), 30)
        .updater(store)
        .run_at(Mode::Automatic, at("2023-04-05", 13))
        .await
        .unwrap_err();

    // Callers skip retention when the update itself failed to persist.
    assert!(matches!(err, Error::Store(_)));
    assert!(inner.projects().await.unwrap().is_empty());
}

#[tokio::test]
async fn retention_trims_backfilled_history_to_a_year() {
    init_logging();
    let store = mem_store();

    Script::new()
        .project(1)
        .policy("project-1", at("2022-01-01", 9), 10)
        .policy("project-1", at("2023-04-05", 9), 20)
        .updater(store.clone())
        .run_at(Mode::Automatic, at("2023-04-05", 13))
        .await
        .unwrap();

    let project: ProjectId = "project-1".into();
    assert_eq!(store.bindings_by_day(&project).await.unwrap().len(), 460);

    let report = RetentionEnforcer::new(store.clone()).enforce().await.unwrap();
    assert_eq!(report.snapshots_deleted, 94);

    let days = store.bindings_by_day(&project).await.unwrap();
    assert_eq!(days.len(), 366);
    assert_eq!(days.keys().next(), Some(&day("2022-04-05")));
    assert_eq!(days.keys().last(), Some(&day("2023-04-05")));
}
