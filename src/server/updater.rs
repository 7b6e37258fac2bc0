//! Orchestrating one update run across all discoverable projects.

use std::sync::Arc;
use futures_util::future::join_all;
use log::{debug, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use crate::api::project::{Organization, ProjectId, ProjectIdentity};
use crate::api::recommendation::Recommendation;
use crate::api::report::{Mode, ProjectFailure, UpdateBatch, UpdateReport};
use crate::api::snapshot::{Observation, ProjectContext};
use crate::api::time::{DayRange, FetchWindow, Timestamp};
use crate::commons::TallyResult;
use crate::commons::error::Error;
use crate::constants::{DEF_FETCH_PARALLELISM, DEF_PAGE_SIZE, MANUAL_BACKFILL_DAYS};
use crate::server::compactor;
use crate::server::reconciler;
use crate::sources::normalize;
use crate::sources::{
    self, BindingEventSource, ProjectRegistry, RecommendationEventSource, SourceError,
};
use crate::store::{EvidenceStore, StoreError};

//------------ UpdaterOptions ------------------------------------------------

/// Tuning knobs for an [`Updater`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UpdaterOptions {
    /// How many project pipelines may fetch concurrently.
    pub fetch_parallelism: usize,

    /// Page size hint passed to the binding event source.
    pub page_size: usize,
}

impl Default for UpdaterOptions {
    fn default() -> Self {
        UpdaterOptions {
            fetch_parallelism: DEF_FETCH_PARALLELISM,
            page_size: DEF_PAGE_SIZE,
        }
    }
}

//------------ Updater -------------------------------------------------------

/// Runs update cycles: discover projects, reconcile them against the store,
/// fetch and compact evidence per project, and persist the lot in one batch.
///
/// Projects are processed concurrently, bounded by the configured fetch
/// parallelism. A failure in one project's pipeline removes that project
/// from the run and lands in the report; it never stops the siblings. Only
/// registry discovery and the final persistence call can fail the run as a
/// whole.
pub struct Updater {
    store: Arc<dyn EvidenceStore>,
    registry: Arc<dyn ProjectRegistry>,
    bindings: Arc<dyn BindingEventSource>,
    recommendations: Arc<dyn RecommendationEventSource>,
    limiter: Arc<Semaphore>,
    page_size: usize,
}

impl Updater {
    pub fn new(
        store: Arc<dyn EvidenceStore>,
        registry: Arc<dyn ProjectRegistry>,
        bindings: Arc<dyn BindingEventSource>,
        recommendations: Arc<dyn RecommendationEventSource>,
        options: UpdaterOptions,
    ) -> Self {
        Updater {
            store,
            registry,
            bindings,
            recommendations,
            limiter: Arc::new(Semaphore::new(options.fetch_parallelism.max(1))),
            page_size: options.page_size.max(1),
        }
    }

    /// Runs one update cycle against the current wall clock.
    pub async fn run(&self, mode: Mode) -> TallyResult<UpdateReport> {
        self.run_at(mode, Timestamp::now()).await
    }

    /// Runs one update cycle as if triggered at `now`. Split out from
    /// [`Updater::run`] so tests can pin the clock.
    pub async fn run_at(&self, mode: Mode, now: Timestamp) -> TallyResult<UpdateReport> {
        let discovered = self
            .registry
            .discoverable_projects()
            .await
            .map_err(Error::Registry)?;
        let stored = self.store.projects().await?;
        let reconciled = reconciler::reconcile(&stored, discovered);

        info!(
            "Update ({}): discovered {} known and {} new projects",
            mode,
            reconciled.known.len(),
            reconciled.new.len()
        );

        let mut scheduled: Vec<(ProjectId, JoinHandle<PipelineResult>)> = Vec::new();
        let mut known_projects = 0;
        if mode == Mode::Manual {
            // Manual runs backfill freshly added projects only.
            debug!(
                "Manual update: leaving {} known projects untouched",
                reconciled.known.len()
            );
        } else {
            known_projects = reconciled.known.len();
            for identity in reconciled.known {
                scheduled.push(self.schedule(identity, ProjectClass::Known, mode, now));
            }
        }
        let new_projects = reconciled.new.len();
        for identity in reconciled.new {
            scheduled.push(self.schedule(identity, ProjectClass::New, mode, now));
        }

        let (ids, handles): (Vec<_>, Vec<_>) = scheduled.into_iter().unzip();
        let outcomes = join_all(handles).await;

        let mut batch = UpdateBatch::default();
        let mut failures = Vec::new();
        for (project_id, outcome) in ids.into_iter().zip(outcomes) {
            match outcome {
                Ok(Ok(produced)) => batch.absorb(produced),
                Ok(Err(e)) => {
                    warn!("{}: update failed: {}", project_id, e);
                    failures.push(ProjectFailure::new(project_id, e));
                }
                Err(e) => {
                    warn!("{}: update task panicked: {}", project_id, e);
                    failures.push(ProjectFailure::new(
                        project_id,
                        format!("task panicked: {}", e),
                    ));
                }
            }
        }

        let snapshots_written = batch.snapshots.len();
        let recommendations_written = batch.recommendations.len();
        if !batch.is_empty() {
            self.store.upsert_batch(batch).await?;
        }

        let report = UpdateReport {
            mode,
            known_projects,
            new_projects,
            snapshots_written,
            recommendations_written,
            failures,
        };
        info!("{}", report);
        Ok(report)
    }

    fn schedule(
        &self,
        identity: ProjectIdentity,
        class: ProjectClass,
        mode: Mode,
        now: Timestamp,
    ) -> (ProjectId, JoinHandle<PipelineResult>) {
        let project_id = identity.project_id.clone();
        let pipeline = ProjectPipeline {
            store: self.store.clone(),
            registry: self.registry.clone(),
            bindings: self.bindings.clone(),
            recommendations: self.recommendations.clone(),
            limiter: self.limiter.clone(),
            page_size: self.page_size,
            identity,
            class,
            mode,
            now,
        };
        (project_id, tokio::spawn(pipeline.execute()))
    }
}

//------------ ProjectClass --------------------------------------------------

/// Whether the store has seen a project before. Decides the fetch window
/// and the compaction range.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ProjectClass {
    Known,
    New,
}

//------------ ProjectPipeline -----------------------------------------------

type PipelineResult = Result<UpdateBatch, PipelineError>;

/// The work for a single project within one run: resolve the organization,
/// fetch both event streams, normalize and compact them.
struct ProjectPipeline {
    store: Arc<dyn EvidenceStore>,
    registry: Arc<dyn ProjectRegistry>,
    bindings: Arc<dyn BindingEventSource>,
    recommendations: Arc<dyn RecommendationEventSource>,
    limiter: Arc<Semaphore>,
    page_size: usize,
    identity: ProjectIdentity,
    class: ProjectClass,
    mode: Mode,
    now: Timestamp,
}

impl ProjectPipeline {
    async fn execute(self) -> PipelineResult {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| PipelineError::Closed)?;

        let window = fetch_window(self.mode, self.class, self.now);
        debug!("{}: fetching events in {}", self.identity.project_id, window);

        let organization = self.resolve_organization().await?;
        let project = ProjectContext::new(self.identity.clone(), organization);

        let (observations, recommendations) = tokio::join!(
            self.fetch_observations(&project, &window),
            self.fetch_recommendations(&project, &window)
        );
        let observations = observations?;
        let recommendations = recommendations?;

        let range = compaction_range(self.mode, self.class, self.now, &observations);
        let snapshots = compactor::compact(&project, observations, range);
        debug!(
            "{}: compacted {} snapshots, {} recommendations",
            project.project_id(),
            snapshots.len(),
            recommendations.len()
        );

        Ok(UpdateBatch {
            snapshots,
            recommendations,
        })
    }

    /// For known projects the store is authoritative and spares us a
    /// registry round trip; freshly discovered projects need the ancestry
    /// lookup.
    async fn resolve_organization(&self) -> Result<Option<Organization>, PipelineError> {
        let project_id = &self.identity.project_id;
        if self.class == ProjectClass::Known {
            if let Some(org) = self.store.organization_for(project_id).await? {
                return Ok(Some(org));
            }
        }
        match self.registry.organization_id(project_id).await? {
            Some(organization_id) => {
                let organization_name = self
                    .registry
                    .organization_name(&organization_id)
                    .await?
                    .unwrap_or_default();
                Ok(Some(Organization {
                    organization_id,
                    organization_name,
                }))
            }
            None => Ok(None),
        }
    }

    /// Drains the policy-event log for the window and normalizes. For a
    /// bounded window the latest event before the lower bound is added as
    /// well, so carry-forward has a state to repeat on quiet leading days.
    async fn fetch_observations(
        &self,
        project: &ProjectContext,
        window: &FetchWindow,
    ) -> Result<Vec<Observation>, PipelineError> {
        let mut events = sources::collect_binding_events(
            self.bindings.as_ref(),
            project.project_id(),
            window,
            self.page_size,
        )
        .await?;
        if let Some(start) = window.start {
            if let Some(seed) = self.bindings.latest_before(project.project_id(), start).await? {
                events.push(seed);
            }
        }

        let mut observations = Vec::with_capacity(events.len());
        for event in &events {
            match normalize::observation(event) {
                Ok(observation) => observations.push(observation),
                Err(e) => warn!("{}: skipping policy event: {}", project.project_id(), e),
            }
        }
        Ok(observations)
    }

    async fn fetch_recommendations(
        &self,
        project: &ProjectContext,
        window: &FetchWindow,
    ) -> Result<Vec<Recommendation>, PipelineError> {
        let events = sources::collect_recommendation_events(
            self.recommendations.as_ref(),
            project.project_id(),
            window,
        )
        .await?;

        let mut recommendations = Vec::with_capacity(events.len());
        for event in events {
            match normalize::recommendation(project, event) {
                Ok(recommendation) => recommendations.push(recommendation),
                Err(e) => warn!("{}: skipping acceptance event: {}", project.project_id(), e),
            }
        }
        Ok(recommendations)
    }
}

//------------ PipelineError -------------------------------------------------

/// Why one project contributed nothing to a run.
#[derive(Debug)]
enum PipelineError {
    Source(SourceError),
    Store(StoreError),
    Closed,
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PipelineError::Source(e) => e.fmt(f),
            PipelineError::Store(e) => e.fmt(f),
            PipelineError::Closed => write!(f, "updater was shut down"),
        }
    }
}

impl From<SourceError> for PipelineError {
    fn from(e: SourceError) -> Self {
        PipelineError::Source(e)
    }
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        PipelineError::Store(e)
    }
}

//------------ Windows -------------------------------------------------------

/// The time window to pull events for.
fn fetch_window(mode: Mode, class: ProjectClass, now: Timestamp) -> FetchWindow {
    let today = now.day();
    match (mode, class) {
        // The recurring delta: everything since yesterday began.
        (Mode::Automatic, ProjectClass::Known) => {
            FetchWindow::bounded(today.minus_days(1).start(), now)
        }
        // Full history for a project we have never seen.
        (Mode::Automatic, ProjectClass::New) => FetchWindow::unbounded(now),
        // Operator backfill, excluding the still-changing current day.
        (Mode::Manual, _) => FetchWindow::bounded(
            today.minus_days(MANUAL_BACKFILL_DAYS).start(),
            today.start(),
        ),
    }
}

/// The days to materialize snapshots for, aligned with the fetch window.
fn compaction_range(
    mode: Mode,
    class: ProjectClass,
    now: Timestamp,
    observations: &[Observation],
) -> DayRange {
    let today = now.day();
    match (mode, class) {
        (Mode::Automatic, ProjectClass::Known) => {
            DayRange::new(today.minus_days(1), today.next())
        }
        (Mode::Automatic, ProjectClass::New) => {
            // History starts wherever the project's first event lies.
            match observations.iter().map(|o| o.timestamp).min() {
                Some(first) => DayRange::new(first.day(), today.next()),
                None => DayRange::new(today, today),
            }
        }
        (Mode::Manual, _) => DayRange::new(today.minus_days(MANUAL_BACKFILL_DAYS), today),
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commons::test;
    use crate::sources::sample::{SampleConfig, SampleSource};

    fn sample_updater(store: Arc<dyn EvidenceStore>, projects: u32) -> Updater {
        let sample = Arc::new(SampleSource::new(SampleConfig {
            projects,
            seed: 11,
            history_days: 10,
        }));
        Updater::new(
            store,
            sample.clone(),
            sample.clone(),
            sample,
            UpdaterOptions::default(),
        )
    }

    #[test]
    fn automatic_fetch_windows() {
        let now = test::at_hour("2023-04-05", 13);

        let known = fetch_window(Mode::Automatic, ProjectClass::Known, now);
        assert_eq!(known.start, Some(test::day("2023-04-04").start()));
        assert_eq!(known.end, now);

        let new = fetch_window(Mode::Automatic, ProjectClass::New, now);
        assert_eq!(new.start, None);
        assert_eq!(new.end, now);
    }

    #[test]
    fn manual_fetch_window_excludes_the_current_day() {
        let now = test::at_hour("2023-04-05", 13);

        let window = fetch_window(Mode::Manual, ProjectClass::New, now);
        assert_eq!(window.start, Some(test::day("2023-03-06").start()));
        assert_eq!(window.end, test::day("2023-04-05").start());
        assert!(!window.contains(now));
    }

    #[test]
    fn compaction_ranges_follow_the_windows() {
        let now = test::at_hour("2023-04-05", 13);

        // Known projects re-materialize yesterday and today.
        assert_eq!(
            compaction_range(Mode::Automatic, ProjectClass::Known, now, &[]),
            DayRange::new(test::day("2023-04-04"), test::day("2023-04-06"))
        );

        // New projects start at their first observation.
        let observations = vec![test::observation("2023-02-01", 9, 4)];
        assert_eq!(
            compaction_range(Mode::Automatic, ProjectClass::New, now, &observations),
            DayRange::new(test::day("2023-02-01"), test::day("2023-04-06"))
        );
        assert!(compaction_range(Mode::Automatic, ProjectClass::New, now, &[]).is_empty());

        // Manual backfill stops before the current day.
        assert_eq!(
            compaction_range(Mode::Manual, ProjectClass::New, now, &observations),
            DayRange::new(test::day("2023-03-06"), test::day("2023-04-05"))
        );
    }

    #[tokio::test]
    async fn an_automatic_run_backfills_new_projects() {
        let store = test::mem_store();
        let updater = sample_updater(store.clone(), 2);

        let report = updater.run(Mode::Automatic).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.known_projects, 0);
        assert_eq!(report.new_projects, 2);
        assert!(report.snapshots_written > 0);

        let projects = store.projects().await.unwrap();
        assert_eq!(projects.len(), 2);

        // Each project's days are contiguous from its first snapshot
        // through today.
        for project in &projects {
            let days = store.bindings_by_day(&project.project_id).await.unwrap();
            assert!(!days.is_empty());
            let mut expected = *days.keys().next().unwrap();
            for day in days.keys() {
                assert_eq!(*day, expected);
                expected = expected.next();
            }
            assert_eq!(expected.minus_days(1), crate::api::time::Day::today());
        }
    }

    #[tokio::test]
    async fn rerunning_makes_no_difference() {
        let store = test::mem_store();
        let updater = sample_updater(store.clone(), 2);

        updater.run(Mode::Automatic).await.unwrap();
        let project = store.projects().await.unwrap().remove(0);
        let before = store.bindings_by_day(&project.project_id).await.unwrap();

        // The second run treats the projects as known and re-materializes
        // yesterday and today to the same values.
        let report = updater.run(Mode::Automatic).await.unwrap();
        assert_eq!(report.known_projects, 2);
        assert_eq!(report.new_projects, 0);

        let after = store.bindings_by_day(&project.project_id).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn a_manual_run_skips_known_projects() {
        let store = test::mem_store();
        let updater = sample_updater(store.clone(), 2);
        updater.run(Mode::Automatic).await.unwrap();

        let report = updater.run(Mode::Manual).await.unwrap();
        assert_eq!(report.known_projects, 0);
        assert_eq!(report.new_projects, 0);
        assert_eq!(report.snapshots_written, 0);
        assert_eq!(report.recommendations_written, 0);
    }

    #[tokio::test]
    async fn a_manual_run_backfills_added_projects_without_today() {
        let store = test::mem_store();

        // Two projects exist; only the first has been updated before.
        sample_updater(store.clone(), 1)
            .run(Mode::Automatic)
            .await
            .unwrap();
        let updater = sample_updater(store.clone(), 2);

        let report = updater.run(Mode::Manual).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.new_projects, 1);

        let second: ProjectId = "sample-project-2".into();
        let days = store.bindings_by_day(&second).await.unwrap();
        assert!(!days.is_empty());
        assert!(!days.contains_key(&crate::api::time::Day::today()));
    }

    #[tokio::test]
    async fn unknown_projects_fail_without_stopping_the_run() {
        let store = test::mem_store();

        // The registry claims three projects but the event logs only know
        // two of them.
        let registry = Arc::new(SampleSource::new(SampleConfig {
            projects: 3,
            seed: 11,
            history_days: 10,
        }));
        let events = Arc::new(SampleSource::new(SampleConfig {
            projects: 2,
            seed: 11,
            history_days: 10,
        }));
        let updater = Updater::new(
            store.clone(),
            registry,
            events.clone(),
            events,
            UpdaterOptions::default(),
        );

        let report = updater.run(Mode::Automatic).await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].project_id, "sample-project-3".into());
        assert_eq!(store.projects().await.unwrap().len(), 2);
    }
}
