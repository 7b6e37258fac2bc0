//! The external services evidence is pulled from.
//!
//! Real deployments implement these traits on top of whatever transport the
//! platform offers; the crate itself only ships the deterministic sample
//! backend used for local runs and tests.

pub mod normalize;
pub mod sample;

use std::fmt;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::api::project::{OrganizationId, ProjectId, ProjectIdentity};
use crate::api::time::{FetchWindow, Timestamp};

//------------ SourceError ---------------------------------------------------

/// Something went wrong talking to an external service.
#[derive(Clone, Debug)]
pub struct SourceError {
    context: String,
    err: String,
}

impl SourceError {
    pub fn new(context: impl fmt::Display, err: impl fmt::Display) -> Self {
        SourceError {
            context: context.to_string(),
            err: err.to_string(),
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.err)
    }
}

impl std::error::Error for SourceError {}

//------------ PageToken -----------------------------------------------------

/// An opaque continuation token handed back by a paginated source.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PageToken(String);

impl PageToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PageToken {
    fn from(s: &str) -> Self {
        PageToken(s.to_string())
    }
}

impl From<String> for PageToken {
    fn from(s: String) -> Self {
        PageToken(s)
    }
}

//------------ EventPage -----------------------------------------------------

/// One page of events. Sources may return partial or even empty pages while
/// there is still more data; only `next: None` ends the stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EventPage<T> {
    pub items: Vec<T>,
    pub next: Option<PageToken>,
}

impl<T> EventPage<T> {
    pub fn last(items: Vec<T>) -> Self {
        EventPage { items, next: None }
    }

    pub fn more(items: Vec<T>, next: PageToken) -> Self {
        EventPage {
            items,
            next: Some(next),
        }
    }
}

//------------ RawPolicyEvent ------------------------------------------------

/// One IAM role grant as reported by a policy-change event.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RawBinding {
    pub role: String,
    pub members: Vec<String>,
}

/// One access-policy change event as delivered by the log: the full set of
/// bindings the project had right after the change.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RawPolicyEvent {
    pub timestamp: Timestamp,
    pub bindings: Vec<RawBinding>,
}

//------------ RawRecommendationEvent ----------------------------------------

/// One role change as reported by a recommendation-acceptance event. An
/// empty `new_role` means the role was removed outright.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RawRecommendationAction {
    pub affected_account: String,
    pub previous_role: String,
    pub new_role: String,
}

/// One recommendation-acceptance event as delivered by the log, before
/// normalization.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RawRecommendationEvent {
    /// When the recommendation was accepted.
    pub timestamp: Timestamp,

    /// Who accepted it.
    pub actor: String,

    /// The recommender that produced it, e.g. `iam_binding`.
    pub recommender: String,

    /// How many bindings accepting it changed. Required for the
    /// `iam_binding` recommender.
    pub impact_in_bindings: Option<i64>,

    pub actions: Vec<RawRecommendationAction>,
}

//------------ ProjectRegistry -----------------------------------------------

/// The service that knows which projects exist and where they hang in the
/// resource hierarchy.
#[async_trait]
pub trait ProjectRegistry: Send + Sync {
    /// All projects the configured credentials can discover.
    async fn discoverable_projects(&self) -> Result<Vec<ProjectIdentity>, SourceError>;

    /// Ancestry lookup. `None` when the project lives outside any
    /// organization.
    async fn organization_id(
        &self,
        project: &ProjectId,
    ) -> Result<Option<OrganizationId>, SourceError>;

    /// The display name for an organization, if the registry has one.
    async fn organization_name(
        &self,
        organization: &OrganizationId,
    ) -> Result<Option<String>, SourceError>;
}

//------------ BindingEventSource --------------------------------------------

/// The paginated log of access-policy change events.
#[async_trait]
pub trait BindingEventSource: Send + Sync {
    /// One page of events for the project within the window. `page_size` is
    /// a hint; sources may return fewer items.
    async fn binding_events(
        &self,
        project: &ProjectId,
        window: &FetchWindow,
        page_size: usize,
        token: Option<PageToken>,
    ) -> Result<EventPage<RawPolicyEvent>, SourceError>;

    /// The most recent event strictly before the given instant. This seeds
    /// carry-forward at the start of a bounded window: without it a day
    /// with no new events would have nothing to repeat.
    async fn latest_before(
        &self,
        project: &ProjectId,
        before: Timestamp,
    ) -> Result<Option<RawPolicyEvent>, SourceError>;
}

//------------ RecommendationEventSource -------------------------------------

/// The paginated log of recommendation-acceptance events.
#[async_trait]
pub trait RecommendationEventSource: Send + Sync {
    async fn recommendation_events(
        &self,
        project: &ProjectId,
        window: &FetchWindow,
        token: Option<PageToken>,
    ) -> Result<EventPage<RawRecommendationEvent>, SourceError>;
}

//------------ Page draining -------------------------------------------------

/// Pulls binding-event pages until the source reports no further page.
pub async fn collect_binding_events(
    source: &dyn BindingEventSource,
    project: &ProjectId,
    window: &FetchWindow,
    page_size: usize,
) -> Result<Vec<RawPolicyEvent>, SourceError> {
    let mut events = Vec::new();
    let mut token = None;
    loop {
        let page = source
            .binding_events(project, window, page_size, token)
            .await?;
        events.extend(page.items);
        match page.next {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    Ok(events)
}

/// Pulls recommendation-event pages until the source reports no further
/// page.
pub async fn collect_recommendation_events(
    source: &dyn RecommendationEventSource,
    project: &ProjectId,
    window: &FetchWindow,
) -> Result<Vec<RawRecommendationEvent>, SourceError> {
    let mut events = Vec::new();
    let mut token = None;
    loop {
        let page = source
            .recommendation_events(project, window, token)
            .await?;
        events.extend(page.items);
        match page.next {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    Ok(events)
}
