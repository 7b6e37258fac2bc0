//! The command line options for the `tally` binary.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use clap::Parser;
use serde::Serialize;
use crate::api::project::{Organization, ProjectId};
use crate::api::recommendation::Recommendation;
use crate::api::report::Mode;
use crate::api::time::Day;
use crate::cli::{output, output_json};
use crate::commons::TallyEmptyResult;
use crate::commons::error::Error;
use crate::config::Config;
use crate::server::retention::RetentionEnforcer;
use crate::server::updater::Updater;
use crate::sources::sample::SampleSource;
use crate::store::{self, EvidenceStore};

//------------ Options -------------------------------------------------------

/// The command line options for the `tally` binary.
#[derive(clap::Parser)]
#[command(
    version,
    about = "Daily IAM binding counts and recommendation uptake for cloud projects.",
)]
pub struct Options {
    #[command(flatten)]
    pub general: GeneralOptions,

    #[command(subcommand)]
    pub command: Command,
}

impl Options {
    /// Creates the options from the process arguments.
    ///
    /// If the arguments won’t result in usable options, exits the process.
    pub fn from_args() -> Self {
        Self::parse()
    }
}

//------------ GeneralOptions ------------------------------------------------

/// The options common between all subcommands.
#[derive(clap::Args)]
#[command(version)]
pub struct GeneralOptions {
    /// Override the path to the config file.
    #[arg(short, long, env = "TALLY_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print reports as JSON.
    #[arg(long)]
    pub json: bool,
}

//------------ Command -------------------------------------------------------

#[derive(clap::Subcommand)]
pub enum Command {
    /// Run one update cycle, then age out old records.
    Update(Update),

    /// Age out records older than the retention year.
    Retention(Retention),

    /// Print stored data for all projects or one project.
    Show(Show),
}

//------------ Update --------------------------------------------------------

#[derive(clap::Parser)]
pub struct Update {
    /// How the run selects its fetch windows.
    #[arg(long, value_enum, default_value_t = Mode::Automatic)]
    pub mode: Mode,
}

impl Update {
    pub async fn run(self, config: &Config, json: bool) -> TallyEmptyResult {
        let store = store::open(&config.storage_uri)?;
        let sample = sample_source(config);
        let updater = Updater::new(
            store.clone(),
            sample.clone(),
            sample.clone(),
            sample,
            config.updater_options(),
        );

        let report = updater.run(self.mode).await?;
        output(&report, json)?;

        // Retention runs only once the update has been committed.
        let report = RetentionEnforcer::new(store).enforce().await?;
        output(&report, json)
    }
}

//------------ Retention -----------------------------------------------------

#[derive(clap::Parser)]
pub struct Retention;

impl Retention {
    pub async fn run(self, config: &Config, json: bool) -> TallyEmptyResult {
        let store = store::open(&config.storage_uri)?;
        let report = RetentionEnforcer::new(store).enforce().await?;
        output(&report, json)
    }
}

//------------ Show ----------------------------------------------------------

#[derive(clap::Parser)]
pub struct Show {
    /// Print one project's full history rather than the project list.
    #[arg(long, value_name = "PROJECT_ID")]
    pub project: Option<ProjectId>,
}

impl Show {
    pub async fn run(self, config: &Config, _json: bool) -> TallyEmptyResult {
        let store = store::open(&config.storage_uri)?;
        match self.project {
            Some(project_id) => {
                output_json(&ProjectDetail::read(store.as_ref(), &project_id).await?)
            }
            None => output_json(&ProjectList::read(store.as_ref()).await?),
        }
    }
}

//------------ ProjectList ---------------------------------------------------

/// The `show` output without a project: one line of facts per project.
#[derive(Serialize)]
pub struct ProjectList {
    pub organizations: Vec<Organization>,
    pub projects: Vec<ProjectSummary>,
}

#[derive(Serialize)]
pub struct ProjectSummary {
    pub project_id: ProjectId,
    pub name: String,
    pub project_number: i64,
    pub organization: Option<Organization>,
    pub average_bindings_past_year: f64,
}

impl ProjectList {
    async fn read(store: &dyn EvidenceStore) -> Result<Self, Error> {
        let organizations = store.organizations().await?;
        let mut projects = Vec::new();
        for identity in store.projects().await? {
            let organization = store.organization_for(&identity.project_id).await?;
            let average = store
                .average_bindings_past_year(&identity.project_id)
                .await?;
            projects.push(ProjectSummary {
                project_id: identity.project_id,
                name: identity.name,
                project_number: identity.project_number,
                organization,
                average_bindings_past_year: average,
            });
        }
        Ok(ProjectList { organizations, projects })
    }
}

//------------ ProjectDetail -------------------------------------------------

/// The `show --project` output: everything stored for one project.
#[derive(Serialize)]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub summary: ProjectSummary,
    pub bindings_by_day: BTreeMap<Day, u64>,
    pub recommendations_by_day: BTreeMap<Day, Recommendation>,
}

impl ProjectDetail {
    async fn read(store: &dyn EvidenceStore, project_id: &ProjectId) -> Result<Self, Error> {
        let identity = store
            .projects()
            .await?
            .into_iter()
            .find(|identity| identity.project_id == *project_id)
            .ok_or_else(|| Error::custom(format!("unknown project '{}'", project_id)))?;

        let organization = store.organization_for(project_id).await?;
        let average = store.average_bindings_past_year(project_id).await?;
        Ok(ProjectDetail {
            summary: ProjectSummary {
                project_id: identity.project_id,
                name: identity.name,
                project_number: identity.project_number,
                organization,
                average_bindings_past_year: average,
            },
            bindings_by_day: store.bindings_by_day(project_id).await?,
            recommendations_by_day: store.recommendations_by_day(project_id).await?,
        })
    }
}

//------------ sample_source -------------------------------------------------

fn sample_source(config: &Config) -> Arc<SampleSource> {
    Arc::new(SampleSource::new(config.sample.clone()))
}
