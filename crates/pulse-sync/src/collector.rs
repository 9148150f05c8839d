use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use pulse_adapters::{
    normalize_quality_metric, normalize_ticket, normalize_workflow_run, AdapterError,
    GithubClient, JiraClient, QualitySource, SonarqubeClient, TicketSource, WorkflowSource,
};
use pulse_core::collection_instant;
use pulse_storage::{HttpClientConfig, HttpFetcher, MetricsStore, StoreError, WriteOutcome};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{PulseConfig, RepoConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Workflows,
    Quality,
    Tickets,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Workflows => "github",
            Self::Quality => "sonarqube",
            Self::Tickets => "jira",
        })
    }
}

/// One scoped fetch, normalize and persist task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionUnit {
    Workflow {
        owner: String,
        repo: String,
        workflow: String,
    },
    QualityProject {
        project_key: String,
    },
    TicketQuery {
        query: String,
    },
}

impl fmt::Display for CollectionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workflow {
                owner,
                repo,
                workflow,
            } => write!(f, "{owner}/{repo} workflow {workflow:?}"),
            Self::QualityProject { project_key } => write!(f, "project {project_key}"),
            Self::TicketQuery { query } => write!(f, "query {query:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitReport {
    pub fetched: usize,
    pub inserted: usize,
    pub ignored: usize,
    pub updated: usize,
}

impl UnitReport {
    fn fetched(count: usize) -> Self {
        Self {
            fetched: count,
            ..Self::default()
        }
    }

    fn record(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Inserted => self.inserted += 1,
            WriteOutcome::Ignored => self.ignored += 1,
            WriteOutcome::Updated => self.updated += 1,
        }
    }

    pub fn persisted(&self) -> usize {
        self.inserted + self.ignored + self.updated
    }
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("{0} source is not configured")]
    NotConfigured(SourceKind),
    #[error(transparent)]
    Fetch(#[from] AdapterError),
    #[error("persisting record {} failed: {source}", .persisted + 1)]
    Persist {
        persisted: usize,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug)]
pub struct UnitOutcome {
    pub unit: CollectionUnit,
    pub result: Result<UnitReport, CollectError>,
}

#[derive(Debug)]
pub enum SourceOutcome {
    /// Credentials or endpoint absent. Not a failure.
    Skipped { reason: String },
    Collected { units: Vec<UnitOutcome> },
}

#[derive(Debug)]
pub struct SourceReport {
    pub source: SourceKind,
    pub outcome: SourceOutcome,
}

#[derive(Debug)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
}

impl CycleSummary {
    pub fn source(&self, kind: SourceKind) -> Option<&SourceOutcome> {
        self.sources
            .iter()
            .find(|s| s.source == kind)
            .map(|s| &s.outcome)
    }

    fn units(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.sources.iter().flat_map(|s| match &s.outcome {
            SourceOutcome::Collected { units } => units.as_slice(),
            SourceOutcome::Skipped { .. } => &[][..],
        })
    }

    pub fn error_count(&self) -> usize {
        self.units().filter(|u| u.result.is_err()).count()
    }

    pub fn errors_for(&self, kind: SourceKind) -> usize {
        match self.source(kind) {
            Some(SourceOutcome::Collected { units }) => {
                units.iter().filter(|u| u.result.is_err()).count()
            }
            _ => 0,
        }
    }

    /// Records inserted or updated across all units.
    pub fn records_touched(&self) -> usize {
        self.units()
            .filter_map(|u| u.result.as_ref().ok())
            .map(|r| r.inserted + r.updated)
            .sum()
    }

    pub fn skipped_sources(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| matches!(s.outcome, SourceOutcome::Skipped { .. }))
            .count()
    }
}

struct WorkflowPlan {
    source: Arc<dyn WorkflowSource>,
    owner: String,
    repos: Vec<RepoConfig>,
}

struct QualityPlan {
    source: Arc<dyn QualitySource>,
    projects: Vec<String>,
    metric_keys: Vec<String>,
}

struct TicketPlan {
    source: Arc<dyn TicketSource>,
    queries: Vec<String>,
}

/// Drives fetch, normalize and persist for every configured source.
///
/// Sources run in a fixed order (workflows, quality, tickets) and units run one at a
/// time in configuration order. A failed unit is recorded and the cycle moves on.
pub struct MetricsCollector {
    store: Arc<dyn MetricsStore>,
    workflows: Option<WorkflowPlan>,
    quality: Option<QualityPlan>,
    tickets: Option<TicketPlan>,
    unit_pause: Duration,
}

impl MetricsCollector {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self {
            store,
            workflows: None,
            quality: None,
            tickets: None,
            unit_pause: Duration::from_secs(1),
        }
    }

    /// Builds upstream clients for every source whose settings are present.
    pub fn from_config(config: &PulseConfig, store: Arc<dyn MetricsStore>) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            ..Default::default()
        })?;

        let mut collector = Self::new(store).with_unit_pause(config.unit_pause);
        if let Some(github) = &config.github {
            let client = GithubClient::new(http.clone(), github.api_url.as_deref(), &github.token);
            collector = collector.with_workflow_source(
                Arc::new(client),
                github.org.clone(),
                github.repos.clone(),
            );
        }
        if let Some(sonar) = &config.sonarqube {
            let client = SonarqubeClient::new(http.clone(), &sonar.url, &sonar.token);
            collector = collector.with_quality_source(
                Arc::new(client),
                sonar.projects.clone(),
                sonar.metric_keys.clone(),
            );
        }
        if let Some(jira) = &config.jira {
            let client = JiraClient::new(http, &jira.url, &jira.email, &jira.token);
            collector = collector.with_ticket_source(Arc::new(client), jira.queries.clone());
        }
        Ok(collector)
    }

    pub fn with_workflow_source(
        mut self,
        source: Arc<dyn WorkflowSource>,
        owner: impl Into<String>,
        repos: Vec<RepoConfig>,
    ) -> Self {
        self.workflows = Some(WorkflowPlan {
            source,
            owner: owner.into(),
            repos,
        });
        self
    }

    pub fn with_quality_source(
        mut self,
        source: Arc<dyn QualitySource>,
        projects: Vec<String>,
        metric_keys: Vec<String>,
    ) -> Self {
        self.quality = Some(QualityPlan {
            source,
            projects,
            metric_keys,
        });
        self
    }

    pub fn with_ticket_source(mut self, source: Arc<dyn TicketSource>, queries: Vec<String>) -> Self {
        self.tickets = Some(TicketPlan { source, queries });
        self
    }

    pub fn with_unit_pause(mut self, pause: Duration) -> Self {
        self.unit_pause = pause;
        self
    }

    /// Units of work in visiting order. Empty for an unconfigured source.
    pub fn planned_units(&self, kind: SourceKind) -> Vec<CollectionUnit> {
        match kind {
            SourceKind::Workflows => self
                .workflows
                .iter()
                .flat_map(|plan| {
                    plan.repos.iter().flat_map(move |repo| {
                        repo.workflows.iter().map(move |workflow| CollectionUnit::Workflow {
                            owner: plan.owner.clone(),
                            repo: repo.name.clone(),
                            workflow: workflow.clone(),
                        })
                    })
                })
                .collect(),
            SourceKind::Quality => self
                .quality
                .iter()
                .flat_map(|plan| &plan.projects)
                .map(|project_key| CollectionUnit::QualityProject {
                    project_key: project_key.clone(),
                })
                .collect(),
            SourceKind::Tickets => self
                .tickets
                .iter()
                .flat_map(|plan| &plan.queries)
                .map(|query| CollectionUnit::TicketQuery {
                    query: query.clone(),
                })
                .collect(),
        }
    }

    pub async fn collect_workflow(
        &self,
        owner: &str,
        repo: &str,
        workflow: &str,
    ) -> Result<UnitReport, CollectError> {
        let plan = self
            .workflows
            .as_ref()
            .ok_or(CollectError::NotConfigured(SourceKind::Workflows))?;
        let runs = plan.source.workflow_runs_by_name(owner, repo, workflow).await?;

        let mut report = UnitReport::fetched(runs.len());
        for run in &runs {
            let record = normalize_workflow_run(owner, repo, workflow, run);
            if record.has_duration_anomaly() {
                warn!(
                    repository = %record.repository,
                    workflow = %record.workflow_name,
                    created_at = %record.created_at,
                    duration_secs = record.duration_secs,
                    "negative workflow run duration"
                );
            }
            let outcome = self
                .store
                .save_workflow_run(&record)
                .await
                .map_err(|source| CollectError::Persist {
                    persisted: report.persisted(),
                    source,
                })?;
            report.record(outcome);
        }
        Ok(report)
    }

    pub async fn collect_quality(&self, project_key: &str) -> Result<UnitReport, CollectError> {
        let plan = self
            .quality
            .as_ref()
            .ok_or(CollectError::NotConfigured(SourceKind::Quality))?;
        let measures = plan
            .source
            .project_measures(project_key, &plan.metric_keys)
            .await?;

        // One capture instant for the whole batch.
        let collected_at = collection_instant(Utc::now());
        let mut report = UnitReport::fetched(measures.len());
        for measure in &measures {
            let record = normalize_quality_metric(project_key, measure, collected_at);
            let outcome = self
                .store
                .save_quality_metric(&record)
                .await
                .map_err(|source| CollectError::Persist {
                    persisted: report.persisted(),
                    source,
                })?;
            report.record(outcome);
        }
        Ok(report)
    }

    pub async fn collect_tickets(&self, query: &str) -> Result<UnitReport, CollectError> {
        let plan = self
            .tickets
            .as_ref()
            .ok_or(CollectError::NotConfigured(SourceKind::Tickets))?;
        let issues = plan.source.search_issues(query).await?;

        let mut report = UnitReport::fetched(issues.len());
        for issue in &issues {
            let record = normalize_ticket(issue);
            let outcome = self
                .store
                .save_ticket(&record)
                .await
                .map_err(|source| CollectError::Persist {
                    persisted: report.persisted(),
                    source,
                })?;
            report.record(outcome);
        }
        Ok(report)
    }

    /// One full pass over every source. Never fails; unit errors are reported in the
    /// summary.
    pub async fn run_cycle(&self) -> CycleSummary {
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(%cycle_id, "starting metrics collection");

        let mut sources = Vec::with_capacity(3);
        for kind in [SourceKind::Workflows, SourceKind::Quality, SourceKind::Tickets] {
            let outcome = self.collect_source(kind).await;
            sources.push(SourceReport {
                source: kind,
                outcome,
            });
        }

        let summary = CycleSummary {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            sources,
        };
        info!(
            %cycle_id,
            elapsed_ms = clock.elapsed().as_millis() as u64,
            errors = summary.error_count(),
            skipped_sources = summary.skipped_sources(),
            records_touched = summary.records_touched(),
            "metrics collection completed"
        );
        summary
    }

    fn is_configured(&self, kind: SourceKind) -> bool {
        match kind {
            SourceKind::Workflows => self.workflows.is_some(),
            SourceKind::Quality => self.quality.is_some(),
            SourceKind::Tickets => self.tickets.is_some(),
        }
    }

    async fn collect_source(&self, kind: SourceKind) -> SourceOutcome {
        if !self.is_configured(kind) {
            info!(source = %kind, "configuration incomplete, skipping source");
            return SourceOutcome::Skipped {
                reason: format!("{kind} configuration incomplete"),
            };
        }

        info!(source = %kind, "collecting source");
        let planned = self.planned_units(kind);
        let mut units = Vec::with_capacity(planned.len());
        for (index, unit) in planned.into_iter().enumerate() {
            if kind == SourceKind::Workflows && index > 0 && !self.unit_pause.is_zero() {
                tokio::time::sleep(self.unit_pause).await;
            }
            let result = self.collect_unit(&unit).await;
            match &result {
                Ok(report) => info!(
                    source = %kind,
                    unit = %unit,
                    fetched = report.fetched,
                    inserted = report.inserted,
                    ignored = report.ignored,
                    updated = report.updated,
                    "unit collected"
                ),
                Err(err) => warn!(source = %kind, unit = %unit, error = %err, "unit failed"),
            }
            units.push(UnitOutcome { unit, result });
        }
        SourceOutcome::Collected { units }
    }

    async fn collect_unit(&self, unit: &CollectionUnit) -> Result<UnitReport, CollectError> {
        match unit {
            CollectionUnit::Workflow {
                owner,
                repo,
                workflow,
            } => self.collect_workflow(owner, repo, workflow).await,
            CollectionUnit::QualityProject { project_key } => {
                self.collect_quality(project_key).await
            }
            CollectionUnit::TicketQuery { query } => self.collect_tickets(query).await,
        }
    }
}
