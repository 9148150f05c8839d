//! Upstream source clients (GitHub Actions, SonarQube, Jira) and the normalizer that
//! maps their records onto the canonical `pulse-core` types.

use async_trait::async_trait;
use pulse_storage::FetchError;
use thiserror::Error;
use tracing::debug;

mod github;
mod jira;
mod normalize;
mod sonarqube;

pub use github::{find_workflow, GithubClient, GithubWorkflow, GithubWorkflowRun};
pub use jira::{JiraClient, JiraFields, JiraIssue, JiraNamed, JiraUser};
pub use normalize::{normalize_quality_metric, normalize_ticket, normalize_workflow_run};
pub use sonarqube::{SonarMeasure, SonarqubeClient, DEFAULT_METRIC_KEYS};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("workflow '{workflow}' not found in repository {repository}")]
    WorkflowNotFound { workflow: String, repository: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// CI workflow runs for one repository.
#[async_trait]
pub trait WorkflowSource: Send + Sync {
    fn source_id(&self) -> &'static str {
        "github"
    }

    async fn list_workflows(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<GithubWorkflow>, AdapterError>;

    /// Most recent page of runs (upstream maximum page size).
    async fn list_workflow_runs(
        &self,
        owner: &str,
        repo: &str,
        workflow_id: u64,
    ) -> Result<Vec<GithubWorkflowRun>, AdapterError>;

    /// Resolves `workflow_name` by exact match, then fetches its runs.
    async fn workflow_runs_by_name(
        &self,
        owner: &str,
        repo: &str,
        workflow_name: &str,
    ) -> Result<Vec<GithubWorkflowRun>, AdapterError> {
        let workflows = self.list_workflows(owner, repo).await?;
        let workflow =
            find_workflow(&workflows, workflow_name).ok_or_else(|| AdapterError::WorkflowNotFound {
                workflow: workflow_name.to_string(),
                repository: pulse_core::repository_slug(owner, repo),
            })?;
        debug!(owner, repo, workflow_name, workflow_id = workflow.id, "resolved workflow");
        self.list_workflow_runs(owner, repo, workflow.id).await
    }
}

/// Static-analysis measures for one project, fetched in a single call.
#[async_trait]
pub trait QualitySource: Send + Sync {
    fn source_id(&self) -> &'static str {
        "sonarqube"
    }

    async fn project_measures(
        &self,
        project_key: &str,
        metric_keys: &[String],
    ) -> Result<Vec<SonarMeasure>, AdapterError>;
}

/// Issues matching a free-form tracker query, single page.
#[async_trait]
pub trait TicketSource: Send + Sync {
    fn source_id(&self) -> &'static str {
        "jira"
    }

    async fn search_issues(&self, query: &str) -> Result<Vec<JiraIssue>, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    struct StaticWorkflows {
        workflows: Vec<GithubWorkflow>,
        requested_ids: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl WorkflowSource for StaticWorkflows {
        async fn list_workflows(
            &self,
            _owner: &str,
            _repo: &str,
        ) -> Result<Vec<GithubWorkflow>, AdapterError> {
            Ok(self.workflows.clone())
        }

        async fn list_workflow_runs(
            &self,
            _owner: &str,
            _repo: &str,
            workflow_id: u64,
        ) -> Result<Vec<GithubWorkflowRun>, AdapterError> {
            self.requested_ids.lock().unwrap().push(workflow_id);
            let created = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).single().unwrap();
            Ok(vec![GithubWorkflowRun {
                id: 1,
                name: Some("Build".into()),
                status: Some("completed".into()),
                conclusion: Some("success".into()),
                workflow_id,
                created_at: created,
                updated_at: created,
                run_started_at: None,
            }])
        }
    }

    fn source() -> StaticWorkflows {
        StaticWorkflows {
            workflows: vec![
                GithubWorkflow {
                    id: 11,
                    name: "Build".into(),
                    path: ".github/workflows/build.yml".into(),
                },
                GithubWorkflow {
                    id: 12,
                    name: "Release".into(),
                    path: ".github/workflows/release.yml".into(),
                },
            ],
            requested_ids: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn resolves_workflow_by_exact_name() {
        let source = source();
        let runs = source
            .workflow_runs_by_name("acme", "api", "Release")
            .await
            .expect("release resolves");
        assert_eq!(runs.len(), 1);
        assert_eq!(*source.requested_ids.lock().unwrap(), vec![12]);
    }

    #[tokio::test]
    async fn unknown_workflow_is_not_found_without_fetching_runs() {
        let source = source();
        let err = source
            .workflow_runs_by_name("acme", "api", "build")
            .await
            .expect_err("match is case sensitive");
        match err {
            AdapterError::WorkflowNotFound {
                workflow,
                repository,
            } => {
                assert_eq!(workflow, "build");
                assert_eq!(repository, "acme/api");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(source.requested_ids.lock().unwrap().is_empty());
    }
}
