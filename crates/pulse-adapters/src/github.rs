use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_storage::{Credentials, HttpFetcher, JsonRequest};
use serde::{Deserialize, Serialize};

use crate::{AdapterError, WorkflowSource};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const ACCEPT: &str = "application/vnd.github.v3+json";
const RUNS_PAGE_SIZE: &str = "100";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubWorkflow {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubWorkflowRun {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub workflow_id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub run_started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct WorkflowsResponse {
    #[serde(default)]
    workflows: Vec<GithubWorkflow>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunsResponse {
    #[serde(default)]
    workflow_runs: Vec<GithubWorkflowRun>,
}

pub fn find_workflow<'a>(workflows: &'a [GithubWorkflow], name: &str) -> Option<&'a GithubWorkflow> {
    workflows.iter().find(|w| w.name == name)
}

#[derive(Debug, Clone)]
pub struct GithubClient {
    http: HttpFetcher,
    base_url: String,
    credentials: Credentials,
}

impl GithubClient {
    pub fn new(http: HttpFetcher, base_url: Option<&str>, token: impl Into<String>) -> Self {
        let base_url = base_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(DEFAULT_API_URL)
            .trim_end_matches('/')
            .to_string();
        Self {
            http,
            base_url,
            credentials: Credentials::Bearer(token.into()),
        }
    }

    fn repo_url(&self, owner: &str, repo: &str, tail: &str) -> String {
        format!("{}/repos/{owner}/{repo}/actions/{tail}", self.base_url)
    }
}

#[async_trait]
impl WorkflowSource for GithubClient {
    async fn list_workflows(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<GithubWorkflow>, AdapterError> {
        let url = self.repo_url(owner, repo, "workflows");
        let response: WorkflowsResponse = self
            .http
            .fetch_json(JsonRequest {
                source_id: self.source_id(),
                url: &url,
                query: &[],
                accept: ACCEPT,
                credentials: &self.credentials,
            })
            .await?;
        Ok(response.workflows)
    }

    async fn list_workflow_runs(
        &self,
        owner: &str,
        repo: &str,
        workflow_id: u64,
    ) -> Result<Vec<GithubWorkflowRun>, AdapterError> {
        let url = self.repo_url(owner, repo, &format!("workflows/{workflow_id}/runs"));
        let response: WorkflowRunsResponse = self
            .http
            .fetch_json(JsonRequest {
                source_id: self.source_id(),
                url: &url,
                query: &[("per_page", RUNS_PAGE_SIZE)],
                accept: ACCEPT,
                credentials: &self.credentials,
            })
            .await?;
        Ok(response.workflow_runs)
    }
}
