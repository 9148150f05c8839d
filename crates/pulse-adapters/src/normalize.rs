//! Total mappings from upstream records to canonical records. Missing optional
//! fields become empty strings; nothing here can fail.

use chrono::{DateTime, Utc};
use pulse_core::{
    derive_run_duration_secs, repository_slug, resolve_run_status, QualityMetric, Ticket,
    WorkflowRun,
};

use crate::{GithubWorkflowRun, JiraIssue, SonarMeasure};

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// `workflow_name` is used when the run itself carries no name.
pub fn normalize_workflow_run(
    owner: &str,
    repo: &str,
    workflow_name: &str,
    run: &GithubWorkflowRun,
) -> WorkflowRun {
    WorkflowRun {
        repository: repository_slug(owner, repo),
        workflow_name: non_empty(run.name.as_deref())
            .unwrap_or(workflow_name)
            .to_string(),
        status: resolve_run_status(
            run.status.as_deref().unwrap_or_default(),
            run.conclusion.as_deref(),
        ),
        duration_secs: derive_run_duration_secs(run.created_at, run.run_started_at, run.updated_at),
        created_at: run.created_at,
        completed_at: run.updated_at,
    }
}

/// Component defaults to the project root.
pub fn normalize_quality_metric(
    project_key: &str,
    measure: &SonarMeasure,
    collected_at: DateTime<Utc>,
) -> QualityMetric {
    QualityMetric {
        project_key: project_key.to_string(),
        metric_key: measure.metric.clone(),
        value: measure.value.clone().unwrap_or_default(),
        component: non_empty(measure.component.as_deref())
            .unwrap_or(project_key)
            .to_string(),
        collected_at,
    }
}

/// An absent resolution date stays `None`; a present one is kept even if it is the epoch.
pub fn normalize_ticket(issue: &JiraIssue) -> Ticket {
    let fields = &issue.fields;
    Ticket {
        ticket_key: issue.key.clone(),
        summary: fields.summary.clone().unwrap_or_default(),
        status: fields
            .status
            .as_ref()
            .map(|s| s.name.clone())
            .unwrap_or_default(),
        priority: fields
            .priority
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_default(),
        assignee: fields
            .assignee
            .as_ref()
            .map(|a| a.display_name.clone())
            .unwrap_or_default(),
        created_at: fields.created,
        updated_at: fields.updated,
        resolved_at: fields.resolutiondate,
    }
}
