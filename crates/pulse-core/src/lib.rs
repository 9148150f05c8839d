//! Canonical metric records shared by the collectors, the store and the read API.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// One CI workflow run. Natural key: `(repository, workflow_name, created_at)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// `owner/name`.
    pub repository: String,
    pub workflow_name: String,
    /// Conclusion when the run has one, otherwise the raw status.
    pub status: String,
    /// Whole seconds. May be negative when upstream timestamps are inconsistent.
    #[serde(rename = "duration")]
    pub duration_secs: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn natural_key(&self) -> (&str, &str, DateTime<Utc>) {
        (&self.repository, &self.workflow_name, self.created_at)
    }

    /// Negative durations are stored as observed; callers flag them.
    pub fn has_duration_anomaly(&self) -> bool {
        self.duration_secs < 0
    }
}

/// One static-analysis measure captured at `collected_at`.
/// Natural key: `(project_key, metric_key, component, collected_at)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityMetric {
    pub project_key: String,
    pub metric_key: String,
    /// Upstream values are heterogeneous (counts, percentages, rating letters).
    pub value: String,
    pub component: String,
    pub collected_at: DateTime<Utc>,
}

impl QualityMetric {
    pub fn natural_key(&self) -> (&str, &str, &str, DateTime<Utc>) {
        (
            &self.project_key,
            &self.metric_key,
            &self.component,
            self.collected_at,
        )
    }
}

/// Issue-tracker ticket. Natural key: `ticket_key`. The only record type that is
/// overwritten when seen again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_key: String,
    pub summary: String,
    pub status: String,
    pub priority: String,
    /// Display name, empty when unassigned.
    pub assignee: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// `None` while the ticket is open.
    pub resolved_at: Option<DateTime<Utc>>,
}

pub fn repository_slug(owner: &str, repo: &str) -> String {
    format!("{owner}/{repo}")
}

/// Terminal status of a run: the conclusion if upstream reported one, else the raw status.
pub fn resolve_run_status(status: &str, conclusion: Option<&str>) -> String {
    match conclusion.map(str::trim) {
        Some(conclusion) if !conclusion.is_empty() => conclusion.to_string(),
        _ => status.to_string(),
    }
}

/// Timestamps at or before the Unix epoch are treated as "never set" upstream.
pub fn is_unset_timestamp(ts: &DateTime<Utc>) -> bool {
    ts.timestamp() <= 0
}

/// Run duration in whole seconds.
///
/// Measured from `started_at` when it is present and set, otherwise from
/// `created_at`. The result is not clamped.
pub fn derive_run_duration_secs(
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: DateTime<Utc>,
) -> i64 {
    let from = started_at
        .filter(|ts| !is_unset_timestamp(ts))
        .unwrap_or(created_at);
    (completed_at - from).num_seconds()
}

/// Capture instant for a batch of quality metrics, truncated to the storage precision
/// (microseconds) so that key equality holds after a database round trip.
pub fn collection_instant(now: DateTime<Utc>) -> DateTime<Utc> {
    now.trunc_subsecs(6)
}
