//! Collection orchestration: configuration, the per-source collection cycle, and the
//! cron-driven scheduler that triggers it.

use std::time::Duration;

use pulse_adapters::DEFAULT_METRIC_KEYS;
use serde::{Deserialize, Serialize};
use tracing::warn;

mod collector;
mod scheduler;

pub use collector::{
    CollectError, CollectionUnit, CycleSummary, MetricsCollector, SourceKind, SourceOutcome,
    SourceReport, UnitOutcome, UnitReport,
};
pub use scheduler::{
    cron_with_seconds, CollectionCycle, CollectionScheduler, CycleGuard, CyclePermit,
    SchedulerState, TriggerOutcome,
};

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/codepulse?sslmode=disable";
const DEFAULT_SCHEDULE: &str = "0 */6 * * *";

/// One repository and the workflow names to collect for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub name: String,
    #[serde(default)]
    pub workflows: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GithubSettings {
    pub token: String,
    pub org: String,
    pub api_url: Option<String>,
    pub repos: Vec<RepoConfig>,
}

#[derive(Debug, Clone)]
pub struct SonarqubeSettings {
    pub url: String,
    pub token: String,
    pub projects: Vec<String>,
    pub metric_keys: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct JiraSettings {
    pub url: String,
    pub email: String,
    pub token: String,
    pub queries: Vec<String>,
}

/// Process configuration. A source whose settings are `None` lacks credentials or an
/// endpoint and is skipped by the collector.
#[derive(Debug, Clone)]
pub struct PulseConfig {
    pub port: u16,
    pub database_url: String,
    pub github: Option<GithubSettings>,
    pub sonarqube: Option<SonarqubeSettings>,
    pub jira: Option<JiraSettings>,
    /// Five-field cron. Empty disables scheduled collection.
    pub collection_schedule: String,
    pub http_timeout_secs: u64,
    /// Pause between successive workflow units.
    pub unit_pause: Duration,
}

impl PulseConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let parsed = |key: &str| get(key).and_then(|v| v.parse::<u64>().ok());

        let github = match (get("GITHUB_TOKEN"), get("GITHUB_ORG")) {
            (Some(token), Some(org)) => Some(GithubSettings {
                token,
                org,
                api_url: get("GITHUB_API_URL"),
                repos: get("GITHUB_REPOS")
                    .map(|raw| parse_repos(&raw))
                    .unwrap_or_default(),
            }),
            _ => None,
        };

        let sonarqube = match (get("SONARQUBE_URL"), get("SONARQUBE_TOKEN")) {
            (Some(url), Some(token)) => Some(SonarqubeSettings {
                url,
                token,
                projects: get("SONARQUBE_PROJECTS")
                    .map(|raw| split_list(&raw, ','))
                    .unwrap_or_default(),
                metric_keys: get("SONARQUBE_METRIC_KEYS")
                    .map(|raw| split_list(&raw, ','))
                    .filter(|keys| !keys.is_empty())
                    .unwrap_or_else(|| DEFAULT_METRIC_KEYS.iter().map(|k| k.to_string()).collect()),
            }),
            _ => None,
        };

        let jira = match (get("JIRA_URL"), get("JIRA_EMAIL"), get("JIRA_TOKEN")) {
            (Some(url), Some(email), Some(token)) => Some(JiraSettings {
                url,
                email,
                token,
                queries: get("JIRA_QUERIES")
                    .map(|raw| split_list(&raw, ';'))
                    .unwrap_or_default(),
            }),
            _ => None,
        };

        // An explicitly empty schedule disables the scheduler; unset means the default.
        let collection_schedule = lookup("COLLECTION_SCHEDULE")
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| DEFAULT_SCHEDULE.to_string());

        Self {
            port: get("PORT").and_then(|v| v.parse().ok()).unwrap_or(8080),
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            github,
            sonarqube,
            jira,
            collection_schedule,
            http_timeout_secs: parsed("HTTP_TIMEOUT_SECS").unwrap_or(30),
            unit_pause: Duration::from_millis(parsed("COLLECTION_UNIT_PAUSE_MS").unwrap_or(1000)),
        }
    }
}

fn parse_repos(raw: &str) -> Vec<RepoConfig> {
    match serde_json::from_str(raw) {
        Ok(repos) => repos,
        Err(err) => {
            warn!(error = %err, "GITHUB_REPOS is not valid JSON; no repositories configured");
            Vec::new()
        }
    }
}

fn split_list(raw: &str, sep: char) -> Vec<String> {
    raw.split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
