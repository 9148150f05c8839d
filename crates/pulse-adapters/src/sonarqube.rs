use async_trait::async_trait;
use pulse_storage::{Credentials, HttpFetcher, JsonRequest};
use serde::{Deserialize, Serialize};

use crate::{AdapterError, QualitySource};

/// Requested per project unless configuration overrides it.
pub const DEFAULT_METRIC_KEYS: &[&str] = &[
    "ncloc",
    "coverage",
    "duplicated_lines_density",
    "bugs",
    "vulnerabilities",
    "code_smells",
    "reliability_rating",
    "security_rating",
    "sqale_rating",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SonarMeasure {
    pub metric: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub component: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MeasuresResponse {
    component: MeasuredComponent,
}

#[derive(Debug, Deserialize)]
struct MeasuredComponent {
    #[serde(default)]
    key: String,
    #[serde(default)]
    measures: Vec<SonarMeasure>,
}

impl MeasuredComponent {
    /// Measures inherit the component key of the response when they carry none.
    fn into_measures(self) -> Vec<SonarMeasure> {
        let key = self.key;
        self.measures
            .into_iter()
            .map(|mut m| {
                if m.component.as_deref().map_or(true, str::is_empty) && !key.is_empty() {
                    m.component = Some(key.clone());
                }
                m
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SonarqubeClient {
    http: HttpFetcher,
    base_url: String,
    credentials: Credentials,
}

impl SonarqubeClient {
    pub fn new(http: HttpFetcher, base_url: &str, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: Credentials::Bearer(token.into()),
        }
    }
}

#[async_trait]
impl QualitySource for SonarqubeClient {
    async fn project_measures(
        &self,
        project_key: &str,
        metric_keys: &[String],
    ) -> Result<Vec<SonarMeasure>, AdapterError> {
        let url = format!("{}/api/measures/component", self.base_url);
        let mut query = vec![("component", project_key)];
        query.extend(metric_keys.iter().map(|k| ("metricKeys", k.as_str())));

        let response: MeasuresResponse = self
            .http
            .fetch_json(JsonRequest {
                source_id: self.source_id(),
                url: &url,
                query: &query,
                accept: "application/json",
                credentials: &self.credentials,
            })
            .await?;
        Ok(response.component.into_measures())
    }
}
