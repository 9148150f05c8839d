use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_storage::{Credentials, HttpFetcher, JsonRequest};
use serde::{Deserialize, Serialize};

use crate::{AdapterError, TicketSource};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JiraIssue {
    pub key: String,
    pub fields: JiraFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JiraFields {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub status: Option<JiraNamed>,
    #[serde(default)]
    pub priority: Option<JiraNamed>,
    #[serde(default)]
    pub assignee: Option<JiraUser>,
    #[serde(with = "jira_time")]
    pub created: DateTime<Utc>,
    #[serde(with = "jira_time")]
    pub updated: DateTime<Utc>,
    #[serde(default, with = "jira_time::option")]
    pub resolutiondate: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JiraNamed {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JiraUser {
    #[serde(rename = "displayName", default)]
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<JiraIssue>,
}

/// Jira emits `2024-01-15T10:30:00.000+0000`, which is not RFC 3339.
mod jira_time {
    use chrono::{DateTime, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    const JIRA_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%z";

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(raw)
            .or_else(|_| DateTime::parse_from_str(raw, JIRA_FORMAT))
            .map(|ts| ts.with_timezone(&Utc))
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(|e| D::Error::custom(format!("invalid timestamp {raw:?}: {e}")))
    }

    pub mod option {
        use super::*;
        use serde::de::Error as _;

        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => super::serialize(ts, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) => parse(&raw)
                    .map(Some)
                    .map_err(|e| D::Error::custom(format!("invalid timestamp {raw:?}: {e}"))),
                None => Ok(None),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct JiraClient {
    http: HttpFetcher,
    base_url: String,
    credentials: Credentials,
}

impl JiraClient {
    pub fn new(
        http: HttpFetcher,
        base_url: &str,
        email: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: Credentials::Basic {
                username: email.into(),
                password: token.into(),
            },
        }
    }
}

#[async_trait]
impl TicketSource for JiraClient {
    async fn search_issues(&self, query: &str) -> Result<Vec<JiraIssue>, AdapterError> {
        let url = format!("{}/rest/api/2/search", self.base_url);
        let response: SearchResponse = self
            .http
            .fetch_json(JsonRequest {
                source_id: self.source_id(),
                url: &url,
                query: &[("jql", query)],
                accept: "application/json",
                credentials: &self.credentials,
            })
            .await?;
        Ok(response.issues)
    }
}
