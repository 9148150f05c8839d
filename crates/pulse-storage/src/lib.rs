//! Outbound HTTP fetching and idempotent metric persistence for code-pulse.

use std::time::Duration;

use anyhow::Context;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

mod memory;
mod store;

pub use memory::{InMemoryMetricsStore, StoreCounts};
pub use store::{
    MetricsStore, PgMetricsStore, QualityMetricQuery, StoreError, TicketQuery, WorkflowRunQuery,
    WriteOutcome,
};

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Applied to every outbound request.
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: Some(format!("code-pulse/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

/// How a request authenticates against its upstream.
#[derive(Clone)]
pub enum Credentials {
    Bearer(String),
    Basic { username: String, password: String },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Bearer(***)"),
            Self::Basic { username, .. } => write!(f, "Basic({username}:***)"),
        }
    }
}

/// A single GET against a JSON endpoint.
#[derive(Debug, Clone)]
pub struct JsonRequest<'a> {
    pub source_id: &'a str,
    pub url: &'a str,
    pub query: &'a [(&'a str, &'a str)],
    pub accept: &'a str,
    pub credentials: &'a Credentials,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Thin wrapper over a shared `reqwest::Client`. Performs no retries.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: JsonRequest<'_>,
    ) -> Result<T, FetchError> {
        let span = info_span!("http_fetch", source_id = request.source_id, url = request.url);
        self.fetch_json_inner(request).instrument(span).await
    }

    async fn fetch_json_inner<T: DeserializeOwned>(
        &self,
        request: JsonRequest<'_>,
    ) -> Result<T, FetchError> {
        let mut builder = self
            .client
            .get(request.url)
            .header(reqwest::header::ACCEPT, request.accept);
        if !request.query.is_empty() {
            builder = builder.query(request.query);
        }
        builder = match request.credentials {
            Credentials::Bearer(token) => builder.bearer_auth(token),
            Credentials::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
        };

        let resp = builder.send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();

        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = resp.bytes().await?;
        debug!(bytes = body.len(), status = status.as_u16(), "upstream response");
        decode_json_body(&final_url, &body)
    }
}

pub fn decode_json_body<T: DeserializeOwned>(url: &str, body: &[u8]) -> Result<T, FetchError> {
    serde_json::from_slice(body).map_err(|source| FetchError::Decode {
        url: url.to_string(),
        source,
    })
}
