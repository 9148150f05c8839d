//! Read-only JSON API over persisted metrics.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, TimeDelta, Utc};
use pulse_storage::{MetricsStore, QualityMetricQuery, StoreError, TicketQuery, WorkflowRunQuery};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info};

const DEFAULT_WINDOW_DAYS: i64 = 30;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetricsStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self { store }
    }
}

/// `days` stays a string so an unparseable value falls back to the default window
/// instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
struct WorkflowParams {
    repository: Option<String>,
    days: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct QualityParams {
    project_key: Option<String>,
    metric_key: Option<String>,
    days: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TicketParams {
    status: Option<String>,
    assignee: Option<String>,
    days: Option<String>,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/metrics/github", get(workflow_runs_handler))
        .route("/api/metrics/sonarqube", get(quality_metrics_handler))
        .route("/api/metrics/jira", get(tickets_handler))
        .route("/api/health", get(health_handler))
        .with_state(Arc::new(state))
}

/// Serves until `shutdown` resolves. In-flight requests are allowed to finish.
pub async fn serve<F>(port: u16, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "read API listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Start of the trailing window. A negative `days` puts the start in the future and
/// selects nothing. Spans past the representable range clamp to the epoch (or the far
/// future for negative spans); the result never precedes the epoch.
fn window_start(days: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    let days = days
        .and_then(|d| d.trim().parse::<i64>().ok())
        .unwrap_or(DEFAULT_WINDOW_DAYS);
    TimeDelta::try_days(days)
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(if days < 0 {
            DateTime::<Utc>::MAX_UTC
        } else {
            DateTime::<Utc>::UNIX_EPOCH
        })
        .max(DateTime::<Utc>::UNIX_EPOCH)
}

fn filter(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

async fn workflow_runs_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WorkflowParams>,
) -> Response {
    let query = WorkflowRunQuery {
        since: window_start(params.days.as_deref(), Utc::now()),
        repository: filter(params.repository),
    };
    json_or_error(state.store.workflow_runs(&query).await)
}

async fn quality_metrics_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QualityParams>,
) -> Response {
    let query = QualityMetricQuery {
        since: window_start(params.days.as_deref(), Utc::now()),
        project_key: filter(params.project_key),
        metric_key: filter(params.metric_key),
    };
    json_or_error(state.store.quality_metrics(&query).await)
}

async fn tickets_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TicketParams>,
) -> Response {
    let query = TicketQuery {
        since: window_start(params.days.as_deref(), Utc::now()),
        status: filter(params.status),
        assignee: filter(params.assignee),
    };
    json_or_error(state.store.tickets(&query).await)
}

async fn health_handler() -> Json<Health> {
    Json(Health { status: "ok" })
}

fn json_or_error<T: Serialize>(result: Result<Vec<T>, StoreError>) -> Response {
    match result {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => server_error(err),
    }
}

fn server_error(err: StoreError) -> Response {
    error!(error = %err, "metrics query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Database error: {err}"),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use chrono::{Duration, TimeZone};
    use http_body_util::BodyExt;
    use pulse_core::{QualityMetric, Ticket, WorkflowRun};
    use pulse_storage::InMemoryMetricsStore;
    use serde_json::Value;
    use tower::ServiceExt;

    fn run(repository: &str, days_ago: i64) -> WorkflowRun {
        let created_at = Utc::now() - Duration::days(days_ago);
        WorkflowRun {
            repository: repository.into(),
            workflow_name: "CI".into(),
            status: "success".into(),
            duration_secs: 90,
            created_at,
            completed_at: created_at + Duration::seconds(90),
        }
    }

    fn ticket(key: &str, status: &str, assignee: &str, days_ago: i64) -> Ticket {
        let created_at = Utc::now() - Duration::days(days_ago);
        Ticket {
            ticket_key: key.into(),
            summary: format!("{key} summary"),
            status: status.into(),
            priority: "Medium".into(),
            assignee: assignee.into(),
            created_at,
            updated_at: created_at,
            resolved_at: None,
        }
    }

    async fn seeded_store() -> Arc<InMemoryMetricsStore> {
        let store = Arc::new(InMemoryMetricsStore::new());
        for r in [run("acme/api", 2), run("acme/api", 1), run("acme/web", 3), run("acme/api", 45)] {
            store.save_workflow_run(&r).await.unwrap();
        }
        for t in [
            ticket("OPS-1", "Open", "Dana Kim", 1),
            ticket("OPS-2", "Done", "Dana Kim", 2),
            ticket("OPS-3", "Open", "", 3),
        ] {
            store.save_ticket(&t).await.unwrap();
        }
        store
            .save_quality_metric(&QualityMetric {
                project_key: "acme_api".into(),
                metric_key: "coverage".into(),
                value: "81.4".into(),
                component: "acme_api".into(),
                collected_at: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single().unwrap(),
            })
            .await
            .unwrap();
        store
    }

    async fn get_json(store: Arc<InMemoryMetricsStore>, uri: &str) -> (StatusCode, Value) {
        let resp = app(AppState::new(store))
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = get_json(Arc::new(InMemoryMetricsStore::new()), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn workflow_runs_filtered_and_newest_first() {
        let (status, body) =
            get_json(seeded_store().await, "/api/metrics/github?repository=acme/api").await;
        assert_eq!(status, StatusCode::OK);

        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 2, "45-day-old run is outside the default window");
        assert!(rows.iter().all(|r| r["repository"] == "acme/api"));
        assert!(rows[0]["created_at"].as_str() > rows[1]["created_at"].as_str());
        assert_eq!(rows[0]["duration"], 90);
    }

    #[tokio::test]
    async fn unparseable_days_uses_default_window() {
        let (_, default) = get_json(seeded_store().await, "/api/metrics/github").await;
        let (_, garbage) = get_json(seeded_store().await, "/api/metrics/github?days=soon").await;
        let (_, wide) = get_json(seeded_store().await, "/api/metrics/github?days=60").await;
        assert_eq!(default.as_array().unwrap().len(), 3);
        assert_eq!(garbage.as_array().unwrap().len(), 3);
        assert_eq!(wide.as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn oversized_and_negative_days_do_not_fail() {
        let (status, huge) =
            get_json(seeded_store().await, "/api/metrics/github?days=100000000").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(huge.as_array().unwrap().len(), 4);

        let (status, future) = get_json(seeded_store().await, "/api/metrics/jira?days=-1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(future, serde_json::json!([]));
    }

    #[test]
    fn window_start_clamps_out_of_range_spans() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap();
        assert_eq!(
            window_start(Some("7"), now),
            Utc.with_ymd_and_hms(2026, 2, 22, 12, 0, 0).single().unwrap()
        );
        assert_eq!(window_start(Some("-2"), now), now + Duration::days(2));
        assert_eq!(window_start(Some("100000000"), now), DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(
            window_start(Some(i64::MAX.to_string().as_str()), now),
            DateTime::<Utc>::UNIX_EPOCH
        );
        assert_eq!(
            window_start(Some(i64::MIN.to_string().as_str()), now),
            DateTime::<Utc>::MAX_UTC
        );
        assert_eq!(window_start(Some("soon"), now), now - Duration::days(30));
    }

    #[tokio::test]
    async fn ticket_filters_and_empty_results() {
        let store = seeded_store().await;
        let (_, open) = get_json(store.clone(), "/api/metrics/jira?status=Open&assignee=Dana%20Kim").await;
        let keys = open
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["ticket_key"].as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["OPS-1"]);

        let (status, quality) =
            get_json(store, "/api/metrics/sonarqube?project_key=acme_api&days=7").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(quality, serde_json::json!([]));
    }

    #[tokio::test]
    async fn store_failure_is_a_server_error() {
        let store = Arc::new(InMemoryMetricsStore::new());
        store.close();
        let resp = app(AppState::new(store))
            .oneshot(Request::builder().uri("/api/metrics/jira").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(resp.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8(body.to_vec())
            .unwrap()
            .starts_with("Database error: "));
    }
}
