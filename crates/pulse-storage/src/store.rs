use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_core::{QualityMetric, Ticket, WorkflowRun};
use serde::Serialize;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::info;

/// Effect of a single idempotent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    Inserted,
    /// Natural key already present; nothing changed.
    Ignored,
    /// Natural key already present; mutable fields overwritten.
    Updated,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("applying schema migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("store is closed")]
    Closed,
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowRunQuery {
    pub repository: Option<String>,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct QualityMetricQuery {
    pub project_key: Option<String>,
    pub metric_key: Option<String>,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct TicketQuery {
    pub status: Option<String>,
    pub assignee: Option<String>,
    pub since: DateTime<Utc>,
}

/// Persistence layer. Each write is single-record and atomic on its own.
///
/// Workflow runs and quality metrics are insert-or-ignore; tickets are upserted.
/// Reads return newest first.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn save_workflow_run(&self, run: &WorkflowRun) -> Result<WriteOutcome, StoreError>;
    async fn save_quality_metric(&self, metric: &QualityMetric)
        -> Result<WriteOutcome, StoreError>;
    async fn save_ticket(&self, ticket: &Ticket) -> Result<WriteOutcome, StoreError>;

    async fn workflow_runs(&self, query: &WorkflowRunQuery)
        -> Result<Vec<WorkflowRun>, StoreError>;
    async fn quality_metrics(
        &self,
        query: &QualityMetricQuery,
    ) -> Result<Vec<QualityMetric>, StoreError>;
    async fn tickets(&self, query: &TicketQuery) -> Result<Vec<Ticket>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgMetricsStore {
    pool: PgPool,
}

impl PgMetricsStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("schema migrations applied");
        Ok(())
    }
}

fn workflow_run_from_row(row: &PgRow) -> Result<WorkflowRun, sqlx::Error> {
    Ok(WorkflowRun {
        repository: row.try_get("repository")?,
        workflow_name: row.try_get("workflow_name")?,
        status: row.try_get("status")?,
        duration_secs: row.try_get("duration")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn quality_metric_from_row(row: &PgRow) -> Result<QualityMetric, sqlx::Error> {
    Ok(QualityMetric {
        project_key: row.try_get("project_key")?,
        metric_key: row.try_get("metric_key")?,
        value: row.try_get("value")?,
        component: row.try_get("component")?,
        collected_at: row.try_get("collected_at")?,
    })
}

fn ticket_from_row(row: &PgRow) -> Result<Ticket, sqlx::Error> {
    Ok(Ticket {
        ticket_key: row.try_get("ticket_key")?,
        summary: row.try_get("summary")?,
        status: row.try_get("status")?,
        priority: row.try_get("priority")?,
        assignee: row.try_get("assignee")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

#[async_trait]
impl MetricsStore for PgMetricsStore {
    async fn save_workflow_run(&self, run: &WorkflowRun) -> Result<WriteOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO github_workflows
                (repository, workflow_name, status, duration, created_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (repository, workflow_name, created_at) DO NOTHING
            "#,
        )
        .bind(&run.repository)
        .bind(&run.workflow_name)
        .bind(&run.status)
        .bind(run.duration_secs)
        .bind(run.created_at)
        .bind(run.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 0 {
            WriteOutcome::Ignored
        } else {
            WriteOutcome::Inserted
        })
    }

    async fn save_quality_metric(
        &self,
        metric: &QualityMetric,
    ) -> Result<WriteOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO sonarqube_metrics
                (project_key, metric_key, value, component, collected_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (project_key, metric_key, component, collected_at) DO NOTHING
            "#,
        )
        .bind(&metric.project_key)
        .bind(&metric.metric_key)
        .bind(&metric.value)
        .bind(&metric.component)
        .bind(metric.collected_at)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 0 {
            WriteOutcome::Ignored
        } else {
            WriteOutcome::Inserted
        })
    }

    async fn save_ticket(&self, ticket: &Ticket) -> Result<WriteOutcome, StoreError> {
        // xmax is zero only for a freshly inserted tuple.
        let row = sqlx::query(
            r#"
            INSERT INTO jira_tickets
                (ticket_key, summary, status, priority, assignee, created_at, updated_at, resolved_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (ticket_key) DO UPDATE SET
                summary = EXCLUDED.summary,
                status = EXCLUDED.status,
                priority = EXCLUDED.priority,
                assignee = EXCLUDED.assignee,
                updated_at = EXCLUDED.updated_at,
                resolved_at = EXCLUDED.resolved_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&ticket.ticket_key)
        .bind(&ticket.summary)
        .bind(&ticket.status)
        .bind(&ticket.priority)
        .bind(&ticket.assignee)
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .bind(ticket.resolved_at)
        .fetch_one(&self.pool)
        .await?;

        let inserted: bool = row.try_get("inserted")?;
        Ok(if inserted {
            WriteOutcome::Inserted
        } else {
            WriteOutcome::Updated
        })
    }

    async fn workflow_runs(
        &self,
        query: &WorkflowRunQuery,
    ) -> Result<Vec<WorkflowRun>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT repository, workflow_name, status, duration, created_at, completed_at
              FROM github_workflows
             WHERE ($1::text IS NULL OR repository = $1)
               AND created_at >= $2
             ORDER BY created_at DESC
            "#,
        )
        .bind(query.repository.as_deref())
        .bind(query.since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(workflow_run_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn quality_metrics(
        &self,
        query: &QualityMetricQuery,
    ) -> Result<Vec<QualityMetric>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT project_key, metric_key, value, component, collected_at
              FROM sonarqube_metrics
             WHERE ($1::text IS NULL OR project_key = $1)
               AND ($2::text IS NULL OR metric_key = $2)
               AND collected_at >= $3
             ORDER BY collected_at DESC
            "#,
        )
        .bind(query.project_key.as_deref())
        .bind(query.metric_key.as_deref())
        .bind(query.since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(quality_metric_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn tickets(&self, query: &TicketQuery) -> Result<Vec<Ticket>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT ticket_key, summary, status, priority, assignee, created_at, updated_at, resolved_at
              FROM jira_tickets
             WHERE ($1::text IS NULL OR status = $1)
               AND ($2::text IS NULL OR assignee = $2)
               AND created_at >= $3
             ORDER BY created_at DESC
            "#,
        )
        .bind(query.status.as_deref())
        .bind(query.assignee.as_deref())
        .bind(query.since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(ticket_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }
}
