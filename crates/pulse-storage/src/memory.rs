use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use pulse_core::{QualityMetric, Ticket, WorkflowRun};
use tokio::sync::Mutex;

use crate::store::{
    MetricsStore, QualityMetricQuery, StoreError, TicketQuery, WorkflowRunQuery, WriteOutcome,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub workflow_runs: usize,
    pub quality_metrics: usize,
    pub tickets: usize,
}

#[derive(Debug, Default)]
struct Tables {
    workflow_runs: Vec<WorkflowRun>,
    quality_metrics: Vec<QualityMetric>,
    tickets: BTreeMap<String, Ticket>,
}

/// Process-local store with the same conflict policies as the Postgres schema.
#[derive(Debug, Default)]
pub struct InMemoryMetricsStore {
    tables: Mutex<Tables>,
    closed: AtomicBool,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later call fails with [`StoreError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub async fn counts(&self) -> StoreCounts {
        let tables = self.tables.lock().await;
        StoreCounts {
            workflow_runs: tables.workflow_runs.len(),
            quality_metrics: tables.quality_metrics.len(),
            tickets: tables.tickets.len(),
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

fn matches(filter: &Option<String>, value: &str) -> bool {
    filter.as_deref().map_or(true, |f| f == value)
}

#[async_trait]
impl MetricsStore for InMemoryMetricsStore {
    async fn save_workflow_run(&self, run: &WorkflowRun) -> Result<WriteOutcome, StoreError> {
        self.ensure_open()?;
        let mut tables = self.tables.lock().await;
        if tables
            .workflow_runs
            .iter()
            .any(|existing| existing.natural_key() == run.natural_key())
        {
            return Ok(WriteOutcome::Ignored);
        }
        tables.workflow_runs.push(run.clone());
        Ok(WriteOutcome::Inserted)
    }

    async fn save_quality_metric(
        &self,
        metric: &QualityMetric,
    ) -> Result<WriteOutcome, StoreError> {
        self.ensure_open()?;
        let mut tables = self.tables.lock().await;
        if tables
            .quality_metrics
            .iter()
            .any(|existing| existing.natural_key() == metric.natural_key())
        {
            return Ok(WriteOutcome::Ignored);
        }
        tables.quality_metrics.push(metric.clone());
        Ok(WriteOutcome::Inserted)
    }

    async fn save_ticket(&self, ticket: &Ticket) -> Result<WriteOutcome, StoreError> {
        self.ensure_open()?;
        let mut tables = self.tables.lock().await;
        match tables.tickets.get_mut(&ticket.ticket_key) {
            Some(existing) => {
                // created_at is immutable, as in the SQL upsert.
                existing.summary = ticket.summary.clone();
                existing.status = ticket.status.clone();
                existing.priority = ticket.priority.clone();
                existing.assignee = ticket.assignee.clone();
                existing.updated_at = ticket.updated_at;
                existing.resolved_at = ticket.resolved_at;
                Ok(WriteOutcome::Updated)
            }
            None => {
                tables
                    .tickets
                    .insert(ticket.ticket_key.clone(), ticket.clone());
                Ok(WriteOutcome::Inserted)
            }
        }
    }

    async fn workflow_runs(
        &self,
        query: &WorkflowRunQuery,
    ) -> Result<Vec<WorkflowRun>, StoreError> {
        self.ensure_open()?;
        let tables = self.tables.lock().await;
        let mut rows = tables
            .workflow_runs
            .iter()
            .filter(|r| matches(&query.repository, &r.repository) && r.created_at >= query.since)
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn quality_metrics(
        &self,
        query: &QualityMetricQuery,
    ) -> Result<Vec<QualityMetric>, StoreError> {
        self.ensure_open()?;
        let tables = self.tables.lock().await;
        let mut rows = tables
            .quality_metrics
            .iter()
            .filter(|m| {
                matches(&query.project_key, &m.project_key)
                    && matches(&query.metric_key, &m.metric_key)
                    && m.collected_at >= query.since
            })
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| b.collected_at.cmp(&a.collected_at));
        Ok(rows)
    }

    async fn tickets(&self, query: &TicketQuery) -> Result<Vec<Ticket>, StoreError> {
        self.ensure_open()?;
        let tables = self.tables.lock().await;
        let mut rows = tables
            .tickets
            .values()
            .filter(|t| {
                matches(&query.status, &t.status)
                    && matches(&query.assignee, &t.assignee)
                    && t.created_at >= query.since
            })
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, day, hour, 0, 0).single().unwrap()
    }

    fn run(created_day: u32, status: &str, duration_secs: i64) -> WorkflowRun {
        WorkflowRun {
            repository: "acme/api".into(),
            workflow_name: "CI".into(),
            status: status.into(),
            duration_secs,
            created_at: ts(created_day, 9),
            completed_at: ts(created_day, 10),
        }
    }

    fn ticket(status: &str, assignee: &str, resolved_at: Option<DateTime<Utc>>) -> Ticket {
        Ticket {
            ticket_key: "OPS-7".into(),
            summary: format!("summary while {status}"),
            status: status.into(),
            priority: "High".into(),
            assignee: assignee.into(),
            created_at: ts(1, 8),
            updated_at: ts(2, 8),
            resolved_at,
        }
    }

    #[tokio::test]
    async fn workflow_run_first_write_wins() {
        let store = InMemoryMetricsStore::new();
        let first = run(3, "in_progress", 30);
        let second = run(3, "success", 95);

        assert_eq!(store.save_workflow_run(&first).await.unwrap(), WriteOutcome::Inserted);
        assert_eq!(store.save_workflow_run(&second).await.unwrap(), WriteOutcome::Ignored);

        let rows = store.workflow_runs(&WorkflowRunQuery::default()).await.unwrap();
        assert_eq!(rows, vec![first]);
    }

    #[tokio::test]
    async fn quality_metric_same_instant_is_ignored() {
        let store = InMemoryMetricsStore::new();
        let metric = QualityMetric {
            project_key: "acme_api".into(),
            metric_key: "coverage".into(),
            value: "81.2".into(),
            component: "acme_api".into(),
            collected_at: ts(4, 12),
        };
        let later = QualityMetric {
            collected_at: ts(4, 18),
            value: "82.0".into(),
            ..metric.clone()
        };

        assert_eq!(store.save_quality_metric(&metric).await.unwrap(), WriteOutcome::Inserted);
        assert_eq!(store.save_quality_metric(&metric).await.unwrap(), WriteOutcome::Ignored);
        assert_eq!(store.save_quality_metric(&later).await.unwrap(), WriteOutcome::Inserted);
        assert_eq!(store.counts().await.quality_metrics, 2);
    }

    #[tokio::test]
    async fn ticket_upsert_overwrites_mutable_fields() {
        let store = InMemoryMetricsStore::new();
        let open = ticket("Open", "", None);
        let mut done = ticket("Done", "Dana Kim", Some(ts(5, 17)));
        done.priority = "Low".into();
        done.updated_at = ts(5, 17);
        done.created_at = ts(9, 9);

        assert_eq!(store.save_ticket(&open).await.unwrap(), WriteOutcome::Inserted);
        assert_eq!(store.save_ticket(&done).await.unwrap(), WriteOutcome::Updated);

        let rows = store.tickets(&TicketQuery::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        let stored = &rows[0];
        assert_eq!(stored.ticket_key, "OPS-7");
        assert_eq!(stored.status, "Done");
        assert_eq!(stored.priority, "Low");
        assert_eq!(stored.assignee, "Dana Kim");
        assert_eq!(stored.summary, "summary while Done");
        assert_eq!(stored.updated_at, ts(5, 17));
        assert_eq!(stored.resolved_at, Some(ts(5, 17)));
        assert_eq!(stored.created_at, ts(1, 8));
    }

    #[tokio::test]
    async fn ticket_reopen_clears_resolution() {
        let store = InMemoryMetricsStore::new();
        store.save_ticket(&ticket("Done", "", Some(ts(5, 17)))).await.unwrap();
        store.save_ticket(&ticket("Reopened", "", None)).await.unwrap();

        let rows = store.tickets(&TicketQuery::default()).await.unwrap();
        assert_eq!(rows[0].resolved_at, None);
    }

    #[tokio::test]
    async fn reads_filter_and_sort_newest_first() {
        let store = InMemoryMetricsStore::new();
        for day in [2, 6, 4] {
            store.save_workflow_run(&run(day, "success", 10)).await.unwrap();
        }
        let mut other = run(5, "failure", 10);
        other.repository = "acme/web".into();
        store.save_workflow_run(&other).await.unwrap();

        let rows = store
            .workflow_runs(&WorkflowRunQuery {
                repository: Some("acme/api".into()),
                since: ts(3, 0),
            })
            .await
            .unwrap();
        let days = rows.iter().map(|r| r.created_at).collect::<Vec<_>>();
        assert_eq!(days, vec![ts(6, 9), ts(4, 9)]);
    }

    #[tokio::test]
    async fn closed_store_rejects_writes() {
        let store = InMemoryMetricsStore::new();
        store.close();
        let err = store.save_workflow_run(&run(1, "success", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Closed));
    }
}
