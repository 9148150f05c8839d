use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::collector::{CycleSummary, MetricsCollector};

/// Anything the scheduler can drive once per tick.
#[async_trait]
pub trait CollectionCycle: Send + Sync {
    async fn run_cycle(&self) -> CycleSummary;
}

#[async_trait]
impl CollectionCycle for MetricsCollector {
    async fn run_cycle(&self) -> CycleSummary {
        MetricsCollector::run_cycle(self).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    /// A cycle is in flight.
    Busy,
}

#[derive(Debug)]
pub enum TriggerOutcome {
    Completed(CycleSummary),
    /// Another cycle held the guard.
    Skipped,
}

/// At most one collection cycle runs at a time.
#[derive(Debug, Default)]
pub struct CycleGuard {
    running: AtomicBool,
}

impl CycleGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn try_begin(self: &Arc<Self>) -> Option<CyclePermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CyclePermit {
                guard: Arc::clone(self),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Releases the guard on drop.
#[derive(Debug)]
pub struct CyclePermit {
    guard: Arc<CycleGuard>,
}

impl Drop for CyclePermit {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

/// Accepts the five-field cron dialect by prepending a zero seconds field.
pub fn cron_with_seconds(cadence: &str) -> String {
    let cadence = cadence.trim();
    if cadence.split_whitespace().count() == 5 {
        format!("0 {cadence}")
    } else {
        cadence.to_string()
    }
}

async fn run_guarded(cycle: &dyn CollectionCycle, guard: &Arc<CycleGuard>) -> TriggerOutcome {
    let Some(_permit) = guard.try_begin() else {
        warn!("previous collection cycle still running; skipping trigger");
        return TriggerOutcome::Skipped;
    };
    TriggerOutcome::Completed(cycle.run_cycle().await)
}

pub struct CollectionScheduler {
    cadence: String,
    cycle: Arc<dyn CollectionCycle>,
    guard: Arc<CycleGuard>,
    jobs: Mutex<Option<JobScheduler>>,
}

impl CollectionScheduler {
    pub fn new(cadence: impl Into<String>, cycle: Arc<dyn CollectionCycle>) -> Self {
        Self {
            cadence: cadence.into(),
            cycle,
            guard: CycleGuard::new(),
            jobs: Mutex::new(None),
        }
    }

    /// Registers the cron job and kicks off one cycle immediately. An empty cadence
    /// leaves the scheduler idle.
    pub async fn start(&self) -> Result<SchedulerState> {
        let mut jobs = self.jobs.lock().await;
        if jobs.is_some() {
            return Ok(self.state_with(true));
        }
        if self.cadence.trim().is_empty() {
            info!("no collection schedule configured; scheduled collection disabled");
            return Ok(SchedulerState::Idle);
        }

        let cron = cron_with_seconds(&self.cadence);
        let cycle = Arc::clone(&self.cycle);
        let guard = Arc::clone(&self.guard);
        let job = Job::new_async(&cron, move |_uuid, _l| {
            let cycle = Arc::clone(&cycle);
            let guard = Arc::clone(&guard);
            Box::pin(async move {
                info!("scheduled collection triggered");
                run_guarded(cycle.as_ref(), &guard).await;
            })
        })
        .with_context(|| format!("creating collection job for cron {:?}", self.cadence))?;

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        sched.add(job).await.context("adding collection job")?;
        sched.start().await.context("starting scheduler")?;
        info!(cadence = %self.cadence, "collection scheduler started");
        *jobs = Some(sched);

        let cycle = Arc::clone(&self.cycle);
        let guard = Arc::clone(&self.guard);
        tokio::spawn(async move {
            run_guarded(cycle.as_ref(), &guard).await;
        });

        Ok(SchedulerState::Running)
    }

    /// Stops future ticks. A cycle already in flight runs to completion.
    pub async fn stop(&self) -> Result<()> {
        if let Some(mut sched) = self.jobs.lock().await.take() {
            sched.shutdown().await.context("stopping scheduler")?;
            info!("collection scheduler stopped");
        }
        Ok(())
    }

    pub async fn state(&self) -> SchedulerState {
        let scheduled = self.jobs.lock().await.is_some();
        self.state_with(scheduled)
    }

    /// Runs one cycle now unless another is in flight.
    pub async fn trigger(&self) -> TriggerOutcome {
        run_guarded(self.cycle.as_ref(), &self.guard).await
    }

    fn state_with(&self, scheduled: bool) -> SchedulerState {
        if self.guard.is_running() {
            SchedulerState::Busy
        } else if scheduled {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;
    use uuid::Uuid;

    #[derive(Default)]
    struct CountingCycle {
        runs: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl CollectionCycle for CountingCycle {
        async fn run_cycle(&self) -> CycleSummary {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.runs.fetch_add(1, Ordering::SeqCst);
            let now = Utc::now();
            CycleSummary {
                cycle_id: Uuid::new_v4(),
                started_at: now,
                finished_at: now,
                sources: Vec::new(),
            }
        }
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..100 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn five_field_cron_gains_seconds() {
        assert_eq!(cron_with_seconds("0 */6 * * *"), "0 0 */6 * * *");
        assert_eq!(cron_with_seconds(" 30 0 */6 * * * "), "30 0 */6 * * *");
    }

    #[test]
    fn permit_releases_guard_on_drop() {
        let guard = CycleGuard::new();
        let permit = guard.try_begin().expect("first permit");
        assert!(guard.try_begin().is_none());
        drop(permit);
        assert!(guard.try_begin().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_runs_one_cycle_immediately() {
        let cycle = Arc::new(CountingCycle::default());
        let scheduler = CollectionScheduler::new("0 0 1 1 *", cycle.clone());

        assert_eq!(scheduler.start().await.unwrap(), SchedulerState::Running);
        wait_for(|| cycle.runs.load(Ordering::SeqCst) == 1).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 1);

        scheduler.stop().await.unwrap();
        assert_eq!(scheduler.state().await, SchedulerState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_cadence_never_runs() {
        let cycle = Arc::new(CountingCycle::default());
        let scheduler = CollectionScheduler::new("", cycle.clone());

        assert_eq!(scheduler.start().await.unwrap(), SchedulerState::Idle);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.state().await, SchedulerState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invalid_cadence_is_an_error() {
        let scheduler = CollectionScheduler::new("every six hours", Arc::new(CountingCycle::default()));
        assert!(scheduler.start().await.is_err());
        assert_eq!(scheduler.state().await, SchedulerState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn trigger_while_busy_is_skipped() {
        let gate = Arc::new(Notify::new());
        let cycle = Arc::new(CountingCycle {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let scheduler = Arc::new(CollectionScheduler::new("", cycle.clone()));

        let first = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.trigger().await }
        });
        wait_for(|| scheduler.guard.is_running()).await;
        assert_eq!(scheduler.state().await, SchedulerState::Busy);

        assert!(matches!(scheduler.trigger().await, TriggerOutcome::Skipped));

        gate.notify_one();
        assert!(matches!(first.await.unwrap(), TriggerOutcome::Completed(_)));
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state().await, SchedulerState::Idle);
    }
}
