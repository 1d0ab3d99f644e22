//! Scheduler engine: the poll loop that finds due workflows and fires them.
//! Uses tokio::interval: sleeps between scans, holds no state beyond `running`.
//! Everything else is re-read from the store each tick, so a restart
//! simply finds whatever is overdue.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use flowdeck_core::config::SchedulerConfig;
use flowdeck_core::{FlowError, Result};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::executor::WorkflowExecutor;
use crate::history::{FireOutcome, RunHistory, RunRecord};
use crate::schedule::{LastRun, RunStatus, ScheduleType};
use crate::store::WorkflowStore;
use crate::workflow::{WorkflowDefinition, WorkflowPatch};

/// Result of one scan tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub scanned_at: Option<DateTime<Utc>>,
    /// Ids whose executor run succeeded.
    pub fired: Vec<String>,
    /// Ids whose executor run failed (schedule still advanced).
    pub failed: Vec<String>,
    /// Ids whose schedule could not be updated.
    pub skipped: Vec<String>,
}

impl ScanReport {
    pub fn is_empty(&self) -> bool {
        self.fired.is_empty() && self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Snapshot for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub poll_interval_secs: u64,
    pub max_concurrent: usize,
    pub scans: u64,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub total_fired: u64,
    pub total_failed: u64,
    pub total_skipped: u64,
    pub recent_runs: Vec<RunRecord>,
}

struct LoopState {
    running: bool,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Counters {
    scans: AtomicU64,
    fired: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// The workflow scheduler. Construct once per process and share as `Arc`.
pub struct Scheduler {
    store: Arc<dyn WorkflowStore>,
    executor: Arc<dyn WorkflowExecutor>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    max_concurrent: usize,
    execution_timeout: Duration,
    state: std::sync::Mutex<LoopState>,
    /// Held for the whole of a scan; scans never overlap.
    scan_lock: Mutex<()>,
    last_scan_at: std::sync::Mutex<Option<DateTime<Utc>>>,
    history: std::sync::Mutex<RunHistory>,
    counters: Counters,
    active_loops: AtomicUsize,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        executor: Arc<dyn WorkflowExecutor>,
        clock: Arc<dyn Clock>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            store,
            executor,
            clock,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            max_concurrent: config.max_concurrent.max(1),
            execution_timeout: Duration::from_secs(config.execution_timeout_secs.max(1)),
            state: std::sync::Mutex::new(LoopState {
                running: false,
                stop_tx: None,
                handle: None,
            }),
            scan_lock: Mutex::new(()),
            last_scan_at: std::sync::Mutex::new(None),
            history: std::sync::Mutex::new(RunHistory::new()),
            counters: Counters::default(),
            active_loops: AtomicUsize::new(0),
        }
    }

    /// Override the poll cadence (sub-second cadences are for tests).
    pub fn with_poll_interval(mut self, every: Duration) -> Self {
        self.poll_interval = every;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    fn loop_state(&self) -> std::sync::MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the poll loop. Returns `false` if it was already running or no
    /// tokio runtime is available.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut state = self.loop_state();
        if state.running {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("⚠️ Scheduler not started: no async runtime on this thread");
            return false;
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let this = Arc::clone(self);
        state.handle = Some(runtime.spawn(async move { this.run_loop(stop_rx).await }));
        state.stop_tx = Some(stop_tx);
        state.running = true;
        tracing::info!(
            "⏰ Workflow scheduler started (check every {}s)",
            self.poll_interval.as_secs_f64()
        );
        true
    }

    /// Stop after the in-flight scan, if any. Returns `false` if not running.
    pub fn stop(&self) -> bool {
        let mut state = self.loop_state();
        if !state.running {
            return false;
        }
        if let Some(tx) = state.stop_tx.take() {
            let _ = tx.send(true);
        }
        // The loop exits on its own; in-flight executions run to completion.
        state.handle.take();
        state.running = false;
        tracing::info!("⏹️ Workflow scheduler stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.loop_state().running
    }

    /// Number of poll loops currently alive (0 or 1 outside of a stop/start handover).
    pub fn active_loops(&self) -> usize {
        self.active_loops.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.is_running(),
            poll_interval_secs: self.poll_interval.as_secs(),
            max_concurrent: self.max_concurrent,
            scans: self.counters.scans.load(Ordering::Relaxed),
            last_scan_at: *self.last_scan_at.lock().unwrap_or_else(|e| e.into_inner()),
            total_fired: self.counters.fired.load(Ordering::Relaxed),
            total_failed: self.counters.failed.load(Ordering::Relaxed),
            total_skipped: self.counters.skipped.load(Ordering::Relaxed),
            recent_runs: self
                .history
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .recent(20),
        }
    }

    async fn run_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        self.active_loops.fetch_add(1, Ordering::SeqCst);
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                    match self.scan().await {
                        Ok(report) if !report.is_empty() => tracing::info!(
                            "🔔 Scan: {} fired, {} failed, {} skipped",
                            report.fired.len(),
                            report.failed.len(),
                            report.skipped.len()
                        ),
                        Ok(_) => {}
                        Err(e) => tracing::warn!("⚠️ Scan failed, retrying next tick: {e}"),
                    }
                }
            }
        }

        self.active_loops.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!("⏰ Scheduler loop exited");
    }

    /// Run one scan tick: load due workflows, execute them, update schedules.
    ///
    /// Only a failing `list_due` fails the scan; per-workflow problems are
    /// reported in the [`ScanReport`].
    pub async fn scan(&self) -> Result<ScanReport> {
        let _guard = self.scan_lock.lock().await;
        let now = self.clock.now();
        self.counters.scans.fetch_add(1, Ordering::Relaxed);
        *self.last_scan_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(now);

        let due = self.store.list_due(now).await?;
        let mut report = ScanReport {
            scanned_at: Some(now),
            ..ScanReport::default()
        };
        if due.is_empty() {
            return Ok(report);
        }
        tracing::debug!("🔎 {} workflow(s) due at {}", due.len(), now.to_rfc3339());

        let outcomes: Vec<(String, FireOutcome)> = futures::stream::iter(due)
            .map(move |wf| async move {
                let id = wf.id.clone();
                (id, self.fire(wf, now).await)
            })
            .buffered(self.max_concurrent)
            .collect()
            .await;

        for (id, outcome) in outcomes {
            match outcome {
                FireOutcome::Fired => report.fired.push(id),
                FireOutcome::Failed(_) => report.failed.push(id),
                FireOutcome::Skipped(_) => report.skipped.push(id),
            }
        }
        Ok(report)
    }

    /// Execute one due workflow and write back its schedule.
    async fn fire(&self, wf: WorkflowDefinition, now: DateTime<Utc>) -> FireOutcome {
        tracing::info!(
            "🔔 Workflow triggered: '{}' ({}, {})",
            wf.name,
            wf.id,
            wf.schedule.schedule_type
        );
        let started = Instant::now();

        // Spawned so a timeout only stops waiting; the run itself is not cancelled.
        let executor = Arc::clone(&self.executor);
        let job = wf.clone();
        let run = tokio::spawn(async move { executor.run(&job).await });
        let result = match tokio::time::timeout(self.execution_timeout, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(FlowError::Executor(format!("executor task aborted: {e}"))),
            Err(_) => {
                tracing::warn!(
                    "⏱️ Workflow '{}' ({}) still running after {:?}, recording failure",
                    wf.name,
                    wf.id,
                    self.execution_timeout
                );
                Err(FlowError::Executor(format!(
                    "timed out after {}s",
                    self.execution_timeout.as_secs()
                )))
            }
        };

        let last_run = match &result {
            Ok(()) => LastRun {
                status: RunStatus::Succeeded,
                at: now,
                message: None,
            },
            Err(e) => {
                tracing::warn!("⚠️ Workflow '{}' ({}) failed: {e}", wf.name, wf.id);
                LastRun {
                    status: RunStatus::Failed,
                    at: now,
                    message: Some(e.to_string()),
                }
            }
        };

        // Deferred: terminal after one firing, success or not.
        // Recurring: advance the window so failures retry next interval.
        let mut patch = WorkflowPatch::default().fired_at(now).last_run(last_run);
        if wf.schedule.schedule_type == ScheduleType::Deferred {
            patch = patch.enabled(false);
        }

        let outcome = match self.store.update(&wf.id, patch).await {
            Ok(_) => match result {
                Ok(()) => FireOutcome::Fired,
                Err(e) => FireOutcome::Failed(e.to_string()),
            },
            Err(FlowError::NotFound(_)) => {
                tracing::warn!("⚠️ Workflow {} deleted during scan, skipping", wf.id);
                FireOutcome::Skipped("workflow deleted".into())
            }
            Err(e) => {
                tracing::warn!("⚠️ Failed to update schedule for {}: {e}", wf.id);
                FireOutcome::Skipped(e.to_string())
            }
        };

        let counter = match &outcome {
            FireOutcome::Fired => &self.counters.fired,
            FireOutcome::Failed(_) => &self.counters.failed,
            FireOutcome::Skipped(_) => &self.counters.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(RunRecord {
                workflow_id: wf.id,
                workflow_name: wf.name,
                schedule_type: wf.schedule.schedule_type,
                outcome: outcome.clone(),
                started_at: now,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        outcome
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::persistence::SqliteWorkflowStore;
    use crate::schedule::ScheduleDescriptor;
    use crate::store::FileWorkflowStore;
    use crate::workflow::{NewWorkflow, WorkflowGraph, WorkflowNode};
    use async_trait::async_trait;
    use chrono::{TimeDelta, TimeZone};
    use std::collections::HashMap;
    use std::path::PathBuf;

    pub(crate) fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    /// Counts runs per workflow name; names in `failing` report failure.
    #[derive(Default)]
    pub(crate) struct CountingExecutor {
        pub runs: std::sync::Mutex<HashMap<String, usize>>,
        pub failing: Vec<String>,
    }

    impl CountingExecutor {
        pub(crate) fn count(&self, name: &str) -> usize {
            self.runs.lock().unwrap().get(name).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl WorkflowExecutor for CountingExecutor {
        async fn run(&self, wf: &WorkflowDefinition) -> Result<()> {
            *self.runs.lock().unwrap().entry(wf.name.clone()).or_default() += 1;
            if self.failing.contains(&wf.name) {
                return Err(FlowError::Executor("node 'write' failed".into()));
            }
            Ok(())
        }
    }

    /// Deletes a named workflow from the store while it is executing.
    struct DeletingExecutor {
        store: Arc<dyn WorkflowStore>,
        victim: String,
        inner: CountingExecutor,
    }

    #[async_trait]
    impl WorkflowExecutor for DeletingExecutor {
        async fn run(&self, wf: &WorkflowDefinition) -> Result<()> {
            if wf.name == self.victim {
                self.store.delete(&wf.id).await?;
            }
            self.inner.run(wf).await
        }
    }

    /// Never finishes within the test timeout.
    struct HangingExecutor;

    #[async_trait]
    impl WorkflowExecutor for HangingExecutor {
        async fn run(&self, _wf: &WorkflowDefinition) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    /// Sleeps per workflow, tracking how many runs overlap.
    #[derive(Default)]
    struct GaugeExecutor {
        delays_ms: HashMap<String, u64>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        finished: AtomicUsize,
    }

    impl GaugeExecutor {
        fn with_delays(delays: &[(&str, u64)]) -> Self {
            Self {
                delays_ms: delays.iter().map(|(n, d)| (n.to_string(), *d)).collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl WorkflowExecutor for GaugeExecutor {
        async fn run(&self, wf: &WorkflowDefinition) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let delay = self.delays_ms.get(&wf.name).copied().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub(crate) fn new_wf(name: &str, schedule: ScheduleDescriptor) -> NewWorkflow {
        NewWorkflow::new(name, WorkflowGraph::new(vec![WorkflowNode::new("n1")], vec![]))
            .with_schedule(schedule)
    }

    fn setup(
        executor: Arc<dyn WorkflowExecutor>,
    ) -> (Scheduler, Arc<dyn WorkflowStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let store: Arc<dyn WorkflowStore> = Arc::new(
            SqliteWorkflowStore::open(&PathBuf::from(":memory:"), clock.clone()).unwrap(),
        );
        let scheduler = Scheduler::new(store.clone(), executor, clock.clone(), &SchedulerConfig::default());
        (scheduler, store, clock)
    }

    #[tokio::test]
    async fn test_deferred_fires_once_then_disables() {
        let exec = Arc::new(CountingExecutor::default());
        let (scheduler, store, clock) = setup(exec.clone());
        let w1 = store
            .create(new_wf("W1", ScheduleDescriptor::deferred(t0() + TimeDelta::seconds(5))))
            .await
            .unwrap();

        clock.advance(TimeDelta::seconds(6));
        let report = scheduler.scan().await.unwrap();
        assert_eq!(report.fired, vec![w1.id.clone()]);
        assert_eq!(exec.count("W1"), 1);

        let after = store.get(&w1.id).await.unwrap();
        assert!(!after.schedule.enabled);
        assert_eq!(after.schedule.last_run.as_ref().map(|r| r.status), Some(RunStatus::Succeeded));

        for _ in 0..3 {
            clock.advance(TimeDelta::hours(1));
            assert!(store.list_due(clock.now()).await.unwrap().is_empty());
            scheduler.scan().await.unwrap();
        }
        assert_eq!(exec.count("W1"), 1);
    }

    #[tokio::test]
    async fn test_recurring_fires_on_interval_boundaries() {
        let exec = Arc::new(CountingExecutor::default());
        let (scheduler, store, clock) = setup(exec.clone());
        let w2 = store
            .create(new_wf("W2", ScheduleDescriptor::recurring(60)))
            .await
            .unwrap();

        let mut fired_at = Vec::new();
        for t in [0, 30, 60, 90, 120] {
            clock.set(t0() + TimeDelta::seconds(t));
            let report = scheduler.scan().await.unwrap();
            if report.fired.contains(&w2.id) {
                fired_at.push(t);
            }
        }
        assert_eq!(fired_at, vec![60, 120]);
        assert_eq!(exec.count("W2"), 2);
        let after = store.get(&w2.id).await.unwrap();
        assert!(after.schedule.enabled);
        assert_eq!(after.schedule.last_fired_at, Some(t0() + TimeDelta::seconds(120)));
    }

    #[tokio::test]
    async fn test_none_never_fires() {
        let exec = Arc::new(CountingExecutor::default());
        let (scheduler, store, clock) = setup(exec.clone());
        let mut sched = ScheduleDescriptor::none();
        sched.enabled = true;
        store.create(new_wf("W3", sched)).await.unwrap();

        for _ in 0..5 {
            clock.advance(TimeDelta::days(1));
            assert!(scheduler.scan().await.unwrap().is_empty());
        }
        assert_eq!(exec.count("W3"), 0);
    }

    #[tokio::test]
    async fn test_deleted_mid_scan_is_skipped() {
        let clock = Arc::new(ManualClock::new(t0()));
        let store: Arc<dyn WorkflowStore> = Arc::new(
            SqliteWorkflowStore::open(&PathBuf::from(":memory:"), clock.clone()).unwrap(),
        );
        let exec = Arc::new(DeletingExecutor {
            store: store.clone(),
            victim: "W1".into(),
            inner: CountingExecutor::default(),
        });
        let scheduler = Scheduler::new(store.clone(), exec.clone(), clock.clone(), &SchedulerConfig::default());

        let w1 = store.create(new_wf("W1", ScheduleDescriptor::deferred(t0()))).await.unwrap();
        let w2 = store.create(new_wf("W2", ScheduleDescriptor::deferred(t0()))).await.unwrap();

        clock.advance(TimeDelta::seconds(1));
        let report = scheduler.scan().await.unwrap();
        assert_eq!(report.skipped, vec![w1.id.clone()]);
        assert_eq!(report.fired, vec![w2.id.clone()]);
        assert_eq!(exec.inner.count("W2"), 1);
        assert!(store.get(&w1.id).await.unwrap_err().is_not_found());
        assert!(!store.get(&w2.id).await.unwrap().schedule.enabled);
        assert_eq!(scheduler.status().total_skipped, 1);
    }

    #[tokio::test]
    async fn test_failures_are_recorded_and_advance() {
        let exec = Arc::new(CountingExecutor {
            failing: vec!["broken-once".into(), "broken-every".into()],
            ..CountingExecutor::default()
        });
        let (scheduler, store, clock) = setup(exec.clone());
        let once = store
            .create(new_wf("broken-once", ScheduleDescriptor::deferred(t0())))
            .await
            .unwrap();
        let every = store
            .create(new_wf("broken-every", ScheduleDescriptor::recurring(60)))
            .await
            .unwrap();
        let healthy = store
            .create(new_wf("healthy", ScheduleDescriptor::recurring(60)))
            .await
            .unwrap();

        clock.advance(TimeDelta::seconds(60));
        let report = scheduler.scan().await.unwrap();
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.fired, vec![healthy.id.clone()]);

        let once = store.get(&once.id).await.unwrap();
        assert!(!once.schedule.enabled);
        let last = once.schedule.last_run.unwrap();
        assert_eq!(last.status, RunStatus::Failed);
        assert!(last.message.unwrap().contains("node 'write' failed"));

        let every_after = store.get(&every.id).await.unwrap();
        assert!(every_after.schedule.enabled);
        assert_eq!(every_after.schedule.last_fired_at, Some(clock.now()));

        // Not retried on the very next tick, only after the interval.
        clock.advance(TimeDelta::seconds(30));
        scheduler.scan().await.unwrap();
        assert_eq!(exec.count("broken-every"), 1);
        clock.advance(TimeDelta::seconds(30));
        scheduler.scan().await.unwrap();
        assert_eq!(exec.count("broken-every"), 2);
        assert_eq!(exec.count("broken-once"), 1);

        let status = scheduler.status();
        assert_eq!(status.total_failed, 3);
        assert!(!status.recent_runs.is_empty());
    }

    #[tokio::test]
    async fn test_execution_timeout_counts_as_failure() {
        let (scheduler, store, clock) = setup(Arc::new(HangingExecutor));
        let scheduler = Arc::new(
            scheduler.with_execution_timeout(Duration::from_millis(50)),
        );
        let wf = store
            .create(new_wf("slow", ScheduleDescriptor::deferred(t0())))
            .await
            .unwrap();
        clock.advance(TimeDelta::seconds(1));

        let report = scheduler.scan().await.unwrap();
        assert_eq!(report.failed, vec![wf.id.clone()]);
        let after = store.get(&wf.id).await.unwrap();
        assert!(!after.schedule.enabled);
        assert!(after.schedule.last_run.unwrap().message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let exec = Arc::new(CountingExecutor::default());
        let (scheduler, store, clock) = setup(exec.clone());
        let scheduler = Arc::new(
            scheduler.with_poll_interval(Duration::from_millis(20)),
        );
        store
            .create(new_wf("tick", ScheduleDescriptor::recurring(60)))
            .await
            .unwrap();
        clock.advance(TimeDelta::seconds(60));

        assert!(scheduler.start());
        assert!(!scheduler.start());
        assert!(scheduler.is_running());
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(scheduler.active_loops(), 1);
        // The clock is frozen, so one due cycle means exactly one firing.
        assert_eq!(exec.count("tick"), 1);
        assert!(scheduler.status().scans >= 2);

        assert!(scheduler.stop());
        assert!(!scheduler.stop());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(scheduler.active_loops(), 0);
        assert!(!scheduler.is_running());

        let scans = scheduler.status().scans;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(scheduler.status().scans, scans);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let exec = Arc::new(CountingExecutor::default());
        let (scheduler, _store, _clock) = setup(exec);
        let scheduler = Arc::new(
            scheduler.with_poll_interval(Duration::from_millis(20)),
        );
        assert!(scheduler.start());
        assert!(scheduler.stop());
        assert!(scheduler.start());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(scheduler.active_loops(), 1);
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_stop_during_scan_prevents_next_scan() {
        for _ in 0..5 {
            let exec = Arc::new(GaugeExecutor::with_delays(&[("slow", 100)]));
            let (scheduler, store, clock) = setup(exec.clone());
            let scheduler = Arc::new(
                scheduler.with_poll_interval(Duration::from_millis(20)),
            );
            store
                .create(new_wf("slow", ScheduleDescriptor::recurring(60)))
                .await
                .unwrap();
            clock.advance(TimeDelta::seconds(60));

            scheduler.start();
            tokio::time::sleep(Duration::from_millis(40)).await;
            assert_eq!(exec.in_flight.load(Ordering::SeqCst), 1);
            assert!(scheduler.stop());

            tokio::time::sleep(Duration::from_millis(200)).await;
            assert_eq!(exec.finished.load(Ordering::SeqCst), 1);
            assert_eq!(scheduler.status().scans, 1);
            assert_eq!(scheduler.active_loops(), 0);
        }
    }

    #[tokio::test]
    async fn test_scan_runs_due_workflows_concurrently_in_order() {
        let exec = Arc::new(GaugeExecutor::with_delays(&[
            ("first", 120),
            ("second", 60),
            ("third", 20),
        ]));
        let clock = Arc::new(ManualClock::new(t0()));
        let store: Arc<dyn WorkflowStore> = Arc::new(
            SqliteWorkflowStore::open(&PathBuf::from(":memory:"), clock.clone()).unwrap(),
        );
        let config = SchedulerConfig {
            max_concurrent: 2,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(store.clone(), exec.clone(), clock.clone(), &config);

        let mut ids = Vec::new();
        for (i, name) in ["first", "second", "third"].into_iter().enumerate() {
            let at = t0() + TimeDelta::seconds(i as i64);
            let wf = store.create(new_wf(name, ScheduleDescriptor::deferred(at))).await.unwrap();
            ids.push(wf.id);
        }
        clock.advance(TimeDelta::seconds(10));

        let started = Instant::now();
        let report = scheduler.scan().await.unwrap();
        let elapsed = started.elapsed();

        // "first" finishes last but is still reported first.
        assert_eq!(report.fired, ids);
        assert_eq!(exec.peak.load(Ordering::SeqCst), 2);
        assert!(elapsed < Duration::from_millis(190), "runs did not overlap: {elapsed:?}");
        assert_eq!(scheduler.status().total_fired, 3);
    }

    #[tokio::test]
    async fn test_timed_out_run_keeps_going() {
        let exec = Arc::new(GaugeExecutor::with_delays(&[("overrun", 100)]));
        let (scheduler, store, clock) = setup(exec.clone());
        let scheduler = scheduler.with_execution_timeout(Duration::from_millis(20));
        let wf = store
            .create(new_wf("overrun", ScheduleDescriptor::deferred(t0())))
            .await
            .unwrap();
        clock.advance(TimeDelta::seconds(1));

        let report = scheduler.scan().await.unwrap();
        assert_eq!(report.failed, vec![wf.id.clone()]);
        assert_eq!(exec.finished.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(exec.finished.load(Ordering::SeqCst), 1);
        assert!(!store.get(&wf.id).await.unwrap().schedule.enabled);
    }

    #[tokio::test]
    async fn test_hand_edited_record_fires_once() {
        let dir = std::env::temp_dir()
            .join(format!("flowdeck-engine-{}", uuid::Uuid::new_v4().simple()));
        let clock = Arc::new(ManualClock::new(t0()));
        let files = FileWorkflowStore::new(&dir, clock.clone()).unwrap();
        let created = files
            .create(new_wf("legacy", ScheduleDescriptor::deferred(t0())))
            .await
            .unwrap();

        // Blank name and an id that disagrees with the file name.
        let path = dir.join(format!("{}.json", created.id));
        let mut raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        raw["name"] = serde_json::json!("");
        raw["id"] = serde_json::json!("workflow-renamed");
        std::fs::write(&path, raw.to_string()).unwrap();

        let store: Arc<dyn WorkflowStore> = Arc::new(files);
        let exec = Arc::new(CountingExecutor::default());
        let scheduler = Scheduler::new(store.clone(), exec.clone(), clock.clone(), &SchedulerConfig::default());

        let first = scheduler.scan().await.unwrap();
        assert_eq!(first.fired, vec![created.id.clone()]);
        for _ in 0..3 {
            clock.advance(TimeDelta::seconds(30));
            assert!(scheduler.scan().await.unwrap().is_empty());
        }
        assert_eq!(exec.count(""), 1);

        let after = store.get(&created.id).await.unwrap();
        assert_eq!(after.id, created.id);
        assert!(!after.schedule.enabled);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_start_without_runtime_is_noop() {
        let (scheduler, _store, _clock) = setup(Arc::new(CountingExecutor::default()));
        let scheduler = Arc::new(scheduler);
        assert!(!scheduler.start());
        assert!(!scheduler.is_running());
    }

    struct DownStore;

    #[async_trait]
    impl WorkflowStore for DownStore {
        async fn create(&self, _new: NewWorkflow) -> Result<WorkflowDefinition> {
            Err(FlowError::StoreUnavailable("down".into()))
        }
        async fn get(&self, _id: &str) -> Result<WorkflowDefinition> {
            Err(FlowError::StoreUnavailable("down".into()))
        }
        async fn list(&self) -> Result<Vec<crate::workflow::WorkflowSummary>> {
            Err(FlowError::StoreUnavailable("down".into()))
        }
        async fn update(&self, _id: &str, _patch: WorkflowPatch) -> Result<WorkflowDefinition> {
            Err(FlowError::StoreUnavailable("down".into()))
        }
        async fn delete(&self, _id: &str) -> Result<()> {
            Err(FlowError::StoreUnavailable("down".into()))
        }
        async fn list_due(&self, _now: DateTime<Utc>) -> Result<Vec<WorkflowDefinition>> {
            Err(FlowError::StoreUnavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_store_unavailable_fails_tick_not_loop() {
        let scheduler = Arc::new(
            Scheduler::new(
                Arc::new(DownStore),
                Arc::new(CountingExecutor::default()),
                Arc::new(ManualClock::new(t0())),
                &SchedulerConfig::default(),
            )
            .with_poll_interval(Duration::from_millis(20)),
        );
        assert!(matches!(
            scheduler.scan().await,
            Err(FlowError::StoreUnavailable(_))
        ));

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(scheduler.is_running());
        assert_eq!(scheduler.active_loops(), 1);
        assert!(scheduler.status().scans >= 3);
        scheduler.stop();
    }
}
