//! Background job scheduler
//!
//! A registry of named interval jobs driven by a single tick loop. Each job
//! has its own run guard, so a job never runs twice at once whether it was
//! started by the loop or triggered by hand. Job state (enabled flag, last
//! and next run) is persisted in the `scheduled_tasks` table and survives
//! restarts.

pub mod jobs;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{EternalError, Result};
use crate::memory::types::{JobType, ScheduledTask};
use crate::storage::LanceStore;

pub use jobs::{
    DAILY_REFLECTIONS, JobContext, MONTHLY_SUMMARIES, WEEKLY_SUMMARIES, builtin_tasks, handler_for,
};

/// Body of a job: produces a fresh future for every run
pub type JobHandler = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct JobEntry {
    task: ScheduledTask,
    handler: JobHandler,
    guard: Arc<Mutex<()>>,
}

/// Snapshot of a registered job
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub name: String,
    pub job_type: JobType,
    pub interval_seconds: u64,
    pub enabled: bool,
    pub is_system: bool,
    pub running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    store: Arc<LanceStore>,
    jobs: DashMap<String, JobEntry>,
    tick: Duration,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(store: Arc<LanceStore>, tick: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            jobs: DashMap::new(),
            tick,
            shutdown,
            handle: Mutex::new(None),
        }
    }

    /// Register a job and persist its task row.
    ///
    /// A task already stored under the same name keeps its id, enabled flag
    /// and run history; the interval and kind come from `task`. A custom
    /// job may not take the name of a system job.
    pub async fn register(&self, mut task: ScheduledTask, handler: JobHandler) -> Result<()> {
        if task.interval().is_none() {
            return Err(EternalError::Scheduler(format!(
                "Interval of {}s for job '{}' is out of range",
                task.interval_seconds, task.name
            )));
        }

        let registered_system = self
            .jobs
            .get(&task.name)
            .is_some_and(|entry| entry.task.is_system);
        let saved = self.store.get_task(&task.name).await?;
        let saved_system = saved.as_ref().is_some_and(|saved| saved.is_system);
        if !task.is_system && (registered_system || saved_system) {
            return Err(EternalError::Scheduler(format!(
                "'{}' is a system job name",
                task.name
            )));
        }

        if let Some(saved) = saved {
            task.id = saved.id;
            task.enabled = saved.enabled;
            task.last_run = saved.last_run;
            task.next_run = saved.next_run;
        }
        self.store.upsert_task(&task).await?;

        info!(
            "Scheduled job '{}' ({}) every {}s",
            task.name, task.job_type, task.interval_seconds
        );
        self.jobs.insert(
            task.name.clone(),
            JobEntry {
                task,
                handler,
                guard: Arc::new(Mutex::new(())),
            },
        );
        Ok(())
    }

    /// Re-register custom jobs stored by an earlier run.
    ///
    /// Rows whose job type has no built-in body are skipped.
    pub async fn load_custom_tasks(&self, ctx: &Arc<JobContext>) -> Result<usize> {
        let mut loaded = 0;
        for task in self.store.list_tasks().await? {
            if task.is_system || self.jobs.contains_key(&task.name) {
                continue;
            }
            let Some(handler) = handler_for(task.job_type, ctx.clone()) else {
                warn!("No handler for stored job '{}' ({}), skipping", task.name, task.job_type);
                continue;
            };
            self.register(task, handler).await?;
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Remove a custom job. Returns false when no such job exists.
    pub async fn remove(&self, name: &str) -> Result<bool> {
        let is_system = match self.jobs.get(name) {
            Some(entry) => entry.task.is_system,
            None => return Ok(false),
        };
        if is_system {
            return Err(EternalError::Scheduler(format!(
                "Cannot remove system job '{name}'"
            )));
        }

        self.jobs.remove(name);
        self.store.delete_task(name).await?;
        info!("Removed job: {}", name);
        Ok(true)
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let task = {
            let mut entry = self
                .jobs
                .get_mut(name)
                .ok_or_else(|| EternalError::Scheduler(format!("Unknown job '{name}'")))?;
            entry.task.enabled = enabled;
            entry.task.clone()
        };
        self.store.upsert_task(&task).await?;
        info!("Job '{}' {}", name, if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    pub fn job(&self, name: &str) -> Option<JobInfo> {
        self.jobs.get(name).map(|entry| job_info(&entry))
    }

    /// All registered jobs, by name
    pub fn jobs(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<JobInfo> = self.jobs.iter().map(|entry| job_info(&entry)).collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }

    /// Run a job now, ignoring its interval.
    ///
    /// Disabled jobs are refused, and so is a job whose previous run is
    /// still in flight. The job's own error is returned after being
    /// recorded.
    pub async fn trigger(&self, name: &str) -> Result<()> {
        let (handler, guard, enabled) = {
            let entry = self
                .jobs
                .get(name)
                .ok_or_else(|| EternalError::Scheduler(format!("Unknown job '{name}'")))?;
            (entry.handler.clone(), entry.guard.clone(), entry.task.enabled)
        };
        if !enabled {
            return Err(EternalError::Scheduler(format!("Job '{name}' is disabled")));
        }
        let Ok(_running) = guard.try_lock() else {
            return Err(EternalError::Scheduler(format!(
                "Job '{name}' is already running"
            )));
        };

        info!("Manually triggering job: {}", name);
        let result = handler().await;
        self.finish(name, &result).await;
        result
    }

    /// Start the tick loop. Calling this on a running scheduler does nothing.
    pub async fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }
        self.shutdown.send_replace(false);
        let shutdown = self.shutdown.subscribe();
        *handle = Some(tokio::spawn(Arc::clone(self).run_loop(shutdown)));
        info!("Scheduler started with {} jobs", self.jobs.len());
    }

    /// Stop ticking and wait for in-flight runs to finish
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Scheduler loop ended abnormally: {}", e);
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut running = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => self.spawn_due(&mut running),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
            while running.try_join_next().is_some() {}
        }

        while running.join_next().await.is_some() {}
        info!("Scheduler stopped");
    }

    fn spawn_due(self: &Arc<Self>, running: &mut JoinSet<()>) {
        let now = Utc::now();
        let due: Vec<(String, JobHandler, Arc<Mutex<()>>)> = self
            .jobs
            .iter()
            .filter(|entry| entry.task.enabled && entry.task.is_due(now))
            .map(|entry| (entry.key().clone(), entry.handler.clone(), entry.guard.clone()))
            .collect();

        for (name, handler, guard) in due {
            let Ok(permit) = guard.try_lock_owned() else {
                debug!("Job '{}' still running, skipping tick", name);
                continue;
            };
            let scheduler = Arc::clone(self);
            running.spawn(async move {
                let _permit = permit;
                info!("Running job: {}", name);
                let result = handler().await;
                scheduler.finish(&name, &result).await;
            });
        }
    }

    /// Record a finished run, successful or not, so a failing job waits a
    /// full interval before its next attempt
    async fn finish(&self, name: &str, result: &Result<()>) {
        match result {
            Ok(()) => info!("Job finished: {}", name),
            Err(e) => error!(job = name, "Job '{}' failed: {}", name, e),
        }

        let task = match self.jobs.get_mut(name) {
            Some(mut entry) => {
                entry.task.mark_run(Utc::now());
                entry.task.clone()
            }
            None => return,
        };
        if let Err(e) = self.store.upsert_task(&task).await {
            warn!("Failed to persist run of job '{}': {}", name, e);
        }
    }
}

fn job_info(entry: &JobEntry) -> JobInfo {
    JobInfo {
        name: entry.task.name.clone(),
        job_type: entry.task.job_type,
        interval_seconds: entry.task.interval_seconds,
        enabled: entry.task.enabled,
        is_system: entry.task.is_system,
        running: entry.guard.try_lock().is_err(),
        last_run: entry.task.last_run,
        next_run: entry.task.next_run,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::sync::Notify;

    async fn scheduler() -> (TempDir, Arc<Scheduler>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LanceStore::open(dir.path(), 8).await.unwrap());
        (dir, Arc::new(Scheduler::new(store, Duration::from_millis(20))))
    }

    fn counting(counter: Arc<AtomicUsize>) -> JobHandler {
        Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), EternalError>(())
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_trigger_updates_last_run() {
        let (_dir, scheduler) = scheduler().await;
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(
                ScheduledTask::new("count", JobType::Custom, 3600, false),
                counting(runs.clone()),
            )
            .await
            .unwrap();

        scheduler.trigger("count").await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let info = scheduler.job("count").unwrap();
        assert!(info.last_run.is_some());
        assert!(!info.running);
        let stored = scheduler.store.get_task("count").await.unwrap().unwrap();
        assert!(stored.last_run.is_some());
    }

    #[tokio::test]
    async fn test_trigger_respects_enabled_flag() {
        let (_dir, scheduler) = scheduler().await;
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(
                ScheduledTask::new("count", JobType::Custom, 3600, false),
                counting(runs.clone()),
            )
            .await
            .unwrap();

        scheduler.set_enabled("count", false).await.unwrap();
        let err = scheduler.trigger("count").await.unwrap_err();
        assert!(matches!(err, EternalError::Scheduler(_)));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_system_jobs_cannot_be_removed() {
        let (_dir, scheduler) = scheduler().await;
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(
                ScheduledTask::new("maintenance", JobType::Maintenance, 60, true),
                counting(runs.clone()),
            )
            .await
            .unwrap();
        scheduler
            .register(
                ScheduledTask::new("mine", JobType::Custom, 60, false),
                counting(runs),
            )
            .await
            .unwrap();

        assert!(scheduler.remove("maintenance").await.is_err());
        assert!(scheduler.remove("mine").await.unwrap());
        assert!(!scheduler.remove("mine").await.unwrap());
        assert!(scheduler.store.get_task("mine").await.unwrap().is_none());
        assert_eq!(scheduler.jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_trigger_refuses_overlapping_run() {
        let (_dir, scheduler) = scheduler().await;
        let release = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let handler: JobHandler = {
            let (release, started, runs) = (release.clone(), started.clone(), runs.clone());
            Arc::new(move || {
                let (release, started, runs) = (release.clone(), started.clone(), runs.clone());
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    started.notify_one();
                    release.notified().await;
                    Ok::<(), EternalError>(())
                }
                .boxed()
            })
        };
        scheduler
            .register(ScheduledTask::new("slow", JobType::Custom, 3600, false), handler)
            .await
            .unwrap();

        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.trigger("slow").await })
        };
        started.notified().await;
        assert!(scheduler.job("slow").unwrap().running);

        let second = scheduler.trigger("slow").await;
        assert!(matches!(second, Err(EternalError::Scheduler(msg)) if msg.contains("already running")));

        release.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_trigger_refuses_job_started_by_loop() {
        let (_dir, scheduler) = scheduler().await;
        let release = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let handler: JobHandler = {
            let (release, started, runs) = (release.clone(), started.clone(), runs.clone());
            Arc::new(move || {
                let (release, started, runs) = (release.clone(), started.clone(), runs.clone());
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    started.notify_one();
                    release.notified().await;
                    Ok::<(), EternalError>(())
                }
                .boxed()
            })
        };
        scheduler
            .register(ScheduledTask::new("slow", JobType::Custom, 3600, false), handler)
            .await
            .unwrap();

        scheduler.start().await;
        started.notified().await;

        let manual = scheduler.trigger("slow").await;
        assert!(matches!(manual, Err(EternalError::Scheduler(msg)) if msg.contains("already running")));

        release.notify_one();
        scheduler.stop().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(scheduler.job("slow").unwrap().last_run.is_some());
    }

    #[tokio::test]
    async fn test_custom_job_cannot_take_system_name() {
        let (_dir, scheduler) = scheduler().await;
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(
                ScheduledTask::new("maintenance", JobType::Maintenance, 60, true),
                counting(runs.clone()),
            )
            .await
            .unwrap();

        let hijack = scheduler
            .register(
                ScheduledTask::new("maintenance", JobType::VaultBackup, 60, false),
                counting(runs.clone()),
            )
            .await;
        assert!(matches!(hijack, Err(EternalError::Scheduler(_))));

        let info = scheduler.job("maintenance").unwrap();
        assert!(info.is_system);
        assert_eq!(info.job_type, JobType::Maintenance);
        assert!(scheduler.remove("maintenance").await.is_err());

        // The stored row still guards the name after a restart
        let restarted = Scheduler::new(scheduler.store.clone(), Duration::from_millis(20));
        let after_restart = restarted
            .register(
                ScheduledTask::new("maintenance", JobType::VaultBackup, 60, false),
                counting(runs),
            )
            .await;
        assert!(after_restart.is_err());
        assert!(scheduler.store.get_task("maintenance").await.unwrap().unwrap().is_system);
    }

    #[tokio::test]
    async fn test_out_of_range_interval_is_rejected() {
        let (_dir, scheduler) = scheduler().await;
        let runs = Arc::new(AtomicUsize::new(0));

        let result = scheduler
            .register(
                ScheduledTask::new("rare", JobType::StatsSnapshot, 1 << 62, false),
                counting(runs),
            )
            .await;
        assert!(matches!(result, Err(EternalError::Scheduler(_))));
        assert!(scheduler.job("rare").is_none());
        assert!(scheduler.store.get_task("rare").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_loop_runs_due_jobs_and_survives_failures() {
        let (_dir, scheduler) = scheduler().await;
        let runs = Arc::new(AtomicUsize::new(0));
        let failing: JobHandler =
            Arc::new(|| async { Err::<(), _>(EternalError::General("boom".into())) }.boxed());

        scheduler
            .register(ScheduledTask::new("broken", JobType::Custom, 3600, false), failing)
            .await
            .unwrap();
        scheduler
            .register(
                ScheduledTask::new("count", JobType::Custom, 3600, false),
                counting(runs.clone()),
            )
            .await
            .unwrap();

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.stop().await;

        // Never-run jobs are due at once; the hour interval keeps them to one run
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(scheduler.job("broken").unwrap().last_run.is_some());
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn test_register_keeps_persisted_history() {
        let (_dir, scheduler) = scheduler().await;
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(
                ScheduledTask::new("count", JobType::Custom, 3600, false),
                counting(runs.clone()),
            )
            .await
            .unwrap();
        scheduler.trigger("count").await.unwrap();
        scheduler.set_enabled("count", false).await.unwrap();

        let restarted = Scheduler::new(scheduler.store.clone(), Duration::from_millis(20));
        restarted
            .register(
                ScheduledTask::new("count", JobType::Custom, 7200, false),
                counting(runs),
            )
            .await
            .unwrap();

        let info = restarted.job("count").unwrap();
        assert!(!info.enabled);
        assert!(info.last_run.is_some());
        assert_eq!(info.interval_seconds, 7200);
    }
}
