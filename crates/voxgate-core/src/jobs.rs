//! Periodic background work: regression sweeps, pattern refresh and
//! override relay.
//!
//! Every job is idempotent, so a retried or duplicated job converges on the
//! same stored state.

use crate::config::JobSettings;
use crate::defects::PatternService;
use crate::errors::{EngineError, Result};
use crate::feedback::FeedbackRelay;
use crate::regression::RegressionService;
use crate::storage::Store;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

const DEFAULT_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    DetectRegressions { script_id: String },
    AnalyzePatterns,
    RelayOverrides,
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::DetectRegressions { .. } => "detect_regressions",
            Job::AnalyzePatterns => "analyze_patterns",
            Job::RelayOverrides => "relay_overrides",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded { summary: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: Job,
    pub attempts: u32,
    #[serde(flatten)]
    pub status: JobStatus,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, JobStatus::Succeeded { .. })
    }
}

/// Services a job may touch. The relay is optional; without a sink,
/// `RelayOverrides` is a no-op.
pub struct JobContext {
    pub store: Store,
    pub regressions: RegressionService,
    pub patterns: PatternService,
    pub relay: Option<FeedbackRelay>,
}

impl JobContext {
    /// One sweep's worth of jobs: a regression check per baselined script,
    /// then a pattern refresh, then the relay.
    pub fn sweep(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .store
            .baseline_script_ids()?
            .into_iter()
            .map(|script_id| Job::DetectRegressions { script_id })
            .collect();
        jobs.push(Job::AnalyzePatterns);
        if self.relay.is_some() {
            jobs.push(Job::RelayOverrides);
        }
        Ok(jobs)
    }

    /// Store-bound jobs run on the blocking pool; SQLite calls may sit in a
    /// busy timeout and must not hold a runtime worker.
    pub async fn execute(&self, job: &Job) -> Result<String> {
        match job {
            Job::DetectRegressions { script_id } => {
                let svc = self.regressions.clone();
                let script_id = script_id.clone();
                blocking(move || {
                    let outcome = svc.run_for_script(&script_id)?;
                    Ok(format!("{} regressions", outcome.regressions()))
                })
                .await
            }
            Job::AnalyzePatterns => {
                let svc = self.patterns.clone();
                blocking(move || {
                    let refresh = svc.refresh()?;
                    Ok(format!("{} clusters", refresh.clusters.len()))
                })
                .await
            }
            Job::RelayOverrides => match &self.relay {
                Some(relay) => {
                    let n = relay.drain().await?;
                    Ok(format!("{} overrides delivered", n))
                }
                None => Ok("no sink configured".to_string()),
            },
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EngineError::Task(e.to_string()))?
}

/// Semaphore-bounded executor with per-job retry.
#[derive(Clone)]
pub struct WorkerPool {
    ctx: Arc<JobContext>,
    workers: usize,
    max_retries: u32,
    backoff: Duration,
}

impl WorkerPool {
    pub fn new(ctx: Arc<JobContext>, settings: &JobSettings) -> Self {
        Self {
            ctx,
            workers: settings.workers.max(1),
            max_retries: settings.max_retries,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn context(&self) -> &Arc<JobContext> {
        &self.ctx
    }

    pub async fn run_batch(&self, jobs: Vec<Job>) -> anyhow::Result<Vec<JobReport>> {
        let sem = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::new();

        for job in jobs {
            let permit = sem.clone().acquire_owned().await?;
            let this = self.clone();
            let h = tokio::spawn(async move {
                let _permit = permit;
                this.run_job(job).await
            });
            handles.push(h);
        }

        let mut reports = Vec::new();
        for h in handles {
            reports.push(h.await?);
        }
        Ok(reports)
    }

    /// Consumes jobs until every sender is dropped.
    pub async fn serve(&self, mut rx: mpsc::Receiver<Job>) -> anyhow::Result<()> {
        let sem = Arc::new(Semaphore::new(self.workers));
        while let Some(job) = rx.recv().await {
            let permit = sem.clone().acquire_owned().await?;
            let this = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                this.run_job(job).await
            });
        }
        // wait for in-flight jobs
        let _drain = sem.acquire_many(self.workers as u32).await?;
        Ok(())
    }

    async fn run_job(&self, job: Job) -> JobReport {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.ctx.execute(&job).await {
                Ok(summary) => {
                    tracing::info!(
                        event = "voxgate.job.done",
                        job = job.name(),
                        attempts = attempt,
                        summary = %summary,
                        "job finished"
                    );
                    return JobReport {
                        job,
                        attempts: attempt,
                        status: JobStatus::Succeeded { summary },
                    };
                }
                Err(e) if e.is_recoverable() && attempt <= self.max_retries => {
                    let delay = self.backoff * 2u32.saturating_pow(attempt - 1);
                    tracing::warn!(
                        event = "voxgate.job.retry",
                        job = job.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "job failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        event = "voxgate.job.failed",
                        job = job.name(),
                        attempts = attempt,
                        error = %e,
                        "job failed"
                    );
                    return JobReport {
                        job,
                        attempts: attempt,
                        status: JobStatus::Failed {
                            error: e.to_string(),
                        },
                    };
                }
            }
        }
    }
}

/// Emits a sweep on every tick.
pub struct Scheduler {
    ctx: Arc<JobContext>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(ctx: Arc<JobContext>, settings: &JobSettings) -> Self {
        Self {
            ctx,
            interval: Duration::from_secs(settings.interval_seconds.max(1)),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Stops once the receiving side is gone. The first tick fires immediately.
    pub fn spawn(self, tx: mpsc::Sender<Job>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let jobs = match self.ctx.sweep() {
                    Ok(jobs) => jobs,
                    Err(e) => {
                        tracing::warn!(error = %e, "could not plan sweep");
                        continue;
                    }
                };
                tracing::debug!(jobs = jobs.len(), "sweep scheduled");
                for job in jobs {
                    if tx.send(job).await.is_err() {
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::model::{ResultStatus, ScriptSnapshot};

    fn context() -> Arc<JobContext> {
        let store = Store::memory().unwrap();
        store.init_schema().unwrap();
        context_on(store)
    }

    fn context_on(store: Store) -> Arc<JobContext> {
        let cfg = EngineConfig::default();
        Arc::new(JobContext {
            regressions: RegressionService::new(
                store.clone(),
                cfg.regression.metrics.clone(),
                cfg.fingerprint(),
            ),
            patterns: PatternService::new(store.clone(), cfg.defects.title_similarity),
            relay: None,
            store,
        })
    }

    #[test]
    fn test_sweep_lists_baselined_scripts() {
        let ctx = context();
        let snap = ScriptSnapshot {
            status: ResultStatus::Passed,
            metrics: Default::default(),
        };
        ctx.store.approve_baseline("s2", &snap, "qa", None).unwrap();
        ctx.store.approve_baseline("s1", &snap, "qa", None).unwrap();

        let jobs = ctx.sweep().unwrap();
        assert_eq!(
            jobs,
            vec![
                Job::DetectRegressions {
                    script_id: "s1".into()
                },
                Job::DetectRegressions {
                    script_id: "s2".into()
                },
                Job::AnalyzePatterns,
            ]
        );
    }

    #[tokio::test]
    async fn test_batch_runs_every_job() {
        let ctx = context();
        let pool = WorkerPool::new(ctx, &JobSettings::default());
        let reports = pool
            .run_batch(vec![
                Job::DetectRegressions {
                    script_id: "missing".into(),
                },
                Job::AnalyzePatterns,
                Job::RelayOverrides,
            ])
            .await
            .unwrap();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.succeeded() && r.attempts == 1));
    }

    #[tokio::test]
    async fn test_scheduler_feeds_serve_until_closed() {
        let ctx = context();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = Scheduler::new(ctx, &JobSettings::default())
            .with_interval(Duration::from_millis(10))
            .spawn(tx);

        assert_eq!(rx.recv().await, Some(Job::AnalyzePatterns));
        drop(rx);
        handle.await.unwrap();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_store_jobs_leave_the_runtime_free() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let store = Store::open(&path).unwrap();
        store.init_schema().unwrap();
        let ctx = context_on(store);

        // another process holds the write lock for a while
        let locker = rusqlite::Connection::open(&path).unwrap();
        locker.execute_batch("BEGIN IMMEDIATE").unwrap();
        let holder = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            locker.execute_batch("COMMIT").unwrap();
        });

        let ticks = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = ticks.clone();
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        });

        let summary = ctx.execute(&Job::AnalyzePatterns).await.unwrap();
        ticker.abort();
        holder.join().unwrap();

        assert_eq!(summary, "0 clusters");
        assert!(ticks.load(std::sync::atomic::Ordering::Relaxed) >= 5);
    }
}
