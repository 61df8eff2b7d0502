// SPDX-License-Identifier: GPL-3.0-or-later
use crate::job::{Job, JobContext, JobResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Job schedule configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Run now, then every period. A run that overlaps the next tick makes
    /// that tick skip.
    Interval(Duration),
    /// Run once immediately
    Once,
}

/// Pool used by [`JobRegistry::register`].
pub const DEFAULT_POOL: &str = "default";

struct RegisteredJob {
    job: Arc<dyn Job>,
    schedule: Schedule,
    pool: String,
}

/// Registry that owns the background jobs and their schedules
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, RegisteredJob>>>,
    pools: HashMap<String, usize>,
    shutdown: watch::Sender<bool>,
}

impl JobRegistry {
    pub fn new(max_concurrent: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            pools: HashMap::from([(DEFAULT_POOL.to_string(), max_concurrent.max(1))]),
            shutdown,
        }
    }

    /// Add a separate permit pool. Jobs in different pools never wait on
    /// each other.
    pub fn with_pool(mut self, name: impl Into<String>, max_concurrent: usize) -> Self {
        self.pools.insert(name.into(), max_concurrent.max(1));
        self
    }

    pub async fn register(
        &self,
        job_id: impl Into<String>,
        job: impl Job + 'static,
        schedule: Schedule,
    ) {
        self.register_in(DEFAULT_POOL, job_id, job, schedule).await
    }

    /// Register a job that draws its permits from `pool`. Unknown pools
    /// fall back to the default one.
    pub async fn register_in(
        &self,
        pool: &str,
        job_id: impl Into<String>,
        job: impl Job + 'static,
        schedule: Schedule,
    ) {
        let job_id = job_id.into();
        let pool = if self.pools.contains_key(pool) {
            pool.to_string()
        } else {
            warn!(target: "registry", %job_id, pool, "unknown pool, using default");
            DEFAULT_POOL.to_string()
        };
        let registered = RegisteredJob {
            job: Arc::new(job) as Arc<dyn Job>,
            schedule,
            pool,
        };

        let mut jobs = self.jobs.write().await;
        info!(
            target: "registry",
            %job_id,
            job_type = registered.job.job_type(),
            schedule = ?registered.schedule,
            pool = %registered.pool,
            "registering job"
        );
        jobs.insert(job_id, registered);
    }

    pub async fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Spawn one task per registered job. Jobs share the permits of their
    /// pool, and a permit is only held while an attempt runs.
    pub async fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        info!(target: "registry", pools = self.pools.len(), "starting job registry");

        let semaphores: HashMap<&str, Arc<Semaphore>> = self
            .pools
            .iter()
            .map(|(name, size)| (name.as_str(), Arc::new(Semaphore::new(*size))))
            .collect();
        let jobs = self.jobs.read().await;
        let mut handles = Vec::with_capacity(jobs.len());

        for (job_id, registered) in jobs.iter() {
            let job_id = job_id.clone();
            let job = registered.job.clone();
            let Some(semaphore) = semaphores.get(registered.pool.as_str()).cloned() else {
                continue;
            };
            let mut shutdown = self.shutdown.subscribe();

            let handle = match registered.schedule.clone() {
                Schedule::Interval(period) => tokio::spawn(async move {
                    let mut ticker = interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    loop {
                        if *shutdown.borrow() {
                            break;
                        }
                        tokio::select! {
                            _ = ticker.tick() => {}
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    break;
                                }
                                continue;
                            }
                        }
                        Self::execute_job(&job_id, job.clone(), Some(&semaphore)).await;
                    }
                    info!(target: "registry", %job_id, "job loop stopped");
                }),
                Schedule::Once => tokio::spawn(async move {
                    Self::execute_job(&job_id, job, Some(&semaphore)).await;
                }),
            };
            handles.push(handle);
        }

        info!(target: "registry", "job registry started with {} jobs", jobs.len());
        handles
    }

    /// Ask every job loop to stop after its current run.
    pub fn shutdown(&self) {
        info!(target: "registry", "stopping job registry");
        self.shutdown.send_replace(true);
    }

    /// Run a registered job right away, retries included.
    pub async fn run_now(&self, job_id: &str) -> Option<JobResult> {
        let job = self.jobs.read().await.get(job_id)?.job.clone();
        Some(Self::execute_job(job_id, job, None).await)
    }

    async fn execute_job(
        job_id: &str,
        job: Arc<dyn Job>,
        permits: Option<&Arc<Semaphore>>,
    ) -> JobResult {
        let max_attempts = if job.is_retriable() {
            job.max_retries() + 1
        } else {
            1
        };
        let mut attempt = 0;

        loop {
            attempt += 1;
            info!(
                target: "registry",
                %job_id,
                job_type = job.job_type(),
                attempt,
                max_attempts,
                "executing job"
            );

            let permit = match permits {
                Some(semaphore) => match semaphore.clone().acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        return JobResult::Failure {
                            error: "job pool closed".to_string(),
                            retry: false,
                        }
                    }
                },
                None => None,
            };
            let result = match job.execute(JobContext::new(job_id, attempt)).await {
                Ok(result) => result,
                Err(err) => {
                    error!(
                        target: "registry",
                        %job_id,
                        job_type = job.job_type(),
                        attempt,
                        error = %err,
                        "job execution error"
                    );
                    JobResult::Failure {
                        error: err.to_string(),
                        retry: job.is_retriable(),
                    }
                }
            };
            drop(permit);

            match &result {
                JobResult::Success { processed } => {
                    info!(
                        target: "registry",
                        %job_id,
                        job_type = job.job_type(),
                        attempt,
                        processed,
                        "job completed successfully"
                    );
                    return result;
                }
                JobResult::Failure { error, retry } => {
                    if *retry && attempt < max_attempts {
                        let delay = job.retry_delay();
                        warn!(
                            target: "registry",
                            %job_id,
                            %error,
                            ?delay,
                            "retrying job after delay"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        error!(
                            target: "registry",
                            %job_id,
                            %error,
                            attempt,
                            "job failed"
                        );
                        return result;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyJob {
        runs: Arc<AtomicU32>,
        failures: u32,
        retriable: bool,
    }

    #[async_trait::async_trait]
    impl Job for FlakyJob {
        fn job_type(&self) -> &'static str {
            "flaky"
        }

        fn name(&self) -> String {
            "Flaky".to_string()
        }

        async fn execute(&self, ctx: JobContext) -> Result<JobResult> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            assert_eq!(ctx.attempt, run);
            if run <= self.failures {
                return Err(anyhow!("boom"));
            }
            Ok(JobResult::done(run as usize))
        }

        fn is_retriable(&self) -> bool {
            self.retriable
        }
    }

    struct CountingJob(Arc<AtomicU32>);

    #[async_trait::async_trait]
    impl Job for CountingJob {
        fn job_type(&self) -> &'static str {
            "counting"
        }

        fn name(&self) -> String {
            "Counting".to_string()
        }

        async fn execute(&self, _ctx: JobContext) -> Result<JobResult> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(JobResult::done(1))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let registry = JobRegistry::new(1);
        let runs = Arc::new(AtomicU32::new(0));
        registry
            .register(
                "flaky",
                FlakyJob {
                    runs: runs.clone(),
                    failures: 2,
                    retriable: true,
                },
                Schedule::Once,
            )
            .await;

        let result = registry.run_now("flaky").await;

        assert_eq!(result, Some(JobResult::Success { processed: 3 }));
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retriable_failure_runs_once() {
        let registry = JobRegistry::new(1);
        let runs = Arc::new(AtomicU32::new(0));
        registry
            .register(
                "flaky",
                FlakyJob {
                    runs: runs.clone(),
                    failures: 5,
                    retriable: false,
                },
                Schedule::Once,
            )
            .await;

        let result = registry.run_now("flaky").await;

        assert!(matches!(result, Some(JobResult::Failure { retry: false, .. })));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(registry.run_now("missing").await.is_none());
    }

    struct SlowJob;

    #[async_trait::async_trait]
    impl Job for SlowJob {
        fn job_type(&self) -> &'static str {
            "slow"
        }

        fn name(&self) -> String {
            "Slow".to_string()
        }

        async fn execute(&self, _ctx: JobContext) -> Result<JobResult> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(JobResult::done(1))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn separate_pools_do_not_wait_on_each_other() {
        let registry = Arc::new(JobRegistry::new(1).with_pool("tracker", 1));
        let runs = Arc::new(AtomicU32::new(0));
        registry.register("slow", SlowJob, Schedule::Once).await;
        registry
            .register_in(
                "tracker",
                "count",
                CountingJob(runs.clone()),
                Schedule::Interval(Duration::from_secs(10)),
            )
            .await;

        let handles = registry.clone().start().await;
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(runs.load(Ordering::SeqCst) >= 2);

        registry.shutdown();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_delay_does_not_hold_a_permit() {
        let registry = Arc::new(JobRegistry::new(1));
        let flaky_runs = Arc::new(AtomicU32::new(0));
        let runs = Arc::new(AtomicU32::new(0));
        registry
            .register(
                "flaky",
                FlakyJob {
                    runs: flaky_runs.clone(),
                    failures: 10,
                    retriable: true,
                },
                Schedule::Once,
            )
            .await;
        registry
            .register(
                "count",
                CountingJob(runs.clone()),
                Schedule::Interval(Duration::from_secs(10)),
            )
            .await;

        let handles = registry.clone().start().await;
        // the flaky job spends this window sleeping between attempts
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(runs.load(Ordering::SeqCst) >= 2);

        registry.shutdown();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(flaky_runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_jobs_run_until_shutdown() {
        let registry = Arc::new(JobRegistry::new(2));
        let runs = Arc::new(AtomicU32::new(0));
        registry
            .register(
                "count",
                CountingJob(runs.clone()),
                Schedule::Interval(Duration::from_secs(10)),
            )
            .await;
        assert_eq!(registry.job_ids().await, vec!["count".to_string()]);

        let handles = registry.clone().start().await;
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(runs.load(Ordering::SeqCst) >= 3);

        registry.shutdown();
        for handle in handles {
            handle.await.unwrap();
        }
        let stopped_at = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), stopped_at);
    }
}
