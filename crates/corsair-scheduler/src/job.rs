// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Execution context handed to a job run
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    pub attempt: u32,
    pub execution_time: DateTime<Utc>,
}

impl JobContext {
    pub fn new(job_id: impl Into<String>, attempt: u32) -> Self {
        Self {
            job_id: job_id.into(),
            attempt,
            execution_time: Utc::now(),
        }
    }
}

/// Outcome of one job run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// `processed` counts whatever unit of work the job handles.
    Success { processed: usize },
    Failure { error: String, retry: bool },
}

impl JobResult {
    pub fn done(processed: usize) -> Self {
        Self::Success { processed }
    }
}

/// A unit of periodic background work
#[async_trait::async_trait]
pub trait Job: Send + Sync {
    fn job_type(&self) -> &'static str;

    fn name(&self) -> String;

    async fn execute(&self, ctx: JobContext) -> Result<JobResult>;

    fn is_retriable(&self) -> bool {
        true
    }

    fn max_retries(&self) -> u32 {
        2
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_secs(30)
    }
}

impl fmt::Debug for dyn Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("type", &self.job_type())
            .field("name", &self.name())
            .finish()
    }
}
