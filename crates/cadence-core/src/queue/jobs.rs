//! Durable ticks in the `jobs` table

use std::sync::Arc;

use async_trait::async_trait;
use cadence_storage::{Job, JobRepository};
use chrono::{DateTime, Utc};
use tokio::time::{interval, Duration as TokioDuration};
use tracing::{debug, error, info, warn};

use super::{SchedulingError, TickRequest, TickScheduler};
use crate::campaign::TickDispatcher;

/// Queue name for campaign ticks
pub const TICK_QUEUE: &str = "campaign_tick";

/// Schedules ticks as job rows
pub struct JobTickScheduler {
    jobs: Arc<dyn JobRepository>,
}

impl JobTickScheduler {
    pub fn new(jobs: Arc<dyn JobRepository>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl TickScheduler for JobTickScheduler {
    async fn schedule(&self, tick: TickRequest, at: DateTime<Utc>) -> Result<(), SchedulingError> {
        let payload = serde_json::to_value(tick)?;
        let job_id = self.jobs.enqueue(TICK_QUEUE, payload, at).await?;
        debug!(
            "Tick for campaign {} run {} queued as job {} at {}",
            tick.campaign_id, tick.send_run_id, job_id, at
        );
        Ok(())
    }
}

/// Polls for due tick jobs and dispatches them
pub struct TickWorker {
    jobs: Arc<dyn JobRepository>,
    dispatcher: TickDispatcher,
    /// Jobs claimed per poll
    batch_size: i64,
    /// Interval between polls (seconds)
    poll_interval_secs: u64,
}

impl TickWorker {
    pub fn new(jobs: Arc<dyn JobRepository>, dispatcher: TickDispatcher) -> Self {
        Self {
            jobs,
            dispatcher,
            batch_size: 20,
            poll_interval_secs: 5,
        }
    }

    /// Set batch size
    pub fn with_batch_size(mut self, size: i64) -> Self {
        self.batch_size = size;
        self
    }

    /// Set poll interval
    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs.max(1);
        self
    }

    /// Run the worker
    pub async fn run(&self) {
        let mut ticker = interval(TokioDuration::from_secs(self.poll_interval_secs));

        info!(
            "Tick worker started (batch: {}, interval: {}s)",
            self.batch_size, self.poll_interval_secs
        );

        loop {
            ticker.tick().await;

            let now = self.dispatcher.manager().clock.now();
            if let Err(e) = self.process_due(now).await {
                error!("Error processing tick jobs: {}", e);
            }
        }
    }

    /// Claim and run every tick due at `now`; returns how many ran
    pub async fn process_due(&self, now: DateTime<Utc>) -> cadence_common::Result<usize> {
        let due = self.jobs.claim_due(TICK_QUEUE, self.batch_size, now).await?;
        let count = due.len();

        for job in due {
            self.process_job(job).await;
        }

        Ok(count)
    }

    async fn process_job(&self, job: Job) {
        let job_id = job.id;
        let now = || self.dispatcher.manager().clock.now();

        let tick: TickRequest = match serde_json::from_value(job.payload) {
            Ok(tick) => tick,
            Err(e) => {
                error!("Failed to parse tick job {} payload: {}", job_id, e);
                if let Err(e) = self.jobs.fail(job_id, &e.to_string(), now()).await {
                    error!("Failed to mark job {} as failed: {}", job_id, e);
                }
                return;
            }
        };

        match self.dispatcher.dispatch(tick).await {
            Ok(outcome) => {
                debug!("Tick job {} finished: {:?}", job_id, outcome);
                if let Err(e) = self.jobs.complete(job_id, now()).await {
                    error!("Failed to mark job {} as completed: {}", job_id, e);
                }
            }
            Err(e) => {
                warn!(
                    "Tick job {} for campaign {} failed: {}",
                    job_id, tick.campaign_id, e
                );
                if let Err(e) = self.jobs.fail(job_id, &e.to_string(), now()).await {
                    error!("Failed to mark job {} as failed: {}", job_id, e);
                }
            }
        }
    }
}
