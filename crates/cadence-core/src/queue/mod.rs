//! Tick scheduling
//!
//! A tick is a delayed request to run one dispatcher pass for a campaign run.
//! The engine only needs "run this at that time"; where the tick waits is up
//! to the [`TickScheduler`] implementation.

mod channel;
mod jobs;

pub use channel::{ChannelTickScheduler, ScheduledTick, TickLoop};
pub use jobs::{JobTickScheduler, TickWorker, TICK_QUEUE};

use async_trait::async_trait;
use cadence_common::types::{CampaignId, SendRunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Payload of a scheduled tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TickRequest {
    pub campaign_id: CampaignId,
    pub send_run_id: SendRunId,
}

#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("Failed to persist tick: {0}")]
    Storage(#[from] cadence_common::Error),

    #[error("Failed to encode tick: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Tick scheduler is shut down")]
    Closed,
}

/// Schedules a tick for later execution
#[async_trait]
pub trait TickScheduler: Send + Sync {
    async fn schedule(&self, tick: TickRequest, at: DateTime<Utc>) -> Result<(), SchedulingError>;
}
