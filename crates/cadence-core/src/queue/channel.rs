//! In-process ticks
//!
//! Ticks live only in memory and are lost on restart; a campaign left
//! without a tick goes stale and is recovered through retry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{SchedulingError, TickRequest, TickScheduler};
use crate::campaign::TickDispatcher;

/// A tick and the instant it becomes due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTick {
    pub tick: TickRequest,
    pub at: DateTime<Utc>,
}

/// Schedules ticks onto a channel drained by a [`TickLoop`]
#[derive(Clone)]
pub struct ChannelTickScheduler {
    tx: mpsc::UnboundedSender<ScheduledTick>,
}

impl ChannelTickScheduler {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ScheduledTick>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TickScheduler for ChannelTickScheduler {
    async fn schedule(&self, tick: TickRequest, at: DateTime<Utc>) -> Result<(), SchedulingError> {
        self.tx
            .send(ScheduledTick { tick, at })
            .map_err(|_| SchedulingError::Closed)
    }
}

/// Waits out each scheduled tick on its own task, then dispatches it
pub struct TickLoop {
    rx: mpsc::UnboundedReceiver<ScheduledTick>,
    dispatcher: TickDispatcher,
}

impl TickLoop {
    pub fn new(rx: mpsc::UnboundedReceiver<ScheduledTick>, dispatcher: TickDispatcher) -> Self {
        Self { rx, dispatcher }
    }

    /// Run until every scheduler handle is dropped
    pub async fn run(mut self) {
        info!("In-process tick loop started");

        while let Some(scheduled) = self.rx.recv().await {
            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move {
                let delay = (scheduled.at - dispatcher.manager().clock.now())
                    .to_std()
                    .unwrap_or_default();
                tokio::time::sleep(delay).await;

                match dispatcher.dispatch(scheduled.tick).await {
                    Ok(outcome) => debug!(
                        "Tick for campaign {} finished: {:?}",
                        scheduled.tick.campaign_id, outcome
                    ),
                    Err(e) => warn!(
                        "Tick for campaign {} failed: {}",
                        scheduled.tick.campaign_id, e
                    ),
                }
            });
        }

        info!("In-process tick loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_schedule_delivers_to_receiver() {
        let (scheduler, mut rx) = ChannelTickScheduler::channel();
        let tick = TickRequest {
            campaign_id: Uuid::new_v4(),
            send_run_id: Uuid::new_v4(),
        };
        let at = Utc::now();

        scheduler.schedule(tick, at).await.unwrap();
        assert_eq!(rx.recv().await, Some(ScheduledTick { tick, at }));

        drop(rx);
        assert!(matches!(
            scheduler.schedule(tick, at).await,
            Err(SchedulingError::Closed)
        ));
    }
}
