//! Tick Dispatcher - Sends one gated batch per tick and reschedules itself
//!
//! A tick may be delivered late, twice, or after its run was superseded.
//! Every effect is therefore conditional: the run is re-checked on entry,
//! each draft is claimed before sending, and a draft's terminal mark is the
//! only thing that can add a send event for it.

use std::sync::Arc;

use cadence_common::types::SendRunId;
use cadence_storage::{
    end_reason, Campaign, DraftItem, EventKind, ExclusionKind, NewSendEvent, SendOutcome,
    TickHeartbeat,
};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::{CampaignError, CampaignResult};
use super::manager::CampaignManager;
use super::rate_gate::{GateDecision, RateGate};
use super::template::RenderedMessage;
use crate::queue::TickRequest;
use crate::sender::{SendError, SendReceipt};

/// Drafts considered per tick
pub const TICK_BATCH_SIZE: i64 = 10;

/// Minimum gap between two ticks of a run
pub const TICK_SPACING_SECS: i64 = 10;

/// What a tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The campaign is not sending under this run; nothing was touched
    Stale,
    /// The run ended while the tick was working
    Superseded { sent: u32, failed: u32 },
    Rescheduled {
        next_at: DateTime<Utc>,
        sent: u32,
        failed: u32,
    },
    Completed { sent: u32, failed: u32 },
    Failed { reason: String },
    /// Work was done but no follow-up tick exists; the campaign will go stale
    RescheduleFailed { error: String },
}

impl TickOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickOutcome::Stale => "stale",
            TickOutcome::Superseded { .. } => "superseded",
            TickOutcome::Rescheduled { .. } => "rescheduled",
            TickOutcome::Completed { .. } => "completed",
            TickOutcome::Failed { .. } => "failed",
            TickOutcome::RescheduleFailed { .. } => "reschedule_failed",
        }
    }
}

/// Runs ticks against a [`CampaignManager`]
#[derive(Clone)]
pub struct TickDispatcher {
    manager: Arc<CampaignManager>,
}

impl TickDispatcher {
    pub fn new(manager: Arc<CampaignManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<CampaignManager> {
        &self.manager
    }

    /// Process one tick
    pub async fn dispatch(&self, tick: TickRequest) -> CampaignResult<TickOutcome> {
        let outcome = self.run(tick).await?;
        self.manager.metrics.record_tick(outcome.as_str());
        Ok(outcome)
    }

    async fn run(&self, tick: TickRequest) -> CampaignResult<TickOutcome> {
        let m = &self.manager;
        let campaign_id = tick.campaign_id;
        let run_id = tick.send_run_id;
        let started = m.clock.now();

        let campaign = match m.repos.campaigns.get(campaign_id).await? {
            Some(campaign) if campaign.accepts_tick(run_id) => campaign,
            _ => {
                debug!(campaign_id = %campaign_id, run_id = %run_id, "Ignoring stale tick");
                return Ok(TickOutcome::Stale);
            }
        };
        let heartbeat = TickHeartbeat {
            last_tick_at: Some(started),
            next_tick_at: None,
        };
        if !m.repos.campaigns.record_tick(campaign_id, run_id, heartbeat).await? {
            return Ok(TickOutcome::Stale);
        }

        let settings = m.settings.load().await?;
        let gate = RateGate::new(&settings);
        let (day_start, day_end) = gate.day_bounds(started).ok_or_else(|| {
            CampaignError::Validation(format!("cannot resolve local day in {}", settings.time_zone))
        })?;
        let mut sent_today =
            u64::try_from(m.repos.events.count_sent_between(day_start, day_end).await?).unwrap_or(0);
        let mut last_sent = m.repos.events.last_sent_in_run(run_id).await?;

        let claim_cutoff = started - m.options.stale_after;
        let batch = m
            .repos
            .drafts
            .next_pending_batch(campaign_id, TICK_BATCH_SIZE, claim_cutoff)
            .await?;
        let token = Uuid::new_v4();

        let mut sent = 0u32;
        let mut failed = 0u32;
        let mut blocked_until = None;

        for item in batch {
            let now = m.clock.now();
            match gate.evaluate(now, sent_today, last_sent) {
                GateDecision::Allowed => {}
                GateDecision::Blocked { until, reason } => {
                    m.metrics.record_gate_block(reason.as_str());
                    debug!(
                        campaign_id = %campaign_id,
                        reason = reason.as_str(),
                        until = %until,
                        "Send deferred by rate gate"
                    );
                    blocked_until = Some(until);
                    break;
                }
                GateDecision::NoWindowConfigured => {
                    let reason = "no send window is configured".to_string();
                    m.fail_run(campaign_id, run_id, end_reason::NO_WINDOW, &reason)
                        .await?;
                    return Ok(TickOutcome::Failed { reason });
                }
            }

            if !m.repos.drafts.claim(item.id, token, now, claim_cutoff).await? {
                debug!("Draft {} claimed by another tick", item.id);
                continue;
            }

            if m.options.recheck_suppression
                && m.repos.contacts.is_suppressed(&item.recipient_address).await?
            {
                m.repos
                    .drafts
                    .exclude(item.id, ExclusionKind::Ineligible, now)
                    .await?;
                info!(
                    "Draft {} excluded: {} is suppressed",
                    item.id, item.recipient_address
                );
                continue;
            }

            let message = m.compose(
                &campaign,
                &settings,
                &item.recipient_address,
                RenderedMessage {
                    subject: item.subject.clone(),
                    html_body: item.html_body.clone(),
                    text_body: item.text_body.clone(),
                },
            );
            let result = m.sender.send(&message).await;
            let succeeded = result.is_ok();
            if let Err(e) = &result {
                warn!(
                    campaign_id = %campaign_id,
                    draft_id = %item.id,
                    "Send to {} failed: {}",
                    item.recipient_address,
                    e
                );
            }

            let at = m.clock.now();
            if self.record_delivery(&campaign, run_id, &item, result, at).await? {
                if succeeded {
                    sent += 1;
                    sent_today += 1;
                    last_sent = Some(at);
                } else {
                    failed += 1;
                }
            }
        }

        if m.repos.drafts.count_pending(campaign_id).await? == 0 {
            return if m.complete_run(campaign_id, run_id).await? {
                Ok(TickOutcome::Completed { sent, failed })
            } else {
                Ok(TickOutcome::Superseded { sent, failed })
            };
        }

        // Pause or retry while sending ends this run's chain
        let still_current = m
            .repos
            .campaigns
            .get(campaign_id)
            .await?
            .map_or(false, |c| c.accepts_tick(run_id));
        if !still_current {
            debug!(campaign_id = %campaign_id, run_id = %run_id, "Run ended during tick");
            return Ok(TickOutcome::Superseded { sent, failed });
        }

        let earliest = m.clock.now() + Duration::seconds(TICK_SPACING_SECS);
        let next_at = blocked_until.map_or(earliest, |until: DateTime<Utc>| until.max(earliest));

        if let Err(e) = m.scheduler.schedule(tick, next_at).await {
            error!(
                campaign_id = %campaign_id,
                run_id = %run_id,
                "Failed to schedule next tick: {}",
                e
            );
            return Ok(TickOutcome::RescheduleFailed {
                error: e.to_string(),
            });
        }
        let heartbeat = TickHeartbeat {
            last_tick_at: None,
            next_tick_at: Some(next_at),
        };
        m.repos.campaigns.record_tick(campaign_id, run_id, heartbeat).await?;

        debug!(
            campaign_id = %campaign_id,
            sent,
            failed,
            next_at = %next_at,
            "Tick rescheduled"
        );
        Ok(TickOutcome::Rescheduled {
            next_at,
            sent,
            failed,
        })
    }

    /// Mark a draft terminal and log the attempt
    ///
    /// Returns `false` without logging when the draft was already terminal.
    pub async fn record_delivery(
        &self,
        campaign: &Campaign,
        run_id: SendRunId,
        item: &DraftItem,
        result: Result<SendReceipt, SendError>,
        at: DateTime<Utc>,
    ) -> CampaignResult<bool> {
        let drafts = &self.manager.repos.drafts;
        let (marked, outcome, receipt, error) = match result {
            Ok(receipt) => {
                let marked = drafts
                    .mark_sent(
                        item.id,
                        &receipt.provider_message_id,
                        receipt.permalink.as_deref(),
                        at,
                    )
                    .await?;
                (marked, SendOutcome::Sent, Some(receipt), None)
            }
            Err(e) => {
                let error = e.to_string();
                let marked = drafts.mark_failed(item.id, &error, at).await?;
                (marked, SendOutcome::Failed, None, Some(error))
            }
        };
        let (provider_message_id, permalink) = match receipt {
            Some(r) => (Some(r.provider_message_id), r.permalink),
            None => (None, None),
        };

        if !marked {
            debug!("Draft {} already terminal; delivery not recorded", item.id);
            return Ok(false);
        }

        self.manager
            .repos
            .events
            .append(NewSendEvent {
                campaign_id: Some(campaign.id),
                send_run_id: Some(run_id),
                draft_item_id: Some(item.id),
                recipient_address: item.recipient_address.clone(),
                kind: EventKind::Campaign,
                outcome,
                provider_message_id,
                permalink,
                error,
                at,
            })
            .await?;
        self.manager
            .metrics
            .record_send(outcome.as_str(), EventKind::Campaign.as_str());

        Ok(true)
    }
}
