//! Campaign Manager - Handles campaign lifecycle transitions
//!
//! Every status change goes through one compare-and-set on the campaign row,
//! which also takes or releases the sending slot. A failed CAS means another
//! actor got there first; the caller sees the status it lost to.

use std::sync::Arc;

use cadence_common::config::EngineConfig;
use cadence_common::types::{CampaignId, ContactId, DraftItemId, EmailAddress, SendRunId};
use cadence_common::SendSettings;
use cadence_storage::{
    end_reason, Campaign, CampaignStatus, Contact, CreateCampaign, DraftCounts, DraftItem,
    DraftState, EventKind, ExclusionKind, LockChange, NewSendEvent, Repositories, RunStatus,
    SendEvent, SendOutcome, SendRun, SettingsProvider, StatusTransition, TransitionOutcome,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::error::{CampaignError, CampaignResult};
use super::rate_gate::RateGate;
use super::snapshot::{check_eligibility, signature_for, SkipCounts, SkipReason, SnapshotBuilder};
use super::template::RenderedMessage;
use crate::clock::{Clock, SystemClock};
use crate::metrics::EngineMetrics;
use crate::queue::{TickRequest, TickScheduler};
use crate::sender::{MailSender, OutgoingMessage};

const MAX_STALE_SECS: u64 = 30 * 24 * 3600;

/// Engine tunables
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Overdue ticks beyond this make a sending campaign stale
    pub stale_after: Duration,
    pub single_global_slot: bool,
    pub max_drafts: usize,
    pub recheck_suppression: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl EngineOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            stale_after: Duration::seconds(config.stale_after_secs.min(MAX_STALE_SECS) as i64),
            single_global_slot: config.single_global_slot,
            max_drafts: config.max_drafts,
            recheck_suppression: config.recheck_suppression,
        }
    }
}

/// Result of snapshot generation
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotReport {
    pub campaign_id: CampaignId,
    pub created: u64,
    pub capped: bool,
    pub skipped: SkipCounts,
    /// Drafts rejected by the store's uniqueness check
    pub duplicates: u64,
}

/// Who receives a test send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestRecipient {
    Address(String),
    Contact(ContactId),
}

/// Manual one-off send of a campaign's content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSendRequest {
    pub campaign_id: CampaignId,
    pub to: TestRecipient,
}

/// Campaign progress
#[derive(Debug, Clone, Serialize)]
pub struct CampaignStats {
    pub campaign_id: CampaignId,
    pub status: CampaignStatus,
    pub drafts: DraftCounts,
    pub progress_percentage: f64,
    pub current_run_id: Option<SendRunId>,
    pub sent_today: i64,
    pub daily_quota: u32,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub next_tick_at: Option<DateTime<Utc>>,
    pub stale: bool,
}

/// Campaign Manager - Owns the campaign state machine
pub struct CampaignManager {
    pub(crate) repos: Repositories,
    pub(crate) settings: Arc<dyn SettingsProvider>,
    pub(crate) scheduler: Arc<dyn TickScheduler>,
    pub(crate) sender: Arc<dyn MailSender>,
    pub(crate) snapshot: SnapshotBuilder,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) metrics: EngineMetrics,
    pub(crate) options: EngineOptions,
}

impl CampaignManager {
    /// Create a new campaign manager
    pub fn new(
        repos: Repositories,
        settings: Arc<dyn SettingsProvider>,
        scheduler: Arc<dyn TickScheduler>,
        sender: Arc<dyn MailSender>,
        snapshot: SnapshotBuilder,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            repos,
            settings,
            scheduler,
            sender,
            snapshot,
            clock: Arc::new(SystemClock),
            metrics,
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Campaign currently holding a sending slot, if any
    pub async fn sending_campaign(&self) -> CampaignResult<Option<CampaignId>> {
        Ok(self.repos.campaigns.lock_holder().await?)
    }

    pub async fn send_settings(&self) -> CampaignResult<SendSettings> {
        Ok(self.settings.load().await?)
    }

    /// Replace the send settings; the next tick of every run picks them up
    pub async fn update_send_settings(&self, settings: SendSettings) -> CampaignResult<SendSettings> {
        self.settings.save(settings.clone()).await?;
        info!("Send settings updated");
        Ok(settings)
    }

    /// Create a campaign in `draft`
    pub async fn create(&self, input: CreateCampaign) -> CampaignResult<Campaign> {
        if input.name.trim().is_empty() {
            return Err(CampaignError::Validation("name is required".into()));
        }
        if input.subject_template.trim().is_empty() {
            return Err(CampaignError::Validation("subject is required".into()));
        }
        if input.html_template.is_none() && input.text_template.is_none() {
            return Err(CampaignError::Validation(
                "an HTML or text body is required".into(),
            ));
        }
        if let Some(alias) = &input.sender_alias {
            EmailAddress::parse(alias).ok_or_else(|| {
                CampaignError::Validation(format!("invalid sender alias: {}", alias))
            })?;
        }

        let campaign = self.repos.campaigns.create(input).await?;
        info!("Campaign {} created ({})", campaign.id, campaign.name);
        Ok(campaign)
    }

    pub async fn get(&self, id: CampaignId) -> CampaignResult<Campaign> {
        self.repos
            .campaigns
            .get(id)
            .await?
            .ok_or(CampaignError::NotFound(id))
    }

    pub async fn list(
        &self,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> CampaignResult<Vec<Campaign>> {
        Ok(self.repos.campaigns.list(status, limit, offset).await?)
    }

    /// Materialize drafts and move the campaign to `ready`
    ///
    /// Without `force` the campaign must be in `draft` and have no drafts.
    /// With `force`, a `draft` or `ready` campaign has its drafts rebuilt;
    /// a `ready` campaign sits in `draft` while that happens.
    pub async fn generate_snapshot(
        &self,
        id: CampaignId,
        force: bool,
    ) -> CampaignResult<SnapshotReport> {
        let campaign = self.get(id).await?;
        let allowed: &[CampaignStatus] = if force {
            &[CampaignStatus::Draft, CampaignStatus::Ready]
        } else {
            &[CampaignStatus::Draft]
        };
        if !allowed.contains(&campaign.status) {
            return Err(CampaignError::InvalidTransition {
                action: "snapshot",
                status: campaign.status,
            });
        }

        let existing = self.repos.drafts.counts(id).await?.total();
        if existing > 0 && !force {
            return Err(CampaignError::SnapshotExists);
        }

        let settings = self.settings.load().await?;
        let plan = self
            .snapshot
            .plan(&campaign, &settings, self.options.max_drafts)
            .await?;
        if plan.drafts.is_empty() {
            return Err(CampaignError::EmptySnapshot);
        }

        // A ready campaign is held in draft while its drafts are replaced
        if campaign.status == CampaignStatus::Ready {
            let change = StatusTransition::new(
                &[CampaignStatus::Ready],
                CampaignStatus::Draft,
                self.clock.now(),
            );
            self.apply(id, change, "snapshot").await?;
        }
        if existing > 0 {
            let removed = self.repos.drafts.delete_by_campaign(id).await?;
            debug!("Removed {} drafts of campaign {} before regenerating", removed, id);
        }
        let inserted = self.repos.drafts.insert_batch(plan.drafts).await?;

        let change = StatusTransition::new(
            &[CampaignStatus::Draft],
            CampaignStatus::Ready,
            self.clock.now(),
        );
        self.apply(id, change, "snapshot").await?;

        self.metrics.record_snapshot(inserted.inserted);
        info!(
            "Campaign {} snapshot: {} drafts{}",
            id,
            inserted.inserted,
            if plan.capped { " (capped)" } else { "" }
        );

        Ok(SnapshotReport {
            campaign_id: id,
            created: inserted.inserted,
            capped: plan.capped,
            skipped: plan.skipped,
            duplicates: inserted.duplicates,
        })
    }

    /// Begin sending a `ready` campaign
    pub async fn start(&self, id: CampaignId) -> CampaignResult<SendRunId> {
        let campaign = self.get(id).await?;
        if campaign.status != CampaignStatus::Ready {
            return Err(CampaignError::InvalidTransition {
                action: "start",
                status: campaign.status,
            });
        }
        self.activate(&campaign, CampaignStatus::Ready, "start").await
    }

    /// Stop a sending campaign; an in-flight tick finishes its current send
    pub async fn pause(&self, id: CampaignId) -> CampaignResult<Campaign> {
        let campaign = self.get(id).await?;
        if campaign.status != CampaignStatus::Sending {
            return Err(CampaignError::InvalidTransition {
                action: "pause",
                status: campaign.status,
            });
        }

        let now = self.clock.now();
        let change = StatusTransition::new(&[CampaignStatus::Sending], CampaignStatus::Paused, now)
            .expecting_run(campaign.current_run_id)
            .with_lock(LockChange::Release);
        let paused = self.apply(id, change, "pause").await?;

        if let Some(run_id) = campaign.current_run_id {
            self.repos
                .runs
                .close(run_id, RunStatus::Aborted, Some(end_reason::PAUSED), now)
                .await?;
        }

        info!("Campaign {} paused", id);
        Ok(paused)
    }

    /// Continue a `paused` campaign under a new run
    pub async fn resume(&self, id: CampaignId) -> CampaignResult<SendRunId> {
        let campaign = self.get(id).await?;
        if campaign.status != CampaignStatus::Paused {
            return Err(CampaignError::InvalidTransition {
                action: "resume",
                status: campaign.status,
            });
        }
        self.activate(&campaign, CampaignStatus::Paused, "resume").await
    }

    /// Restart a stuck `sending` campaign or a `failed` one under a new run
    ///
    /// A `sending` campaign must be stale unless `force` is set.
    pub async fn retry_stuck(&self, id: CampaignId, force: bool) -> CampaignResult<SendRunId> {
        let campaign = self.get(id).await?;
        let now = self.clock.now();

        match campaign.status {
            CampaignStatus::Sending => {
                let stale = campaign.is_stale(now, self.options.stale_after);
                if !stale && !force {
                    return Err(CampaignError::NotStale);
                }

                let run_id = self
                    .activate(&campaign, CampaignStatus::Sending, "retry")
                    .await?;

                if let Some(old_run) = campaign.current_run_id {
                    self.repos
                        .runs
                        .close(old_run, RunStatus::Aborted, Some(end_reason::STALE_RETRY), now)
                        .await?;
                }
                // Claims of a live tick must survive a forced retry
                if stale {
                    let released = self.repos.drafts.release_claims(id).await?;
                    if released > 0 {
                        debug!("Released {} stale claims of campaign {}", released, id);
                    }
                }

                warn!(
                    "Campaign {} retried (stale: {}, forced: {}), new run {}",
                    id, stale, force, run_id
                );
                Ok(run_id)
            }
            CampaignStatus::Failed => {
                let run_id = self
                    .activate(&campaign, CampaignStatus::Failed, "retry")
                    .await?;
                info!("Failed campaign {} retried, new run {}", id, run_id);
                Ok(run_id)
            }
            status => Err(CampaignError::InvalidTransition {
                action: "retry",
                status,
            }),
        }
    }

    /// Finish a run whose drafts are all terminal
    ///
    /// Returns `false` when the run is no longer current.
    pub async fn complete_run(&self, id: CampaignId, run_id: SendRunId) -> CampaignResult<bool> {
        let now = self.clock.now();
        let change = StatusTransition::new(&[CampaignStatus::Sending], CampaignStatus::Completed, now)
            .expecting_run(Some(run_id))
            .with_lock(LockChange::Release);

        match self.repos.campaigns.transition(id, change).await? {
            TransitionOutcome::Applied(_) => {
                self.repos
                    .runs
                    .close(run_id, RunStatus::Completed, None, now)
                    .await?;
                self.metrics.record_transition(CampaignStatus::Completed.as_str());
                info!("Campaign {} completed (run {})", id, run_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Move the run's campaign to `failed`
    pub async fn fail_run(
        &self,
        id: CampaignId,
        run_id: SendRunId,
        reason: &'static str,
        message: &str,
    ) -> CampaignResult<bool> {
        let now = self.clock.now();
        let change = StatusTransition::new(&[CampaignStatus::Sending], CampaignStatus::Failed, now)
            .expecting_run(Some(run_id))
            .with_lock(LockChange::Release)
            .with_failure(message);

        match self.repos.campaigns.transition(id, change).await? {
            TransitionOutcome::Applied(_) => {
                self.repos
                    .runs
                    .close(run_id, RunStatus::Aborted, Some(reason), now)
                    .await?;
                self.metrics.record_transition(CampaignStatus::Failed.as_str());
                error!("Campaign {} failed: {}", id, message);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Exclude a pending draft from sending
    pub async fn exclude_draft(
        &self,
        id: CampaignId,
        draft_id: DraftItemId,
    ) -> CampaignResult<DraftItem> {
        let draft = self.draft_of(id, draft_id).await?;
        match draft.state {
            DraftState::Excluded => return Ok(draft),
            DraftState::Pending => {}
            _ => return Err(CampaignError::DraftNotPending),
        }

        if !self
            .repos
            .drafts
            .exclude(draft_id, ExclusionKind::Manual, self.clock.now())
            .await?
        {
            return Err(CampaignError::DraftNotPending);
        }

        info!(
            "Draft {} ({}) of campaign {} excluded",
            draft_id, draft.recipient_address, id
        );
        self.draft_of(id, draft_id).await
    }

    /// Add a draft for a contact the snapshot did not include
    ///
    /// Unsubscribed, suppressed and invalid addresses are refused; exclusion
    /// keywords are overridden.
    pub async fn include_contact(
        &self,
        id: CampaignId,
        contact_id: ContactId,
    ) -> CampaignResult<DraftItem> {
        let campaign = self.get(id).await?;
        if !matches!(
            campaign.status,
            CampaignStatus::Ready | CampaignStatus::Sending | CampaignStatus::Paused
        ) {
            return Err(CampaignError::InvalidTransition {
                action: "add recipients to",
                status: campaign.status,
            });
        }

        let contact = self
            .repos
            .contacts
            .get(contact_id)
            .await?
            .ok_or(CampaignError::ContactNotFound(contact_id))?;
        let settings = self.settings.load().await?;

        let address = match check_eligibility(&contact, &settings) {
            Ok(address) => address,
            Err(SkipReason::Keyword) => contact.email.trim().to_lowercase(),
            Err(reason) => {
                return Err(CampaignError::Ineligible(format!(
                    "{} is {}",
                    contact.email.trim(),
                    reason.as_str()
                )))
            }
        };

        if self
            .repos
            .drafts
            .find_active_by_address(id, &address)
            .await?
            .is_some()
        {
            return Err(CampaignError::Duplicate(address));
        }

        let draft = self.snapshot.draft_for(&campaign, &contact, &settings, true);
        let report = self.repos.drafts.insert_batch(vec![draft]).await?;
        if report.inserted == 0 {
            return Err(CampaignError::Duplicate(address));
        }

        info!("Contact {} ({}) included in campaign {}", contact_id, address, id);
        self.repos
            .drafts
            .find_active_by_address(id, &address)
            .await?
            .ok_or(CampaignError::Duplicate(address))
    }

    /// Send a campaign's content to one recipient now
    ///
    /// Bypasses the rate gate and drafts; the attempt is recorded as a
    /// `test` event whatever its outcome.
    pub async fn send_test(&self, request: TestSendRequest) -> CampaignResult<SendEvent> {
        let campaign = self.get(request.campaign_id).await?;

        let contact = match &request.to {
            TestRecipient::Address(address) => {
                let parsed = EmailAddress::parse(address).ok_or_else(|| {
                    CampaignError::Validation(format!("invalid address: {}", address))
                })?;
                Contact::from_address(parsed.to_string())
            }
            TestRecipient::Contact(contact_id) => self
                .repos
                .contacts
                .get(*contact_id)
                .await?
                .ok_or(CampaignError::ContactNotFound(*contact_id))?,
        };

        let settings = self.settings.load().await?;
        let renderer = self.snapshot.renderer();
        let rendered =
            renderer.render_message(&campaign, &contact, signature_for(&campaign, &settings));
        let recipient = contact.email.trim().to_lowercase();
        let message = self.compose(&campaign, &settings, &recipient, rendered);

        let result = self.sender.send(&message).await;
        let (outcome, provider_message_id, permalink, error) = match result {
            Ok(receipt) => (
                SendOutcome::Sent,
                Some(receipt.provider_message_id),
                receipt.permalink,
                None,
            ),
            Err(e) => {
                warn!("Test send of campaign {} to {} failed: {}", campaign.id, recipient, e);
                (SendOutcome::Failed, None, None, Some(e.to_string()))
            }
        };

        let event = self
            .repos
            .events
            .append(NewSendEvent {
                campaign_id: Some(campaign.id),
                send_run_id: None,
                draft_item_id: None,
                recipient_address: recipient,
                kind: EventKind::Test,
                outcome,
                provider_message_id,
                permalink,
                error,
                at: self.clock.now(),
            })
            .await?;
        self.metrics.record_send(outcome.as_str(), EventKind::Test.as_str());

        Ok(event)
    }

    pub async fn stats(&self, id: CampaignId) -> CampaignResult<CampaignStats> {
        let campaign = self.get(id).await?;
        let drafts = self.repos.drafts.counts(id).await?;
        let settings = self.settings.load().await?;
        let gate = RateGate::new(&settings);
        let now = self.clock.now();

        let sent_today = match gate.day_bounds(now) {
            Some((start, end)) => self.repos.events.count_sent_between(start, end).await?,
            None => 0,
        };

        Ok(CampaignStats {
            campaign_id: id,
            status: campaign.status,
            progress_percentage: drafts.progress_percentage(),
            drafts,
            current_run_id: campaign.current_run_id,
            sent_today,
            daily_quota: gate.daily_quota(),
            last_tick_at: campaign.last_tick_at,
            next_tick_at: campaign.next_tick_at,
            stale: campaign.is_stale(now, self.options.stale_after),
        })
    }

    pub async fn list_drafts(
        &self,
        id: CampaignId,
        state: Option<DraftState>,
        limit: i64,
        offset: i64,
    ) -> CampaignResult<Vec<DraftItem>> {
        self.get(id).await?;
        Ok(self.repos.drafts.list(id, state, limit, offset).await?)
    }

    pub async fn list_events(
        &self,
        id: CampaignId,
        limit: i64,
        offset: i64,
    ) -> CampaignResult<Vec<SendEvent>> {
        self.get(id).await?;
        Ok(self.repos.events.list_by_campaign(id, limit, offset).await?)
    }

    pub async fn runs(&self, id: CampaignId) -> CampaignResult<Vec<SendRun>> {
        self.get(id).await?;
        Ok(self.repos.runs.list_by_campaign(id).await?)
    }

    /// Build the outgoing message for a rendered draft
    pub(crate) fn compose(
        &self,
        campaign: &Campaign,
        settings: &SendSettings,
        to: &str,
        rendered: RenderedMessage,
    ) -> OutgoingMessage {
        OutgoingMessage {
            from_address: campaign
                .sender_alias
                .clone()
                .unwrap_or_else(|| settings.from_address.clone()),
            from_name: campaign
                .sender_name
                .clone()
                .or_else(|| settings.from_name.clone()),
            to: to.to_string(),
            subject: rendered.subject,
            html_body: rendered.html_body,
            text_body: rendered.text_body,
            list_unsubscribe: Some(self.snapshot.renderer().list_unsubscribe_header(to, campaign.id)),
        }
    }

    /// Open a new run and move the campaign into `sending` from `from`
    async fn activate(
        &self,
        campaign: &Campaign,
        from: CampaignStatus,
        action: &'static str,
    ) -> CampaignResult<SendRunId> {
        let now = self.clock.now();
        let run = self.repos.runs.create(campaign.id, now).await?;

        let mut change = StatusTransition::new(&[from], CampaignStatus::Sending, now).with_lock(
            LockChange::Acquire {
                run_id: run.id,
                exclusive: self.options.single_global_slot,
            },
        );
        if from == CampaignStatus::Sending {
            change = change.expecting_run(campaign.current_run_id);
        }

        if let Err(e) = self.apply(campaign.id, change, action).await {
            self.repos
                .runs
                .close(run.id, RunStatus::Aborted, Some(end_reason::SUPERSEDED), now)
                .await?;
            return Err(e);
        }

        info!("Campaign {} sending (run {})", campaign.id, run.id);

        let tick = TickRequest {
            campaign_id: campaign.id,
            send_run_id: run.id,
        };
        if let Err(e) = self.scheduler.schedule(tick, now).await {
            error!(
                "Failed to schedule first tick of campaign {} run {}: {}",
                campaign.id, run.id, e
            );
            return Err(CampaignError::Scheduling(e.to_string()));
        }

        Ok(run.id)
    }

    /// Run a transition and map a lost CAS to an error
    async fn apply(
        &self,
        id: CampaignId,
        change: StatusTransition,
        action: &'static str,
    ) -> CampaignResult<Campaign> {
        let to = change.to;
        match self.repos.campaigns.transition(id, change).await? {
            TransitionOutcome::Applied(campaign) => {
                self.metrics.record_transition(to.as_str());
                Ok(campaign)
            }
            TransitionOutcome::Conflict(current) => Err(CampaignError::InvalidTransition {
                action,
                status: current.status,
            }),
            TransitionOutcome::SlotBusy { holder } => Err(CampaignError::SlotBusy { holder }),
            TransitionOutcome::Missing => Err(CampaignError::NotFound(id)),
        }
    }

    async fn draft_of(&self, id: CampaignId, draft_id: DraftItemId) -> CampaignResult<DraftItem> {
        self.repos
            .drafts
            .get(draft_id)
            .await?
            .filter(|d| d.campaign_id == id)
            .ok_or(CampaignError::DraftNotFound(draft_id))
    }
}
