//! In-memory storage backend
//!
//! Implements every repository trait over plain collections guarded by a
//! single async mutex, so each call observes and mutates a consistent view.
//! Used for development and tests; nothing survives a restart.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use cadence_common::types::{
    normalize_address, CampaignId, ContactId, DraftItemId, JobId, SendRunId,
};
use cadence_common::{Error, Result};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{
    Campaign, CampaignStatus, Contact, CreateCampaign, DraftCounts, DraftItem, DraftState,
    ExclusionKind, InsertReport, Job, JobStatus, LockChange, NewDraftItem, NewSendEvent,
    RecipientFilter, RunStatus, SendEvent, SendOutcome, SendRun, StatusTransition,
    TickHeartbeat, TransitionOutcome,
};
use crate::repository::{
    CampaignRepository, ContactDirectory, DraftRepository, JobRepository, SendEventRepository,
    SendRunRepository,
};

#[derive(Default)]
struct Tables {
    campaigns: HashMap<CampaignId, Campaign>,
    runs: HashMap<SendRunId, SendRun>,
    drafts: Vec<DraftItem>,
    events: Vec<SendEvent>,
    contacts: Vec<Contact>,
    suppressed: HashSet<String>,
    jobs: Vec<Job>,
    next_position: i64,
}

impl Tables {
    fn draft_mut(&mut self, id: DraftItemId) -> Option<&mut DraftItem> {
        self.drafts.iter_mut().find(|d| d.id == id)
    }

    fn with_suppression(&self, contact: &Contact) -> Contact {
        let mut contact = contact.clone();
        contact.suppressed = self.suppressed.contains(&normalize_address(&contact.email));
        contact
    }
}

/// Process-local store implementing all repositories
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_contact(&self, contact: Contact) {
        self.tables.lock().await.contacts.push(contact);
    }

    /// Put an address on the suppression list
    pub async fn suppress(&self, address: &str) {
        self.tables
            .lock()
            .await
            .suppressed
            .insert(normalize_address(address));
    }

    pub async fn set_unsubscribed(&self, contact_id: ContactId, unsubscribed: bool) -> bool {
        let mut tables = self.tables.lock().await;
        match tables.contacts.iter_mut().find(|c| c.id == contact_id) {
            Some(contact) => {
                contact.unsubscribed = unsubscribed;
                true
            }
            None => false,
        }
    }

    /// All jobs, in insertion order
    pub async fn jobs(&self) -> Vec<Job> {
        self.tables.lock().await.jobs.clone()
    }

    /// All send events, in append order
    pub async fn events(&self) -> Vec<SendEvent> {
        self.tables.lock().await.events.clone()
    }
}

#[async_trait]
impl CampaignRepository for MemoryStore {
    async fn create(&self, input: CreateCampaign) -> Result<Campaign> {
        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::now_v7(),
            name: input.name,
            template_ref: input.template_ref,
            subject_template: input.subject_template,
            html_template: input.html_template,
            text_template: input.text_template,
            filter: input.filter,
            sender_alias: input.sender_alias,
            sender_name: input.sender_name,
            signature: input.signature,
            status: CampaignStatus::Draft,
            active_lock: false,
            current_run_id: None,
            last_tick_at: None,
            next_tick_at: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        self.tables
            .lock()
            .await
            .campaigns
            .insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        Ok(self.tables.lock().await.campaigns.get(&id).cloned())
    }

    async fn list(
        &self,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>> {
        let tables = self.tables.lock().await;
        let mut campaigns: Vec<Campaign> = tables
            .campaigns
            .values()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(campaigns
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn transition(
        &self,
        id: CampaignId,
        change: StatusTransition,
    ) -> Result<TransitionOutcome> {
        let mut tables = self.tables.lock().await;

        let holder = match change.lock {
            LockChange::Acquire {
                exclusive: true, ..
            } => tables
                .campaigns
                .values()
                .find(|c| c.active_lock && c.id != id)
                .map(|c| c.id),
            _ => None,
        };

        let Some(campaign) = tables.campaigns.get_mut(&id) else {
            return Ok(TransitionOutcome::Missing);
        };
        if !change.admits(campaign) {
            return Ok(TransitionOutcome::Conflict(campaign.clone()));
        }
        if let Some(holder) = holder {
            return Ok(TransitionOutcome::SlotBusy { holder });
        }

        change.apply(campaign);
        Ok(TransitionOutcome::Applied(campaign.clone()))
    }

    async fn record_tick(
        &self,
        id: CampaignId,
        run_id: SendRunId,
        heartbeat: TickHeartbeat,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.campaigns.get_mut(&id) {
            Some(c) if c.status == CampaignStatus::Sending && c.current_run_id == Some(run_id) => {
                if let Some(at) = heartbeat.last_tick_at {
                    c.last_tick_at = Some(at);
                }
                if let Some(at) = heartbeat.next_tick_at {
                    c.next_tick_at = Some(at);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn lock_holder(&self) -> Result<Option<CampaignId>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .campaigns
            .values()
            .find(|c| c.active_lock)
            .map(|c| c.id))
    }
}

#[async_trait]
impl DraftRepository for MemoryStore {
    async fn insert_batch(&self, drafts: Vec<NewDraftItem>) -> Result<InsertReport> {
        let mut tables = self.tables.lock().await;
        let mut report = InsertReport::default();
        let now = Utc::now();

        for input in drafts {
            let address = normalize_address(&input.recipient_address);
            let duplicate = tables.drafts.iter().any(|d| {
                d.campaign_id == input.campaign_id
                    && d.state != DraftState::Excluded
                    && d.recipient_address == address
            });
            if duplicate {
                report.duplicates += 1;
                continue;
            }

            tables.next_position += 1;
            let position = tables.next_position;
            tables.drafts.push(DraftItem {
                id: Uuid::now_v7(),
                campaign_id: input.campaign_id,
                contact_id: input.contact_id,
                recipient_address: address,
                subject: input.subject,
                html_body: input.html_body,
                text_body: input.text_body,
                state: DraftState::Pending,
                error: None,
                manual_include: input.manual_include,
                manual_exclude: false,
                provider_message_id: None,
                permalink: None,
                claim_token: None,
                claimed_at: None,
                position,
                created_at: now,
                updated_at: now,
            });
            report.inserted += 1;
        }

        Ok(report)
    }

    async fn get(&self, id: DraftItemId) -> Result<Option<DraftItem>> {
        let tables = self.tables.lock().await;
        Ok(tables.drafts.iter().find(|d| d.id == id).cloned())
    }

    async fn next_pending_batch(
        &self,
        campaign_id: CampaignId,
        limit: i64,
        claim_cutoff: DateTime<Utc>,
    ) -> Result<Vec<DraftItem>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .drafts
            .iter()
            .filter(|d| d.campaign_id == campaign_id && d.is_claimable(claim_cutoff))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn claim(
        &self,
        id: DraftItemId,
        token: Uuid,
        at: DateTime<Utc>,
        claim_cutoff: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.draft_mut(id) {
            Some(d) if d.is_claimable(claim_cutoff) => {
                d.claim_token = Some(token);
                d.claimed_at = Some(at);
                d.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_sent(
        &self,
        id: DraftItemId,
        provider_message_id: &str,
        permalink: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.draft_mut(id) {
            Some(d) if d.state == DraftState::Pending => {
                d.state = DraftState::Sent;
                d.provider_message_id = Some(provider_message_id.to_string());
                d.permalink = permalink.map(str::to_string);
                d.error = None;
                d.claim_token = None;
                d.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(&self, id: DraftItemId, error: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.draft_mut(id) {
            Some(d) if d.state == DraftState::Pending => {
                d.state = DraftState::Failed;
                d.error = Some(error.to_string());
                d.claim_token = None;
                d.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn exclude(
        &self,
        id: DraftItemId,
        kind: ExclusionKind,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.draft_mut(id) {
            Some(d) if d.state == DraftState::Pending => {
                d.state = DraftState::Excluded;
                d.manual_exclude = kind == ExclusionKind::Manual;
                d.claim_token = None;
                d.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_pending(&self, campaign_id: CampaignId) -> Result<i64> {
        Ok(self.counts(campaign_id).await?.pending)
    }

    async fn counts(&self, campaign_id: CampaignId) -> Result<DraftCounts> {
        let tables = self.tables.lock().await;
        let mut counts = DraftCounts::default();
        for draft in tables.drafts.iter().filter(|d| d.campaign_id == campaign_id) {
            counts.add(draft.state);
        }
        Ok(counts)
    }

    async fn find_active_by_address(
        &self,
        campaign_id: CampaignId,
        address: &str,
    ) -> Result<Option<DraftItem>> {
        let address = normalize_address(address);
        let tables = self.tables.lock().await;
        Ok(tables
            .drafts
            .iter()
            .find(|d| {
                d.campaign_id == campaign_id
                    && d.state != DraftState::Excluded
                    && d.recipient_address == address
            })
            .cloned())
    }

    async fn list(
        &self,
        campaign_id: CampaignId,
        state: Option<DraftState>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DraftItem>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .drafts
            .iter()
            .filter(|d| d.campaign_id == campaign_id && state.map_or(true, |s| d.state == s))
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn release_claims(&self, campaign_id: CampaignId) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let mut released = 0;
        for draft in tables.drafts.iter_mut().filter(|d| {
            d.campaign_id == campaign_id && d.state == DraftState::Pending && d.claim_token.is_some()
        }) {
            draft.claim_token = None;
            draft.claimed_at = None;
            released += 1;
        }
        Ok(released)
    }

    async fn delete_by_campaign(&self, campaign_id: CampaignId) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.drafts.len();
        tables.drafts.retain(|d| d.campaign_id != campaign_id);
        Ok((before - tables.drafts.len()) as u64)
    }
}

#[async_trait]
impl SendRunRepository for MemoryStore {
    async fn create(&self, campaign_id: CampaignId, at: DateTime<Utc>) -> Result<SendRun> {
        let run = SendRun {
            id: Uuid::now_v7(),
            campaign_id,
            status: RunStatus::InProgress,
            end_reason: None,
            started_at: at,
            ended_at: None,
        };
        self.tables.lock().await.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get(&self, id: SendRunId) -> Result<Option<SendRun>> {
        Ok(self.tables.lock().await.runs.get(&id).cloned())
    }

    async fn close(
        &self,
        id: SendRunId,
        status: RunStatus,
        end_reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.runs.get_mut(&id) {
            Some(run) if run.status == RunStatus::InProgress => {
                run.status = status;
                run.end_reason = end_reason.map(str::to_string);
                run.ended_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<SendRun>> {
        let tables = self.tables.lock().await;
        let mut runs: Vec<SendRun> = tables
            .runs
            .values()
            .filter(|r| r.campaign_id == campaign_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.started_at);
        Ok(runs)
    }
}

#[async_trait]
impl SendEventRepository for MemoryStore {
    async fn append(&self, event: NewSendEvent) -> Result<SendEvent> {
        let event = SendEvent {
            id: Uuid::now_v7(),
            campaign_id: event.campaign_id,
            send_run_id: event.send_run_id,
            draft_item_id: event.draft_item_id,
            recipient_address: event.recipient_address,
            kind: event.kind,
            outcome: event.outcome,
            provider_message_id: event.provider_message_id,
            permalink: event.permalink,
            error: event.error,
            created_at: event.at,
        };
        self.tables.lock().await.events.push(event.clone());
        Ok(event)
    }

    async fn count_sent_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .events
            .iter()
            .filter(|e| e.outcome == SendOutcome::Sent && e.created_at >= from && e.created_at < to)
            .count() as i64)
    }

    async fn last_sent_in_run(&self, run_id: SendRunId) -> Result<Option<DateTime<Utc>>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .events
            .iter()
            .filter(|e| e.send_run_id == Some(run_id) && e.outcome == SendOutcome::Sent)
            .map(|e| e.created_at)
            .max())
    }

    async fn list_by_campaign(
        &self,
        campaign_id: CampaignId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SendEvent>> {
        let tables = self.tables.lock().await;
        let mut events: Vec<SendEvent> = tables
            .events
            .iter()
            .filter(|e| e.campaign_id == Some(campaign_id))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(events
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

#[async_trait]
impl ContactDirectory for MemoryStore {
    async fn get(&self, id: ContactId) -> Result<Option<Contact>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .contacts
            .iter()
            .find(|c| c.id == id)
            .map(|c| tables.with_suppression(c)))
    }

    async fn find(&self, filter: &RecipientFilter) -> Result<Vec<Contact>> {
        let tables = self.tables.lock().await;
        let mut contacts: Vec<Contact> = tables
            .contacts
            .iter()
            .filter(|c| filter.matches(c))
            .map(|c| tables.with_suppression(c))
            .collect();
        contacts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(contacts)
    }

    async fn is_suppressed(&self, address: &str) -> Result<bool> {
        let address = normalize_address(address);
        let tables = self.tables.lock().await;
        Ok(tables.suppressed.contains(&address)
            || tables
                .contacts
                .iter()
                .any(|c| c.unsubscribed && normalize_address(&c.email) == address))
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        scheduled_at: DateTime<Utc>,
    ) -> Result<JobId> {
        let job = Job {
            id: Uuid::now_v7(),
            queue: queue.to_string(),
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            last_error: None,
            scheduled_at,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        };
        let id = job.id;
        self.tables.lock().await.jobs.push(job);
        Ok(id)
    }

    async fn claim_due(&self, queue: &str, limit: i64, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let mut tables = self.tables.lock().await;
        let mut due: Vec<&mut Job> = tables
            .jobs
            .iter_mut()
            .filter(|j| j.queue == queue && j.status == JobStatus::Pending && j.scheduled_at <= now)
            .collect();
        due.sort_by_key(|j| j.scheduled_at);

        Ok(due
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|job| {
                job.status = JobStatus::Running;
                job.started_at = Some(now);
                job.attempts += 1;
                job.clone()
            })
            .collect())
    }

    async fn complete(&self, id: JobId, at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let job = tables
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;
        job.status = JobStatus::Completed;
        job.completed_at = Some(at);
        Ok(())
    }

    async fn fail(&self, id: JobId, error: &str, at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let job = tables
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;
        job.status = JobStatus::Failed;
        job.last_error = Some(error.to_string());
        job.completed_at = Some(at);
        Ok(())
    }

    async fn count_by_status(&self, queue: &str, status: JobStatus) -> Result<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .jobs
            .iter()
            .filter(|j| j.queue == queue && j.status == status)
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn draft(campaign_id: CampaignId, address: &str) -> NewDraftItem {
        NewDraftItem {
            campaign_id,
            contact_id: None,
            recipient_address: address.to_string(),
            subject: "Hello".into(),
            html_body: None,
            text_body: Some("Hi".into()),
            manual_include: false,
        }
    }

    async fn campaign(store: &MemoryStore) -> Campaign {
        CampaignRepository::create(
            store,
            CreateCampaign {
                name: "launch".into(),
                subject_template: "Hello".into(),
                text_template: Some("Hi".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_batch_dedups_case_insensitively() {
        let store = MemoryStore::new();
        let c = campaign(&store).await;

        let report = store
            .insert_batch(vec![
                draft(c.id, "A@example.com"),
                draft(c.id, " a@example.com "),
                draft(c.id, "b@example.com"),
            ])
            .await
            .unwrap();
        assert_eq!(report, InsertReport { inserted: 2, duplicates: 1 });

        // excluded rows no longer block the address
        let existing = store.find_active_by_address(c.id, "a@EXAMPLE.com").await.unwrap().unwrap();
        assert!(store.exclude(existing.id, ExclusionKind::Manual, Utc::now()).await.unwrap());
        let report = store.insert_batch(vec![draft(c.id, "a@example.com")]).await.unwrap();
        assert_eq!(report.inserted, 1);

        let counts = store.counts(c.id).await.unwrap();
        assert_eq!(counts, DraftCounts { pending: 2, sent: 0, failed: 0, excluded: 1 });
    }

    #[tokio::test]
    async fn test_marks_are_one_way() {
        let store = MemoryStore::new();
        let c = campaign(&store).await;
        store.insert_batch(vec![draft(c.id, "a@example.com")]).await.unwrap();
        let item = store.next_pending_batch(c.id, 10, Utc::now()).await.unwrap().remove(0);

        let now = Utc::now();
        assert!(store.mark_sent(item.id, "<id@host>", None, now).await.unwrap());
        assert!(!store.mark_sent(item.id, "<other@host>", None, now).await.unwrap());
        assert!(!store.mark_failed(item.id, "boom", now).await.unwrap());
        assert!(!store.exclude(item.id, ExclusionKind::Manual, now).await.unwrap());

        let item = DraftRepository::get(&store, item.id).await.unwrap().unwrap();
        assert_eq!(item.state, DraftState::Sent);
        assert_eq!(item.provider_message_id.as_deref(), Some("<id@host>"));
    }

    #[tokio::test]
    async fn test_claims_hide_items_until_cutoff() {
        let store = MemoryStore::new();
        let c = campaign(&store).await;
        store
            .insert_batch(vec![draft(c.id, "a@example.com"), draft(c.id, "b@example.com")])
            .await
            .unwrap();

        let now = Utc::now();
        let cutoff = now - Duration::minutes(15);
        let batch = store.next_pending_batch(c.id, 10, cutoff).await.unwrap();
        assert_eq!(batch.len(), 2);

        assert!(store.claim(batch[0].id, Uuid::new_v4(), now, cutoff).await.unwrap());
        assert!(!store.claim(batch[0].id, Uuid::new_v4(), now, cutoff).await.unwrap());

        let remaining = store.next_pending_batch(c.id, 10, cutoff).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, batch[1].id);

        // an old claim is reclaimable
        let later = now + Duration::minutes(16);
        let later_cutoff = later - Duration::minutes(15);
        assert_eq!(store.next_pending_batch(c.id, 10, later_cutoff).await.unwrap().len(), 2);

        assert_eq!(store.release_claims(c.id).await.unwrap(), 1);
        assert_eq!(store.next_pending_batch(c.id, 10, cutoff).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_exclusive_acquire_reports_holder() {
        let store = MemoryStore::new();
        let first = campaign(&store).await;
        let second = campaign(&store).await;
        let now = Utc::now();

        for c in [&first, &second] {
            let to_ready = StatusTransition::new(&[CampaignStatus::Draft], CampaignStatus::Ready, now);
            store.transition(c.id, to_ready).await.unwrap();
        }

        let acquire = |run_id| {
            StatusTransition::new(&[CampaignStatus::Ready], CampaignStatus::Sending, now)
                .with_lock(LockChange::Acquire { run_id, exclusive: true })
        };

        let outcome = store.transition(first.id, acquire(Uuid::new_v4())).await.unwrap();
        assert!(matches!(outcome, TransitionOutcome::Applied(_)));

        let outcome = store.transition(second.id, acquire(Uuid::new_v4())).await.unwrap();
        match outcome {
            TransitionOutcome::SlotBusy { holder } => assert_eq!(holder, first.id),
            other => panic!("expected SlotBusy, got {:?}", other),
        }

        let outcome = store.transition(first.id, acquire(Uuid::new_v4())).await.unwrap();
        assert!(matches!(outcome, TransitionOutcome::Conflict(_)));
        assert_eq!(store.lock_holder().await.unwrap(), Some(first.id));
    }

    #[tokio::test]
    async fn test_event_counts_respect_bounds() {
        let store = MemoryStore::new();
        let run = Uuid::new_v4();
        let base = Utc::now();
        for (offset, outcome) in [(0, SendOutcome::Sent), (10, SendOutcome::Failed), (20, SendOutcome::Sent)] {
            store
                .append(NewSendEvent {
                    campaign_id: None,
                    send_run_id: Some(run),
                    draft_item_id: None,
                    recipient_address: "a@example.com".into(),
                    kind: crate::models::EventKind::Campaign,
                    outcome,
                    provider_message_id: None,
                    permalink: None,
                    error: None,
                    at: base + Duration::seconds(offset),
                })
                .await
                .unwrap();
        }

        assert_eq!(store.count_sent_between(base, base + Duration::seconds(20)).await.unwrap(), 1);
        assert_eq!(store.count_sent_between(base, base + Duration::seconds(21)).await.unwrap(), 2);
        assert_eq!(
            store.last_sent_in_run(run).await.unwrap(),
            Some(base + Duration::seconds(20))
        );
    }

    #[tokio::test]
    async fn test_jobs_claimed_once() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.enqueue("q", serde_json::json!({"n": 1}), now).await.unwrap();
        store
            .enqueue("q", serde_json::json!({"n": 2}), now + Duration::minutes(5))
            .await
            .unwrap();

        let due = store.claim_due("q", 10, now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert!(store.claim_due("q", 10, now).await.unwrap().is_empty());

        store.complete(due[0].id, now).await.unwrap();
        assert_eq!(store.count_by_status("q", JobStatus::Completed).await.unwrap(), 1);
        assert_eq!(store.count_by_status("q", JobStatus::Pending).await.unwrap(), 1);
    }
}
