//! Domain models for Cadence storage

use chrono::{DateTime, Duration, Utc};
use cadence_common::types::{
    CampaignId, ContactId, DraftItemId, JobId, SendEventId, SendRunId,
};
use cadence_common::Error;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Campaigns
// ============================================================================

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Ready,
    Sending,
    Paused,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Ready => "ready",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "ready" => Ok(CampaignStatus::Ready),
            "sending" => Ok(CampaignStatus::Sending),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "failed" => Ok(CampaignStatus::Failed),
            _ => Err(Error::Validation(format!("Invalid campaign status: {}", s))),
        }
    }
}

/// Selects the contacts a snapshot draws from
///
/// An empty filter selects every contact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientFilter {
    /// Contact must carry at least one of these tags
    #[serde(default)]
    pub tags_any: Vec<String>,

    /// Contact must carry all of these tags
    #[serde(default)]
    pub tags_all: Vec<String>,

    /// Contact must carry none of these tags
    #[serde(default)]
    pub exclude_tags: Vec<String>,

    /// Restrict to an explicit set of contacts
    #[serde(default)]
    pub contact_ids: Option<Vec<ContactId>>,
}

impl RecipientFilter {
    pub fn matches(&self, contact: &Contact) -> bool {
        let has = |tag: &String| contact.tags.iter().any(|t| t == tag);

        if !self.tags_any.is_empty() && !self.tags_any.iter().any(has) {
            return false;
        }
        if !self.tags_all.iter().all(has) {
            return false;
        }
        if self.exclude_tags.iter().any(has) {
            return false;
        }
        match &self.contact_ids {
            Some(ids) => ids.contains(&contact.id),
            None => true,
        }
    }
}

/// Campaign model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    /// Identifier of the template this campaign was created from
    pub template_ref: Option<String>,
    pub subject_template: String,
    pub html_template: Option<String>,
    pub text_template: Option<String>,
    pub filter: RecipientFilter,
    pub sender_alias: Option<String>,
    pub sender_name: Option<String>,
    /// Overrides the default signature when set
    pub signature: Option<String>,
    pub status: CampaignStatus,
    /// True while this campaign holds the sending slot
    pub active_lock: bool,
    pub current_run_id: Option<SendRunId>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub next_tick_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Whether a tick for `run_id` may still act on this campaign
    pub fn accepts_tick(&self, run_id: SendRunId) -> bool {
        self.status == CampaignStatus::Sending
            && self.active_lock
            && self.current_run_id == Some(run_id)
    }

    /// A sending campaign is stale when its next tick is overdue by more than
    /// `threshold`, or when no tick was ever planned.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        if self.status != CampaignStatus::Sending {
            return false;
        }
        match self.next_tick_at.or(self.last_tick_at) {
            Some(expected) => now - expected > threshold,
            None => true,
        }
    }
}

/// Create campaign input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateCampaign {
    pub name: String,
    #[serde(default)]
    pub template_ref: Option<String>,
    pub subject_template: String,
    #[serde(default)]
    pub html_template: Option<String>,
    #[serde(default)]
    pub text_template: Option<String>,
    #[serde(default)]
    pub filter: RecipientFilter,
    #[serde(default)]
    pub sender_alias: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

/// Effect of a status transition on the sending slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockChange {
    /// Leave `active_lock` and `current_run_id` untouched
    Keep,
    /// Take the slot for `run_id` and plan the first tick at the transition
    /// time. With `exclusive`, no other campaign may hold a slot.
    Acquire { run_id: SendRunId, exclusive: bool },
    /// Drop the slot and clear the run
    Release,
}

/// A compare-and-set status change
#[derive(Debug, Clone)]
pub struct StatusTransition {
    /// The campaign must currently be in one of these
    pub from: Vec<CampaignStatus>,
    /// When set, the campaign's current run must match
    pub expected_run: Option<SendRunId>,
    pub to: CampaignStatus,
    pub lock: LockChange,
    pub failure_reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusTransition {
    pub fn new(from: &[CampaignStatus], to: CampaignStatus, at: DateTime<Utc>) -> Self {
        Self {
            from: from.to_vec(),
            expected_run: None,
            to,
            lock: LockChange::Keep,
            failure_reason: None,
            at,
        }
    }

    pub fn expecting_run(mut self, run_id: Option<SendRunId>) -> Self {
        self.expected_run = run_id;
        self
    }

    pub fn with_lock(mut self, lock: LockChange) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_failure(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    /// Apply to an in-memory campaign. The caller has already checked the
    /// preconditions.
    pub fn apply(&self, campaign: &mut Campaign) {
        campaign.status = self.to;
        match self.lock {
            LockChange::Keep => {}
            LockChange::Acquire { run_id, .. } => {
                campaign.active_lock = true;
                campaign.current_run_id = Some(run_id);
                campaign.next_tick_at = Some(self.at);
            }
            LockChange::Release => {
                campaign.active_lock = false;
                campaign.current_run_id = None;
                campaign.next_tick_at = None;
            }
        }
        campaign.failure_reason = self.failure_reason.clone();
        if self.to == CampaignStatus::Sending && campaign.started_at.is_none() {
            campaign.started_at = Some(self.at);
        }
        if self.to == CampaignStatus::Completed {
            campaign.completed_at = Some(self.at);
        }
        campaign.updated_at = self.at;
    }

    /// Whether the campaign satisfies `from` and `expected_run`
    pub fn admits(&self, campaign: &Campaign) -> bool {
        self.from.contains(&campaign.status)
            && self
                .expected_run
                .map_or(true, |run| campaign.current_run_id == Some(run))
    }
}

/// Result of a compare-and-set transition
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Applied(Campaign),
    /// Preconditions no longer hold; carries the current row
    Conflict(Campaign),
    /// Another campaign holds the sending slot
    SlotBusy { holder: CampaignId },
    Missing,
}

/// Tick bookkeeping; `None` fields are left unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct TickHeartbeat {
    pub last_tick_at: Option<DateTime<Utc>>,
    pub next_tick_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Send runs
// ============================================================================

/// Send run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(RunStatus::InProgress),
            "completed" => Ok(RunStatus::Completed),
            "aborted" => Ok(RunStatus::Aborted),
            _ => Err(Error::Validation(format!("Invalid run status: {}", s))),
        }
    }
}

/// Why a run ended before completing
pub mod end_reason {
    pub const PAUSED: &str = "paused";
    pub const STALE_RETRY: &str = "stale_retry";
    pub const NO_WINDOW: &str = "no_window";
    pub const SUPERSEDED: &str = "superseded";
}

/// One attempt to drive a campaign to completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRun {
    pub id: SendRunId,
    pub campaign_id: CampaignId,
    pub status: RunStatus,
    pub end_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Drafts
// ============================================================================

/// Draft item state
///
/// `pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftState {
    Pending,
    Sent,
    Failed,
    Excluded,
}

impl DraftState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftState::Pending => "pending",
            DraftState::Sent => "sent",
            DraftState::Failed => "failed",
            DraftState::Excluded => "excluded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DraftState::Pending)
    }
}

impl std::fmt::Display for DraftState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DraftState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DraftState::Pending),
            "sent" => Ok(DraftState::Sent),
            "failed" => Ok(DraftState::Failed),
            "excluded" => Ok(DraftState::Excluded),
            _ => Err(Error::Validation(format!("Invalid draft state: {}", s))),
        }
    }
}

/// How a draft came to be excluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionKind {
    /// Operator excluded it
    Manual,
    /// Recipient became ineligible before sending
    Ineligible,
}

/// A pre-rendered message for one recipient of one campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftItem {
    pub id: DraftItemId,
    pub campaign_id: CampaignId,
    pub contact_id: Option<ContactId>,
    /// Trimmed, lowercased recipient address
    pub recipient_address: String,
    pub subject: String,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    pub state: DraftState,
    pub error: Option<String>,
    pub manual_include: bool,
    pub manual_exclude: bool,
    pub provider_message_id: Option<String>,
    pub permalink: Option<String>,
    #[serde(skip_serializing)]
    pub claim_token: Option<Uuid>,
    pub claimed_at: Option<DateTime<Utc>>,
    /// Insertion order within the store
    pub position: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DraftItem {
    /// Claimable when pending and not held by a claim newer than `cutoff`
    pub fn is_claimable(&self, cutoff: DateTime<Utc>) -> bool {
        self.state == DraftState::Pending
            && match (self.claim_token, self.claimed_at) {
                (Some(_), Some(at)) => at < cutoff,
                _ => true,
            }
    }
}

/// New draft input
#[derive(Debug, Clone, PartialEq)]
pub struct NewDraftItem {
    pub campaign_id: CampaignId,
    pub contact_id: Option<ContactId>,
    pub recipient_address: String,
    pub subject: String,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    pub manual_include: bool,
}

/// Result of a batch insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsertReport {
    pub inserted: u64,
    /// Rows skipped because a non-excluded draft with the same address exists
    pub duplicates: u64,
}

/// Draft counts by state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftCounts {
    pub pending: i64,
    pub sent: i64,
    pub failed: i64,
    pub excluded: i64,
}

impl DraftCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.sent + self.failed + self.excluded
    }

    pub fn terminal(&self) -> i64 {
        self.sent + self.failed + self.excluded
    }

    pub fn add(&mut self, state: DraftState) {
        match state {
            DraftState::Pending => self.pending += 1,
            DraftState::Sent => self.sent += 1,
            DraftState::Failed => self.failed += 1,
            DraftState::Excluded => self.excluded += 1,
        }
    }

    /// Share of drafts in a terminal state, in percent
    pub fn progress_percentage(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            (self.terminal() as f64 / total as f64) * 100.0
        }
    }
}

// ============================================================================
// Send events
// ============================================================================

/// Delivery outcome recorded in the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendOutcome {
    Sent,
    Failed,
}

impl SendOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendOutcome::Sent => "sent",
            SendOutcome::Failed => "failed",
        }
    }
}

impl std::str::FromStr for SendOutcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(SendOutcome::Sent),
            "failed" => Ok(SendOutcome::Failed),
            _ => Err(Error::Validation(format!("Invalid send outcome: {}", s))),
        }
    }
}

/// Whether an event belongs to a campaign run or a manual test send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Campaign,
    Test,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Campaign => "campaign",
            EventKind::Test => "test",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "campaign" => Ok(EventKind::Campaign),
            "test" => Ok(EventKind::Test),
            _ => Err(Error::Validation(format!("Invalid event kind: {}", s))),
        }
    }
}

/// Append-only record of a send attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEvent {
    pub id: SendEventId,
    pub campaign_id: Option<CampaignId>,
    pub send_run_id: Option<SendRunId>,
    pub draft_item_id: Option<DraftItemId>,
    pub recipient_address: String,
    pub kind: EventKind,
    pub outcome: SendOutcome,
    pub provider_message_id: Option<String>,
    /// Link to the sent message in the provider's archive
    pub permalink: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// New send event input
#[derive(Debug, Clone)]
pub struct NewSendEvent {
    pub campaign_id: Option<CampaignId>,
    pub send_run_id: Option<SendRunId>,
    pub draft_item_id: Option<DraftItemId>,
    pub recipient_address: String,
    pub kind: EventKind,
    pub outcome: SendOutcome,
    pub provider_message_id: Option<String>,
    pub permalink: Option<String>,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

// ============================================================================
// Contacts
// ============================================================================

/// Address book entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form merge fields
    #[serde(default)]
    pub fields: serde_json::Value,
    #[serde(default)]
    pub unsubscribed: bool,
    /// Address appears on the suppression list
    #[serde(default)]
    pub suppressed: bool,
    pub created_at: DateTime<Utc>,
}

impl Contact {
    /// A contact known only by address
    pub fn from_address(email: impl Into<String>) -> Self {
        Self {
            id: Uuid::nil(),
            email: email.into(),
            first_name: None,
            last_name: None,
            tags: Vec::new(),
            fields: serde_json::json!({}),
            unsubscribed: false,
            suppressed: false,
            created_at: Utc::now(),
        }
    }

    pub fn full_name(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(f), Some(l)) => Some(format!("{} {}", f, l)),
            (Some(f), None) => Some(f.clone()),
            (None, Some(l)) => Some(l.clone()),
            (None, None) => None,
        }
    }
}

// ============================================================================
// Jobs
// ============================================================================

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(Error::Validation(format!("Invalid job status: {}", s))),
        }
    }
}

/// Deferred unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn campaign(status: CampaignStatus) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::new_v4(),
            name: "spring".into(),
            template_ref: None,
            subject_template: "Hi".into(),
            html_template: None,
            text_template: Some("Hello".into()),
            filter: RecipientFilter::default(),
            sender_alias: None,
            sender_name: None,
            signature: None,
            status,
            active_lock: false,
            current_run_id: None,
            last_tick_at: None,
            next_tick_at: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    fn contact(tags: &[&str]) -> Contact {
        Contact {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Contact::from_address("a@example.com")
        }
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            CampaignStatus::Draft,
            CampaignStatus::Ready,
            CampaignStatus::Sending,
            CampaignStatus::Paused,
            CampaignStatus::Completed,
            CampaignStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<CampaignStatus>().unwrap(), status);
        }
        assert!("scheduled".parse::<CampaignStatus>().is_err());
    }

    #[test]
    fn test_filter_matching() {
        let filter = RecipientFilter {
            tags_any: vec!["news".into(), "promo".into()],
            exclude_tags: vec!["vip".into()],
            ..Default::default()
        };
        assert!(filter.matches(&contact(&["news"])));
        assert!(!filter.matches(&contact(&["other"])));
        assert!(!filter.matches(&contact(&["promo", "vip"])));
        assert!(RecipientFilter::default().matches(&contact(&[])));
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let threshold = Duration::seconds(900);

        let mut c = campaign(CampaignStatus::Sending);
        assert!(c.is_stale(now, threshold), "no tick ever planned");

        c.next_tick_at = Some(now - Duration::seconds(60));
        assert!(!c.is_stale(now, threshold));

        c.next_tick_at = Some(now - Duration::seconds(901));
        assert!(c.is_stale(now, threshold));

        let paused = campaign(CampaignStatus::Paused);
        assert!(!paused.is_stale(now, threshold));
    }

    #[test]
    fn test_transition_apply() {
        let now = Utc::now();
        let run = Uuid::new_v4();
        let mut c = campaign(CampaignStatus::Ready);
        let t = StatusTransition::new(&[CampaignStatus::Ready], CampaignStatus::Sending, now)
            .with_lock(LockChange::Acquire { run_id: run, exclusive: true });
        assert!(t.admits(&c));
        t.apply(&mut c);
        assert!(c.accepts_tick(run));
        assert_eq!(c.next_tick_at, Some(now));
        assert_eq!(c.started_at, Some(now));

        let release = StatusTransition::new(&[CampaignStatus::Sending], CampaignStatus::Paused, now)
            .expecting_run(Some(Uuid::new_v4()))
            .with_lock(LockChange::Release);
        assert!(!release.admits(&c));
    }

    #[test]
    fn test_draft_claimable() {
        let now = Utc::now();
        let mut item = DraftItem {
            id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            contact_id: None,
            recipient_address: "a@example.com".into(),
            subject: "s".into(),
            html_body: None,
            text_body: Some("t".into()),
            state: DraftState::Pending,
            error: None,
            manual_include: false,
            manual_exclude: false,
            provider_message_id: None,
            permalink: None,
            claim_token: None,
            claimed_at: None,
            position: 1,
            created_at: now,
            updated_at: now,
        };
        assert!(item.is_claimable(now));
        item.claim_token = Some(Uuid::new_v4());
        item.claimed_at = Some(now);
        assert!(!item.is_claimable(now - Duration::seconds(900)));
        assert!(item.is_claimable(now + Duration::seconds(1)));
        item.state = DraftState::Sent;
        assert!(!item.is_claimable(now + Duration::seconds(1)));
    }
}
