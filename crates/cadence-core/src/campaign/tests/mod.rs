//! Scenario tests for the campaign engine
//!
//! Everything runs against the in-memory store with a manual clock, a
//! recording sender and a recording tick scheduler.

mod dispatch;
mod properties;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cadence_common::SendSettings;
use cadence_storage::{
    Campaign, Contact, CreateCampaign, MemoryStore, Repositories,
    StaticSettings,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{CampaignManager, EngineOptions, SnapshotBuilder, TemplateRenderer, TickDispatcher, TickOutcome};
use crate::clock::ManualClock;
use crate::metrics::EngineMetrics;
use crate::queue::{SchedulingError, TickRequest, TickScheduler};
use crate::sender::{MailSender, OutgoingMessage, SendError, SendReceipt};

pub(super) fn at(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

/// Friday 2026-10-16, 10:00 UTC
pub(super) const START: &str = "2026-10-16T10:00:00Z";

#[derive(Default)]
pub(super) struct RecordingSender {
    sent: Mutex<Vec<OutgoingMessage>>,
    reject: Mutex<HashSet<String>>,
}

impl RecordingSender {
    pub(super) fn reject(&self, address: &str) {
        self.reject.lock().unwrap().insert(address.to_string());
    }

    pub(super) fn recipients(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|m| m.to.clone()).collect()
    }

    pub(super) fn messages(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailSender for RecordingSender {
    async fn send(&self, message: &OutgoingMessage) -> Result<SendReceipt, SendError> {
        if self.reject.lock().unwrap().contains(&message.to) {
            return Err(SendError::Rejected("550 mailbox unavailable".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(message.clone());
        let n = sent.len();
        Ok(SendReceipt {
            provider_message_id: format!("<{}@test>", n),
            permalink: Some(format!("https://archive.example.com/m/{}", n)),
        })
    }
}

#[derive(Default)]
pub(super) struct RecordingScheduler {
    ticks: Mutex<Vec<(TickRequest, DateTime<Utc>)>>,
    failing: AtomicBool,
}

impl RecordingScheduler {
    pub(super) fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(super) fn scheduled(&self) -> Vec<(TickRequest, DateTime<Utc>)> {
        self.ticks.lock().unwrap().clone()
    }

    pub(super) fn last(&self) -> Option<(TickRequest, DateTime<Utc>)> {
        self.ticks.lock().unwrap().last().copied()
    }
}

#[async_trait]
impl TickScheduler for RecordingScheduler {
    async fn schedule(&self, tick: TickRequest, at: DateTime<Utc>) -> Result<(), SchedulingError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SchedulingError::Closed);
        }
        self.ticks.lock().unwrap().push((tick, at));
        Ok(())
    }
}

pub(super) struct Harness {
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub settings: Arc<StaticSettings>,
    pub sender: Arc<RecordingSender>,
    pub scheduler: Arc<RecordingScheduler>,
    pub manager: Arc<CampaignManager>,
    pub dispatcher: TickDispatcher,
}

impl Harness {
    pub(super) fn new(settings: SendSettings) -> Self {
        Self::with_options(settings, EngineOptions::default())
    }

    pub(super) fn with_options(settings: SendSettings, options: EngineOptions) -> Self {
        let store = MemoryStore::new();
        let repos = Repositories::memory(store.clone());
        let clock = Arc::new(ManualClock::new(at(START)));
        let sender = Arc::new(RecordingSender::default());
        let scheduler = Arc::new(RecordingScheduler::default());
        let settings = Arc::new(StaticSettings::new(settings));
        let renderer = TemplateRenderer::new("https://example.com/unsubscribe", "secret").unwrap();

        let manager = CampaignManager::new(
            repos.clone(),
            settings.clone(),
            scheduler.clone(),
            sender.clone(),
            SnapshotBuilder::new(repos.contacts.clone(), renderer),
            EngineMetrics::new().unwrap(),
        )
        .with_options(options)
        .with_clock(clock.clone());
        let manager = Arc::new(manager);

        Self {
            store,
            clock,
            settings,
            sender,
            scheduler,
            dispatcher: TickDispatcher::new(manager.clone()),
            manager,
        }
    }

    /// Add contacts `c0@example.com` .. in creation order
    pub(super) async fn add_contacts(&self, count: usize) -> Vec<Contact> {
        let mut contacts = Vec::new();
        for i in 0..count {
            let mut contact = Contact::from_address(format!("c{}@example.com", i));
            contact.id = Uuid::new_v4();
            contact.first_name = Some(format!("Contact{}", i));
            contact.created_at = at(START) + chrono::Duration::seconds(i as i64);
            self.store.add_contact(contact.clone()).await;
            contacts.push(contact);
        }
        contacts
    }

    pub(super) async fn campaign(&self, name: &str) -> Campaign {
        self.manager
            .create(CreateCampaign {
                name: name.into(),
                subject_template: "Hello {{first_name}}".into(),
                text_template: Some("News for {{email}}".into()),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    /// A campaign with drafts for every contact, in `ready`
    pub(super) async fn ready_campaign(&self, name: &str) -> Campaign {
        let campaign = self.campaign(name).await;
        self.manager.generate_snapshot(campaign.id, false).await.unwrap();
        self.manager.get(campaign.id).await.unwrap()
    }

    /// Run the most recently scheduled tick at its due time
    pub(super) async fn run_next_tick(&self) -> TickOutcome {
        let (tick, due) = self.scheduler.last().expect("a tick is scheduled");
        if due > self.clock_now() {
            self.clock.set(due);
        }
        self.dispatcher.dispatch(tick).await.unwrap()
    }

    /// Follow the tick chain until it stops rescheduling
    pub(super) async fn run_to_end(&self) -> Vec<TickOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let outcome = self.run_next_tick().await;
            let done = !matches!(outcome, TickOutcome::Rescheduled { .. });
            outcomes.push(outcome);
            if done || outcomes.len() > 50 {
                return outcomes;
            }
        }
    }

    pub(super) fn clock_now(&self) -> DateTime<Utc> {
        use crate::clock::Clock;
        self.clock.now()
    }
}
