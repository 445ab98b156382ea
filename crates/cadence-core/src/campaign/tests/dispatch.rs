use std::sync::Arc;

use cadence_common::SendSettings;
use cadence_storage::{
    CampaignStatus, DraftState, EventKind, JobRepository, JobStatus, Repositories, SendOutcome,
    StaticSettings,
};
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use uuid::Uuid;

use super::{at, Harness, RecordingSender, START};
use crate::campaign::{
    CampaignError, CampaignManager, EngineOptions, SnapshotBuilder, TemplateRenderer,
    TestRecipient, TestSendRequest, TickDispatcher, TickOutcome,
};
use crate::clock::ManualClock;
use crate::metrics::EngineMetrics;
use crate::queue::{JobTickScheduler, TickRequest, TickWorker, TICK_QUEUE};
use crate::sender::SendReceipt;

fn quota(daily_quota: u32) -> SendSettings {
    SendSettings {
        daily_quota,
        ..SendSettings::default()
    }
}

#[tokio::test]
async fn test_three_drafts_complete_in_one_tick() {
    let h = Harness::new(quota(10));
    h.add_contacts(3).await;
    let campaign = h.ready_campaign("launch").await;
    let run_id = h.manager.start(campaign.id).await.unwrap();

    let outcome = h.run_next_tick().await;
    assert_eq!(outcome, TickOutcome::Completed { sent: 3, failed: 0 });

    assert_eq!(
        h.sender.recipients(),
        vec!["c0@example.com", "c1@example.com", "c2@example.com"]
    );
    let campaign = h.manager.get(campaign.id).await.unwrap();
    assert_eq!(campaign.status, CampaignStatus::Completed);
    assert!(!campaign.active_lock);
    assert!(campaign.completed_at.is_some());

    let events = h.store.events().await;
    assert_eq!(events.len(), 3);
    assert!(events
        .iter()
        .all(|e| e.send_run_id == Some(run_id) && e.outcome == SendOutcome::Sent));

    // Only the first tick was ever scheduled
    assert_eq!(h.scheduler.scheduled().len(), 1);

    let stats = h.manager.stats(campaign.id).await.unwrap();
    assert_eq!(stats.drafts.sent, 3);
    assert_eq!(stats.progress_percentage, 100.0);
}

#[tokio::test]
async fn test_quota_spreads_sends_across_days() {
    let h = Harness::new(quota(2));
    h.add_contacts(5).await;
    let campaign = h.ready_campaign("drip").await;
    h.manager.start(campaign.id).await.unwrap();

    let outcomes = h.run_to_end().await;
    assert_eq!(
        outcomes,
        vec![
            TickOutcome::Rescheduled {
                next_at: at("2026-10-17T00:00:00Z"),
                sent: 2,
                failed: 0
            },
            TickOutcome::Rescheduled {
                next_at: at("2026-10-18T00:00:00Z"),
                sent: 2,
                failed: 0
            },
            TickOutcome::Completed { sent: 1, failed: 0 },
        ]
    );

    let days: Vec<_> = h
        .store
        .events()
        .await
        .iter()
        .map(|e| e.created_at.date_naive().to_string())
        .collect();
    assert_eq!(
        days,
        vec!["2026-10-16", "2026-10-16", "2026-10-17", "2026-10-17", "2026-10-18"]
    );
    assert_eq!(
        h.manager.get(campaign.id).await.unwrap().status,
        CampaignStatus::Completed
    );
}

#[tokio::test]
async fn test_min_delay_spaces_sends() {
    let settings = SendSettings {
        min_delay_seconds: 60,
        ..SendSettings::default()
    };
    let h = Harness::new(settings);
    h.add_contacts(3).await;
    let campaign = h.ready_campaign("spaced").await;
    h.manager.start(campaign.id).await.unwrap();

    let outcomes = h.run_to_end().await;
    assert_eq!(
        outcomes,
        vec![
            TickOutcome::Rescheduled {
                next_at: at("2026-10-16T10:01:00Z"),
                sent: 1,
                failed: 0
            },
            TickOutcome::Rescheduled {
                next_at: at("2026-10-16T10:02:00Z"),
                sent: 1,
                failed: 0
            },
            TickOutcome::Completed { sent: 1, failed: 0 },
        ]
    );
}

#[tokio::test]
async fn test_heartbeat_recorded_on_reschedule() {
    let h = Harness::new(quota(1));
    h.add_contacts(2).await;
    let campaign = h.ready_campaign("heartbeat").await;
    h.manager.start(campaign.id).await.unwrap();

    h.run_next_tick().await;
    let campaign = h.manager.get(campaign.id).await.unwrap();
    assert_eq!(campaign.last_tick_at, Some(at(START)));
    assert_eq!(campaign.next_tick_at, Some(at("2026-10-17T00:00:00Z")));
    assert!(!h.manager.stats(campaign.id).await.unwrap().stale);
}

#[tokio::test]
async fn test_stale_tick_changes_nothing() {
    let h = Harness::new(SendSettings::default());
    h.add_contacts(2).await;
    let campaign = h.ready_campaign("launch").await;
    h.manager.start(campaign.id).await.unwrap();

    let foreign = TickRequest {
        campaign_id: campaign.id,
        send_run_id: Uuid::new_v4(),
    };
    assert_eq!(h.dispatcher.dispatch(foreign).await.unwrap(), TickOutcome::Stale);

    let unknown = TickRequest {
        campaign_id: Uuid::new_v4(),
        send_run_id: Uuid::new_v4(),
    };
    assert_eq!(h.dispatcher.dispatch(unknown).await.unwrap(), TickOutcome::Stale);

    assert!(h.sender.recipients().is_empty());
    assert_eq!(h.scheduler.scheduled().len(), 1);
    let campaign = h.manager.get(campaign.id).await.unwrap();
    assert_eq!(campaign.last_tick_at, None);
    let pending = h
        .manager
        .list_drafts(campaign.id, Some(DraftState::Pending), 10, 0)
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
}

#[tokio::test]
async fn test_repeated_delivery_is_recorded_once() {
    let h = Harness::new(SendSettings::default());
    h.add_contacts(1).await;
    let campaign = h.ready_campaign("launch").await;
    let run_id = h.manager.start(campaign.id).await.unwrap();
    let item = h
        .manager
        .list_drafts(campaign.id, None, 10, 0)
        .await
        .unwrap()
        .remove(0);

    let receipt = |id: &str| SendReceipt {
        provider_message_id: id.to_string(),
        permalink: None,
    };
    let now = Utc::now();
    assert!(h
        .dispatcher
        .record_delivery(&campaign, run_id, &item, Ok(receipt("<first@test>")), now)
        .await
        .unwrap());
    assert!(!h
        .dispatcher
        .record_delivery(&campaign, run_id, &item, Ok(receipt("<second@test>")), now)
        .await
        .unwrap());

    let drafts = h.manager.list_drafts(campaign.id, None, 10, 0).await.unwrap();
    assert_eq!(drafts[0].state, DraftState::Sent);
    assert_eq!(drafts[0].provider_message_id.as_deref(), Some("<first@test>"));
    assert_eq!(h.store.events().await.len(), 1);
}

#[tokio::test]
async fn test_transport_failure_marks_item_and_continues() {
    let h = Harness::new(SendSettings::default());
    h.add_contacts(3).await;
    h.sender.reject("c1@example.com");
    let campaign = h.ready_campaign("launch").await;
    h.manager.start(campaign.id).await.unwrap();

    assert_eq!(
        h.run_next_tick().await,
        TickOutcome::Completed { sent: 2, failed: 1 }
    );

    let failed = h
        .manager
        .list_drafts(campaign.id, Some(DraftState::Failed), 10, 0)
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].recipient_address, "c1@example.com");
    assert!(failed[0].error.as_deref().unwrap().contains("550"));

    let events = h.manager.list_events(campaign.id, 10, 0).await.unwrap();
    assert_eq!(
        events
            .iter()
            .filter(|e| e.outcome == SendOutcome::Failed)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_include_and_exclude_keep_addresses_unique() {
    let h = Harness::new(SendSettings::default());
    let contacts = h.add_contacts(2).await;
    let campaign = h.ready_campaign("launch").await;
    let first = h
        .manager
        .list_drafts(campaign.id, None, 10, 0)
        .await
        .unwrap()
        .remove(0);

    let err = h
        .manager
        .include_contact(campaign.id, contacts[0].id)
        .await
        .unwrap_err();
    assert!(matches!(err, CampaignError::Duplicate(_)));

    let excluded = h.manager.exclude_draft(campaign.id, first.id).await.unwrap();
    assert_eq!(excluded.state, DraftState::Excluded);
    assert!(excluded.manual_exclude);
    // Excluding twice is harmless
    h.manager.exclude_draft(campaign.id, first.id).await.unwrap();

    let included = h
        .manager
        .include_contact(campaign.id, contacts[0].id)
        .await
        .unwrap();
    assert_eq!(included.state, DraftState::Pending);
    assert!(included.manual_include);
    assert_ne!(included.id, first.id);

    let err = h
        .manager
        .include_contact(campaign.id, contacts[0].id)
        .await
        .unwrap_err();
    assert!(matches!(err, CampaignError::Duplicate(_)));

    let active: Vec<_> = h
        .manager
        .list_drafts(campaign.id, None, 10, 0)
        .await
        .unwrap()
        .into_iter()
        .filter(|d| d.state != DraftState::Excluded && d.recipient_address == "c0@example.com")
        .collect();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn test_include_refuses_unsubscribed_contact() {
    let h = Harness::new(SendSettings::default());
    let contacts = h.add_contacts(2).await;
    let campaign = h.ready_campaign("launch").await;
    let draft = h
        .manager
        .list_drafts(campaign.id, None, 10, 0)
        .await
        .unwrap()
        .remove(1);
    h.manager.exclude_draft(campaign.id, draft.id).await.unwrap();
    h.store.set_unsubscribed(contacts[1].id, true).await;

    let err = h
        .manager
        .include_contact(campaign.id, contacts[1].id)
        .await
        .unwrap_err();
    assert!(matches!(err, CampaignError::Ineligible(_)));

    let err = h
        .manager
        .include_contact(campaign.id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_sent_draft_cannot_be_excluded() {
    let h = Harness::new(SendSettings::default());
    h.add_contacts(1).await;
    let campaign = h.ready_campaign("launch").await;
    h.manager.start(campaign.id).await.unwrap();
    h.run_next_tick().await;

    let sent = h
        .manager
        .list_drafts(campaign.id, None, 10, 0)
        .await
        .unwrap()
        .remove(0);
    let err = h.manager.exclude_draft(campaign.id, sent.id).await.unwrap_err();
    assert!(matches!(err, CampaignError::DraftNotPending));

    let err = h
        .manager
        .exclude_draft(Uuid::new_v4(), sent.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CampaignError::DraftNotFound(_)));
}

#[tokio::test]
async fn test_reschedule_failure_stalls_until_retry() {
    let h = Harness::new(quota(1));
    h.add_contacts(3).await;
    let campaign = h.ready_campaign("stalled").await;
    h.manager.start(campaign.id).await.unwrap();
    h.scheduler.fail(true);

    let outcome = h.run_next_tick().await;
    assert!(matches!(outcome, TickOutcome::RescheduleFailed { .. }));
    assert_eq!(h.sender.recipients().len(), 1);
    let stalled = h.manager.get(campaign.id).await.unwrap();
    assert_eq!(stalled.status, CampaignStatus::Sending);
    assert_eq!(stalled.next_tick_at, Some(at(START)));

    h.clock.advance(Duration::minutes(16));
    h.scheduler.fail(false);
    let run_id = h.manager.retry_stuck(campaign.id, false).await.unwrap();
    assert_eq!(h.scheduler.last().unwrap().0.send_run_id, run_id);
}

#[tokio::test]
async fn test_test_send_bypasses_gate() {
    let h = Harness::new(quota(0));
    let contacts = h.add_contacts(1).await;
    let campaign = h.ready_campaign("preview").await;

    let event = h
        .manager
        .send_test(TestSendRequest {
            campaign_id: campaign.id,
            to: TestRecipient::Address(" Tester@Example.com ".into()),
        })
        .await
        .unwrap();
    assert_eq!(event.kind, EventKind::Test);
    assert_eq!(event.outcome, SendOutcome::Sent);
    assert_eq!(event.draft_item_id, None);
    assert_eq!(event.recipient_address, "tester@example.com");

    let event = h
        .manager
        .send_test(TestSendRequest {
            campaign_id: campaign.id,
            to: TestRecipient::Contact(contacts[0].id),
        })
        .await
        .unwrap();
    assert_eq!(event.recipient_address, "c0@example.com");

    let messages = h.sender.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].subject, "Hello Contact0");
    assert!(messages[1].list_unsubscribe.is_some());

    let pending = h
        .manager
        .list_drafts(campaign.id, Some(DraftState::Pending), 10, 0)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);

    let err = h
        .manager
        .send_test(TestSendRequest {
            campaign_id: campaign.id,
            to: TestRecipient::Address("nope".into()),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CampaignError::Validation(_)));
}

#[tokio::test]
async fn test_suppression_recheck_excludes_before_send() {
    let options = EngineOptions {
        recheck_suppression: true,
        ..EngineOptions::default()
    };
    let h = Harness::with_options(SendSettings::default(), options);
    h.add_contacts(2).await;
    let campaign = h.ready_campaign("launch").await;
    h.store.suppress("c0@example.com").await;
    h.manager.start(campaign.id).await.unwrap();

    assert_eq!(
        h.run_next_tick().await,
        TickOutcome::Completed { sent: 1, failed: 0 }
    );
    assert_eq!(h.sender.recipients(), vec!["c1@example.com"]);
    let excluded = h
        .manager
        .list_drafts(campaign.id, Some(DraftState::Excluded), 10, 0)
        .await
        .unwrap();
    assert_eq!(excluded.len(), 1);
    assert!(!excluded[0].manual_exclude);
}

#[tokio::test]
async fn test_job_worker_drives_campaign() {
    let store = cadence_storage::MemoryStore::new();
    let repos = Repositories::memory(store.clone());
    let clock = Arc::new(ManualClock::new(at(START)));
    let sender = Arc::new(RecordingSender::default());
    let renderer = TemplateRenderer::new("https://example.com/unsubscribe", "secret").unwrap();
    let manager = CampaignManager::new(
        repos.clone(),
        Arc::new(StaticSettings::new(SendSettings::default())),
        Arc::new(JobTickScheduler::new(repos.jobs.clone())),
        sender.clone(),
        SnapshotBuilder::new(repos.contacts.clone(), renderer),
        EngineMetrics::new().unwrap(),
    )
    .with_clock(clock.clone());
    let manager = Arc::new(manager);
    let worker = TickWorker::new(repos.jobs.clone(), TickDispatcher::new(manager.clone()));

    let mut contact = cadence_storage::Contact::from_address("solo@example.com");
    contact.id = Uuid::new_v4();
    store.add_contact(contact).await;
    let campaign = manager
        .create(cadence_storage::CreateCampaign {
            name: "jobs".into(),
            subject_template: "Hi".into(),
            text_template: Some("Body".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    manager.generate_snapshot(campaign.id, false).await.unwrap();
    manager.start(campaign.id).await.unwrap();

    assert_eq!(worker.process_due(at(START)).await.unwrap(), 1);
    assert_eq!(worker.process_due(at(START)).await.unwrap(), 0);

    assert_eq!(sender.recipients(), vec!["solo@example.com"]);
    assert_eq!(
        manager.get(campaign.id).await.unwrap().status,
        CampaignStatus::Completed
    );
    assert_eq!(
        store
            .count_by_status(TICK_QUEUE, JobStatus::Completed)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_permalink_is_kept_on_draft_and_event() {
    let h = Harness::new(SendSettings::default());
    h.add_contacts(1).await;
    let campaign = h.ready_campaign("archive").await;
    h.manager.start(campaign.id).await.unwrap();
    h.run_next_tick().await;

    let draft = h
        .manager
        .list_drafts(campaign.id, None, 10, 0)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(
        draft.permalink.as_deref(),
        Some("https://archive.example.com/m/1")
    );
    let events = h.manager.list_events(campaign.id, 10, 0).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].permalink.as_deref(),
        Some("https://archive.example.com/m/1")
    );

    let test = h
        .manager
        .send_test(TestSendRequest {
            campaign_id: campaign.id,
            to: TestRecipient::Address("tester@example.com".into()),
        })
        .await
        .unwrap();
    assert_eq!(test.permalink.as_deref(), Some("https://archive.example.com/m/2"));
}

#[tokio::test]
async fn test_failed_send_event_has_no_permalink() {
    let h = Harness::new(SendSettings::default());
    h.add_contacts(1).await;
    h.sender.reject("c0@example.com");
    let campaign = h.ready_campaign("bounce").await;
    h.manager.start(campaign.id).await.unwrap();
    h.run_next_tick().await;

    let events = h.manager.list_events(campaign.id, 10, 0).await.unwrap();
    assert_eq!(events[0].outcome, SendOutcome::Failed);
    assert_eq!(events[0].permalink, None);
    assert_eq!(events[0].provider_message_id, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duplicate_tick_delivered_concurrently_sends_each_draft_once() {
    let h = Harness::new(SendSettings::default());
    h.add_contacts(10).await;
    let campaign = h.ready_campaign("burst").await;
    h.manager.start(campaign.id).await.unwrap();
    let (tick, _) = h.scheduler.last().unwrap();

    let (first, second) = tokio::join!(h.dispatcher.dispatch(tick), h.dispatcher.dispatch(tick));
    let tally = |outcome: TickOutcome| match outcome {
        TickOutcome::Completed { sent, failed }
        | TickOutcome::Superseded { sent, failed }
        | TickOutcome::Rescheduled { sent, failed, .. } => sent + failed,
        TickOutcome::Stale => 0,
        other => panic!("unexpected tick outcome {:?}", other),
    };
    assert_eq!(tally(first.unwrap()) + tally(second.unwrap()), 10);

    let recipients = h.sender.recipients();
    assert_eq!(recipients.len(), 10);
    let unique: std::collections::HashSet<_> = recipients.iter().collect();
    assert_eq!(unique.len(), 10);
    assert_eq!(h.store.events().await.len(), 10);
    assert_eq!(
        h.manager.get(campaign.id).await.unwrap().status,
        CampaignStatus::Completed
    );
}
