//! Draft state laws under arbitrary interleavings of ticks and edits

use std::collections::{HashMap, HashSet};

use cadence_common::types::DraftItemId;
use cadence_common::SendSettings;
use cadence_storage::DraftState;
use proptest::prelude::*;

use super::Harness;

#[derive(Debug, Clone)]
enum Op {
    Tick,
    Exclude(usize),
    Include(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Tick),
        2 => (0usize..8).prop_map(Op::Exclude),
        2 => (0usize..4).prop_map(Op::Include),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_drafts_settle_once_and_addresses_stay_unique(ops in prop::collection::vec(op(), 1..25)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let settings = SendSettings {
                daily_quota: 2,
                ..SendSettings::default()
            };
            let h = Harness::new(settings);
            let contacts = h.add_contacts(4).await;
            h.sender.reject("c3@example.com");
            let campaign = h.ready_campaign("laws").await;
            h.manager.start(campaign.id).await.unwrap();

            let mut settled: HashMap<DraftItemId, DraftState> = HashMap::new();
            for op in ops {
                match op {
                    Op::Tick => {
                        h.run_next_tick().await;
                    }
                    Op::Exclude(i) => {
                        let drafts = h.manager.list_drafts(campaign.id, None, 100, 0).await.unwrap();
                        let draft = &drafts[i % drafts.len()];
                        let _ = h.manager.exclude_draft(campaign.id, draft.id).await;
                    }
                    Op::Include(i) => {
                        let _ = h.manager.include_contact(campaign.id, contacts[i].id).await;
                    }
                }

                let drafts = h.manager.list_drafts(campaign.id, None, 100, 0).await.unwrap();
                for draft in &drafts {
                    if let Some(previous) = settled.get(&draft.id) {
                        assert_eq!(*previous, draft.state, "draft {} left a terminal state", draft.id);
                    } else if draft.state.is_terminal() {
                        settled.insert(draft.id, draft.state);
                    }
                }

                let mut live = HashSet::new();
                for draft in drafts.iter().filter(|d| d.state != DraftState::Excluded) {
                    assert!(
                        live.insert(draft.recipient_address.clone()),
                        "two live drafts for {}",
                        draft.recipient_address
                    );
                }
            }

            let events = h.store.events().await;
            let mut per_draft = HashSet::new();
            for event in &events {
                let id = event.draft_item_id.unwrap();
                assert!(per_draft.insert(id), "draft {} recorded twice", id);
                assert!(matches!(settled.get(&id), Some(DraftState::Sent | DraftState::Failed)));
            }
            let recipients = h.sender.recipients();
            let unique: HashSet<_> = recipients.iter().collect();
            assert_eq!(unique.len(), recipients.len());
        });
    }
}
