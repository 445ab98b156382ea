//! Repository layer for data access

pub mod campaigns;
pub mod contacts;
pub mod drafts;
pub mod jobs;
pub mod send_events;
pub mod send_runs;
pub mod settings;

use std::sync::Arc;

use crate::db::DatabasePool;
use crate::memory::MemoryStore;

// Re-export repository traits
pub use campaigns::CampaignRepository;
pub use contacts::ContactDirectory;
pub use drafts::DraftRepository;
pub use jobs::JobRepository;
pub use send_events::SendEventRepository;
pub use send_runs::SendRunRepository;
pub use settings::{SettingsProvider, StaticSettings};

// Re-export database implementations
pub use campaigns::DbCampaignRepository;
pub use contacts::DbContactDirectory;
pub use drafts::DbDraftRepository;
pub use jobs::DbJobRepository;
pub use send_events::DbSendEventRepository;
pub use send_runs::DbSendRunRepository;
pub use settings::DbSettingsRepository;

/// Every repository the engine needs, behind one backend
#[derive(Clone)]
pub struct Repositories {
    pub campaigns: Arc<dyn CampaignRepository>,
    pub drafts: Arc<dyn DraftRepository>,
    pub runs: Arc<dyn SendRunRepository>,
    pub events: Arc<dyn SendEventRepository>,
    pub contacts: Arc<dyn ContactDirectory>,
    pub jobs: Arc<dyn JobRepository>,
}

impl Repositories {
    pub fn postgres(pool: DatabasePool) -> Self {
        Self {
            campaigns: Arc::new(DbCampaignRepository::new(pool.clone())),
            drafts: Arc::new(DbDraftRepository::new(pool.clone())),
            runs: Arc::new(DbSendRunRepository::new(pool.clone())),
            events: Arc::new(DbSendEventRepository::new(pool.clone())),
            contacts: Arc::new(DbContactDirectory::new(pool.clone())),
            jobs: Arc::new(DbJobRepository::new(pool)),
        }
    }

    pub fn memory(store: MemoryStore) -> Self {
        Self {
            campaigns: Arc::new(store.clone()),
            drafts: Arc::new(store.clone()),
            runs: Arc::new(store.clone()),
            events: Arc::new(store.clone()),
            contacts: Arc::new(store.clone()),
            jobs: Arc::new(store),
        }
    }
}
