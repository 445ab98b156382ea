//! Shared handler state

use std::sync::Arc;

use cadence_core::{CampaignManager, TickDispatcher};
use cadence_storage::DatabasePool;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CampaignManager>,
    pub dispatcher: TickDispatcher,
    /// Present with the postgres backend; used by readiness checks
    pub db_pool: Option<DatabasePool>,
}

impl AppState {
    pub fn new(dispatcher: TickDispatcher) -> Self {
        Self {
            manager: dispatcher.manager().clone(),
            dispatcher,
            db_pool: None,
        }
    }

    pub fn with_db_pool(mut self, pool: DatabasePool) -> Self {
        self.db_pool = Some(pool);
        self
    }
}
