//! Campaign send orchestration
//!
//! - [`RateGate`]: decides whether a send may happen now
//! - [`SnapshotBuilder`]: turns a recipient filter into drafts
//! - [`CampaignManager`]: lifecycle transitions and the sending slot
//! - [`TickDispatcher`]: one rate-limited batch per tick

mod dispatcher;
mod error;
mod manager;
mod rate_gate;
mod snapshot;
mod template;

#[cfg(test)]
mod tests;

pub use dispatcher::{TickDispatcher, TickOutcome, TICK_BATCH_SIZE, TICK_SPACING_SECS};
pub use error::{CampaignError, CampaignResult};
pub use manager::{
    CampaignManager, CampaignStats, EngineOptions, SnapshotReport, TestRecipient, TestSendRequest,
};
pub use rate_gate::{BlockReason, GateDecision, RateGate};
pub use snapshot::{check_eligibility, SkipCounts, SkipReason, SnapshotBuilder, SnapshotPlan};
pub use template::{RenderedMessage, TemplateRenderer};
