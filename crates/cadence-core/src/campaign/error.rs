//! Campaign error type

use cadence_common::types::{CampaignId, ContactId, DraftItemId};
use cadence_storage::CampaignStatus;
use thiserror::Error;

/// Errors from campaign operations
#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("Campaign not found: {0}")]
    NotFound(CampaignId),

    #[error("Contact not found: {0}")]
    ContactNotFound(ContactId),

    #[error("Draft not found: {0}")]
    DraftNotFound(DraftItemId),

    #[error("Cannot {action} a campaign in status '{status}'")]
    InvalidTransition {
        action: &'static str,
        status: CampaignStatus,
    },

    #[error("Campaign is not stale; pass force to retry anyway")]
    NotStale,

    #[error("Campaign already has drafts; pass force to regenerate")]
    SnapshotExists,

    #[error("No eligible recipients")]
    EmptySnapshot,

    #[error("Another campaign is sending: {holder}")]
    SlotBusy { holder: CampaignId },

    #[error("A draft for {0} already exists in this campaign")]
    Duplicate(String),

    #[error("Recipient is not eligible: {0}")]
    Ineligible(String),

    #[error("Draft is no longer pending")]
    DraftNotPending,

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Scheduling failed: {0}")]
    Scheduling(String),

    #[error("Storage error: {0}")]
    Storage(#[from] cadence_common::Error),
}

impl CampaignError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            CampaignError::NotFound(_)
            | CampaignError::ContactNotFound(_)
            | CampaignError::DraftNotFound(_) => 404,
            CampaignError::InvalidTransition { .. }
            | CampaignError::NotStale
            | CampaignError::SnapshotExists
            | CampaignError::EmptySnapshot
            | CampaignError::SlotBusy { .. }
            | CampaignError::Duplicate(_)
            | CampaignError::Ineligible(_)
            | CampaignError::DraftNotPending
            | CampaignError::Validation(_) => 400,
            CampaignError::Scheduling(_) => 500,
            CampaignError::Storage(e) => e.status_code(),
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            CampaignError::NotFound(_) => "CAMPAIGN_NOT_FOUND",
            CampaignError::ContactNotFound(_) => "CONTACT_NOT_FOUND",
            CampaignError::DraftNotFound(_) => "DRAFT_NOT_FOUND",
            CampaignError::InvalidTransition { .. } => "INVALID_TRANSITION",
            CampaignError::NotStale => "NOT_STALE",
            CampaignError::SnapshotExists => "SNAPSHOT_EXISTS",
            CampaignError::EmptySnapshot => "EMPTY_SNAPSHOT",
            CampaignError::SlotBusy { .. } => "SLOT_BUSY",
            CampaignError::Duplicate(_) => "DUPLICATE_DRAFT",
            CampaignError::Ineligible(_) => "INELIGIBLE_RECIPIENT",
            CampaignError::DraftNotPending => "DRAFT_NOT_PENDING",
            CampaignError::Validation(_) => "VALIDATION_ERROR",
            CampaignError::Scheduling(_) => "SCHEDULING_ERROR",
            CampaignError::Storage(e) => e.code(),
        }
    }
}

pub type CampaignResult<T> = std::result::Result<T, CampaignError>;
