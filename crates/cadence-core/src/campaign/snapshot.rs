//! Snapshot Builder - Materializes per-recipient drafts for a campaign

use std::collections::HashSet;
use std::sync::Arc;

use cadence_common::types::EmailAddress;
use cadence_common::SendSettings;
use cadence_storage::{Campaign, Contact, ContactDirectory, NewDraftItem};
use serde::Serialize;
use tracing::debug;

use super::error::CampaignResult;
use super::template::TemplateRenderer;

/// Why a contact did not get a draft
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InvalidAddress,
    Unsubscribed,
    Suppressed,
    /// Address contains an exclusion keyword and is not allow-listed
    Keyword,
    Duplicate,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InvalidAddress => "invalid address",
            SkipReason::Unsubscribed => "unsubscribed",
            SkipReason::Suppressed => "suppressed",
            SkipReason::Keyword => "matches an exclusion keyword",
            SkipReason::Duplicate => "duplicate address",
        }
    }
}

/// Contacts left out of a snapshot, by reason
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkipCounts {
    pub invalid_address: u64,
    pub unsubscribed: u64,
    pub suppressed: u64,
    pub keyword: u64,
    pub duplicate: u64,
}

impl SkipCounts {
    fn add(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::InvalidAddress => self.invalid_address += 1,
            SkipReason::Unsubscribed => self.unsubscribed += 1,
            SkipReason::Suppressed => self.suppressed += 1,
            SkipReason::Keyword => self.keyword += 1,
            SkipReason::Duplicate => self.duplicate += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.invalid_address + self.unsubscribed + self.suppressed + self.keyword + self.duplicate
    }
}

/// Drafts to insert for a campaign
#[derive(Debug, Clone)]
pub struct SnapshotPlan {
    pub drafts: Vec<NewDraftItem>,
    /// More eligible contacts existed than the configured maximum
    pub capped: bool,
    pub skipped: SkipCounts,
}

/// Builds drafts from the campaign's recipient filter
#[derive(Clone)]
pub struct SnapshotBuilder {
    contacts: Arc<dyn ContactDirectory>,
    renderer: TemplateRenderer,
}

impl SnapshotBuilder {
    pub fn new(contacts: Arc<dyn ContactDirectory>, renderer: TemplateRenderer) -> Self {
        Self { contacts, renderer }
    }

    pub fn renderer(&self) -> &TemplateRenderer {
        &self.renderer
    }

    /// Select eligible contacts and render one draft each, up to `max_drafts`
    pub async fn plan(
        &self,
        campaign: &Campaign,
        settings: &SendSettings,
        max_drafts: usize,
    ) -> CampaignResult<SnapshotPlan> {
        let contacts = self.contacts.find(&campaign.filter).await?;

        let mut seen = HashSet::new();
        let mut drafts = Vec::new();
        let mut skipped = SkipCounts::default();
        let mut capped = false;

        for contact in &contacts {
            let address = match check_eligibility(contact, settings) {
                Ok(address) => address,
                Err(reason) => {
                    skipped.add(reason);
                    continue;
                }
            };
            if !seen.insert(address) {
                skipped.add(SkipReason::Duplicate);
                continue;
            }
            if drafts.len() >= max_drafts {
                capped = true;
                break;
            }
            drafts.push(self.draft_for(campaign, contact, settings, false));
        }

        debug!(
            campaign_id = %campaign.id,
            matched = contacts.len(),
            drafts = drafts.len(),
            skipped = skipped.total(),
            capped,
            "Snapshot planned"
        );

        Ok(SnapshotPlan {
            drafts,
            capped,
            skipped,
        })
    }

    /// Render the draft for one contact
    pub fn draft_for(
        &self,
        campaign: &Campaign,
        contact: &Contact,
        settings: &SendSettings,
        manual_include: bool,
    ) -> NewDraftItem {
        let signature = signature_for(campaign, settings);
        let rendered = self.renderer.render_message(campaign, contact, signature);

        NewDraftItem {
            campaign_id: campaign.id,
            contact_id: Some(contact.id).filter(|id| !id.is_nil()),
            recipient_address: contact.email.trim().to_lowercase(),
            subject: rendered.subject,
            html_body: rendered.html_body,
            text_body: rendered.text_body,
            manual_include,
        }
    }
}

/// The campaign's own signature, else the operator default
pub fn signature_for<'a>(campaign: &'a Campaign, settings: &'a SendSettings) -> Option<&'a str> {
    campaign
        .signature
        .as_deref()
        .or(settings.default_signature.as_deref())
}

/// Normalized address when `contact` may receive campaign mail
pub fn check_eligibility(contact: &Contact, settings: &SendSettings) -> Result<String, SkipReason> {
    let address = EmailAddress::parse(&contact.email)
        .ok_or(SkipReason::InvalidAddress)?
        .normalized();

    if contact.unsubscribed {
        return Err(SkipReason::Unsubscribed);
    }
    if contact.suppressed {
        return Err(SkipReason::Suppressed);
    }
    if settings.exclusion_match(&address).is_some() && !settings.is_allow_listed(&address) {
        return Err(SkipReason::Keyword);
    }

    Ok(address)
}
