//! Template Renderer - Handles personalization of email content

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use cadence_common::types::CampaignId;
use cadence_storage::{Campaign, Contact};
use hmac::{Hmac, Mac};
use regex::Regex;
use serde_json::Value;
use sha2::Sha256;
use std::sync::OnceLock;

type HmacSha256 = Hmac<Sha256>;

/// Subject and bodies personalized for one contact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
}

/// Template renderer for personalizing email content
#[derive(Clone)]
pub struct TemplateRenderer {
    /// Base URL for unsubscribe links
    unsubscribe_base_url: String,
    mac: HmacSha256,
}

impl TemplateRenderer {
    /// Create a new template renderer
    pub fn new(unsubscribe_base_url: impl Into<String>, secret: &str) -> anyhow::Result<Self> {
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid HMAC key: {}", e))?;
        Ok(Self {
            unsubscribe_base_url: unsubscribe_base_url.into().trim_end_matches('/').to_string(),
            mac,
        })
    }

    /// Render a campaign for a contact, appending `signature` to each body
    pub fn render_message(
        &self,
        campaign: &Campaign,
        contact: &Contact,
        signature: Option<&str>,
    ) -> RenderedMessage {
        let signature = signature.map(str::trim).filter(|s| !s.is_empty());

        let html_body = campaign.html_template.as_deref().map(|t| {
            let body = self.render(t, contact, campaign.id);
            match signature {
                Some(sig) => format!("{}<br><br>-- <br>{}", body, sig.replace('\n', "<br>")),
                None => body,
            }
        });
        let text_body = campaign.text_template.as_deref().map(|t| {
            let body = self.render(t, contact, campaign.id);
            match signature {
                Some(sig) => format!("{}\n\n-- \n{}", body, sig),
                None => body,
            }
        });

        RenderedMessage {
            subject: self.render_subject(&campaign.subject_template, contact),
            html_body,
            text_body,
        }
    }

    /// Render a body template with contact data
    pub fn render(&self, template: &str, contact: &Contact, campaign_id: CampaignId) -> String {
        let mut result = self.substitute(template, contact);

        let unsubscribe_url = format!(
            "{}/{}",
            self.unsubscribe_base_url,
            self.unsubscribe_token(&contact.email, campaign_id)
        );
        result = result.replace("{{unsubscribe_url}}", &unsubscribe_url);

        remove_unused_placeholders(&result)
    }

    /// Render subject line with contact data
    pub fn render_subject(&self, subject: &str, contact: &Contact) -> String {
        remove_unused_placeholders(&self.substitute(subject, contact))
    }

    fn substitute(&self, template: &str, contact: &Contact) -> String {
        let full_name = contact.full_name().unwrap_or_default();
        let mut result = template
            .replace("{{email}}", contact.email.trim())
            .replace("{{name}}", &full_name)
            .replace("{{first_name}}", contact.first_name.as_deref().unwrap_or(""))
            .replace("{{last_name}}", contact.last_name.as_deref().unwrap_or(""));

        // Custom merge fields
        if let Some(fields) = contact.fields.as_object() {
            for (key, value) in fields {
                let placeholder = format!("{{{{fields.{}}}}}", key);
                let value_str = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Null => String::new(),
                    _ => value.to_string(),
                };
                result = result.replace(&placeholder, &value_str);
            }
        }

        result
    }

    /// Signed token identifying an address and campaign
    pub fn unsubscribe_token(&self, email: &str, campaign_id: CampaignId) -> String {
        let payload = URL_SAFE_NO_PAD.encode(format!("{}:{}", email.trim().to_lowercase(), campaign_id));
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        format!("{}.{}", payload, hex::encode(mac.finalize().into_bytes()))
    }

    /// Verify a token and extract the address and campaign
    pub fn verify_unsubscribe_token(&self, token: &str) -> Option<(String, CampaignId)> {
        let (payload, signature) = token.split_once('.')?;
        let signature = hex::decode(signature).ok()?;

        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).ok()?;

        let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(payload).ok()?).ok()?;
        let (email, campaign_id) = decoded.rsplit_once(':')?;
        Some((email.to_string(), campaign_id.parse().ok()?))
    }

    /// Generate List-Unsubscribe header value
    pub fn list_unsubscribe_header(&self, email: &str, campaign_id: CampaignId) -> String {
        format!(
            "<{}/{}>",
            self.unsubscribe_base_url,
            self.unsubscribe_token(email, campaign_id)
        )
    }
}

/// Remove placeholders that had no value
fn remove_unused_placeholders(content: &str) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{[^}]+\}\}").expect("placeholder pattern is valid")
    });
    re.replace_all(content, "").to_string()
}
