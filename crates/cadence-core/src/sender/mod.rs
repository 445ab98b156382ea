//! Outbound delivery
//!
//! The engine hands fully rendered messages to a [`MailSender`] and records
//! whatever it reports. Senders never touch campaign state.

mod smtp;

pub use smtp::SmtpSender;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// A rendered message ready for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub from_address: String,
    pub from_name: Option<String>,
    pub to: String,
    pub subject: String,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    /// Value for the List-Unsubscribe header, when known
    pub list_unsubscribe: Option<String>,
}

/// What the transport reports for an accepted message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub provider_message_id: String,
    pub permalink: Option<String>,
}

/// Delivery failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rejected by server: {0}")]
    Rejected(String),
}

/// Mail transport
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> Result<SendReceipt, SendError>;
}

/// Generate a Message-ID for `hostname`
pub fn generate_message_id(hostname: &str) -> String {
    format!("<{}.{}@{}>", Uuid::new_v4(), Utc::now().timestamp(), hostname)
}

/// Build a permalink from a base URL and a Message-ID
pub fn permalink_for(base_url: Option<&str>, message_id: &str) -> Option<String> {
    base_url.map(|base| {
        let id = message_id.trim_start_matches('<').trim_end_matches('>');
        format!("{}/{}", base.trim_end_matches('/'), id)
    })
}

/// Logs messages instead of delivering them
pub struct DryRunSender {
    hostname: String,
    permalink_base_url: Option<String>,
}

impl DryRunSender {
    pub fn new(hostname: impl Into<String>, permalink_base_url: Option<String>) -> Self {
        Self {
            hostname: hostname.into(),
            permalink_base_url,
        }
    }
}

#[async_trait]
impl MailSender for DryRunSender {
    async fn send(&self, message: &OutgoingMessage) -> Result<SendReceipt, SendError> {
        let message_id = generate_message_id(&self.hostname);
        info!(
            to = %message.to,
            subject = %message.subject,
            message_id = %message_id,
            "Dry run: message not delivered"
        );
        Ok(SendReceipt {
            permalink: permalink_for(self.permalink_base_url.as_deref(), &message_id),
            provider_message_id: message_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permalink_strips_brackets() {
        assert_eq!(
            permalink_for(Some("https://archive.example.com/m/"), "<abc.1@host>").as_deref(),
            Some("https://archive.example.com/m/abc.1@host")
        );
        assert_eq!(permalink_for(None, "<abc@host>"), None);
    }

    #[tokio::test]
    async fn test_dry_run_returns_receipt() {
        let sender = DryRunSender::new("cadence.test", None);
        let receipt = sender
            .send(&OutgoingMessage {
                from_address: "news@example.com".into(),
                from_name: None,
                to: "a@example.com".into(),
                subject: "Hi".into(),
                html_body: None,
                text_body: Some("Hello".into()),
                list_unsubscribe: None,
            })
            .await
            .unwrap();
        assert!(receipt.provider_message_id.ends_with("@cadence.test>"));
    }
}
