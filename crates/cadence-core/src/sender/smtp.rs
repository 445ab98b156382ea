//! SMTP delivery through a relay

use async_trait::async_trait;
use cadence_common::config::SmtpConfig;
use lettre::{
    address::Address,
    message::{
        header::{ContentType, Header, HeaderName, HeaderValue},
        Mailbox, MultiPart, SinglePart,
    },
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration as StdDuration;
use tracing::debug;

use super::{generate_message_id, permalink_for, MailSender, OutgoingMessage, SendError, SendReceipt};

/// `List-Unsubscribe` header
#[derive(Debug, Clone)]
struct ListUnsubscribe(String);

impl Header for ListUnsubscribe {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("List-Unsubscribe")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// Sends through a configured SMTP relay
pub struct SmtpSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    hostname: String,
    permalink_base_url: Option<String>,
}

impl SmtpSender {
    /// Build the pooled transport from configuration
    pub fn new(config: &SmtpConfig, hostname: impl Into<String>) -> Result<Self, SendError> {
        let builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| SendError::Transport(format!("Failed to create SMTP transport: {}", e)))?
        } else if config.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| SendError::Transport(format!("Failed to create SMTP transport: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let mut builder = builder.port(config.port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let mailer = builder
            .timeout(Some(StdDuration::from_secs(config.timeout_secs)))
            .build();

        Ok(Self {
            mailer,
            hostname: hostname.into(),
            permalink_base_url: config.permalink_base_url.clone(),
        })
    }

    fn build_message(&self, message: &OutgoingMessage, message_id: &str) -> Result<Message, SendError> {
        let from_address: Address = message
            .from_address
            .parse()
            .map_err(|e| SendError::InvalidAddress(format!("from {}: {}", message.from_address, e)))?;
        let to_address: Address = message
            .to
            .parse()
            .map_err(|e| SendError::InvalidAddress(format!("to {}: {}", message.to, e)))?;

        let mut builder = Message::builder()
            .from(Mailbox::new(message.from_name.clone(), from_address))
            .to(Mailbox::new(None, to_address))
            .subject(message.subject.clone())
            .message_id(Some(message_id.to_string()));

        if let Some(value) = &message.list_unsubscribe {
            builder = builder.header(ListUnsubscribe(value.clone()));
        }

        let built = match (&message.html_body, &message.text_body) {
            (Some(html), Some(text)) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(text.clone()))
                    .singlepart(SinglePart::html(html.clone())),
            ),
            (Some(html), None) => builder.header(ContentType::TEXT_HTML).body(html.clone()),
            (None, Some(text)) => builder.header(ContentType::TEXT_PLAIN).body(text.clone()),
            (None, None) => builder.header(ContentType::TEXT_PLAIN).body(String::new()),
        };

        built.map_err(|e| SendError::Build(e.to_string()))
    }
}

#[async_trait]
impl MailSender for SmtpSender {
    async fn send(&self, message: &OutgoingMessage) -> Result<SendReceipt, SendError> {
        let message_id = generate_message_id(&self.hostname);
        let email = self.build_message(message, &message_id)?;

        match self.mailer.send(email).await {
            Ok(response) => {
                debug!(to = %message.to, code = %response.code(), "Email accepted by relay");
                Ok(SendReceipt {
                    permalink: permalink_for(self.permalink_base_url.as_deref(), &message_id),
                    provider_message_id: message_id,
                })
            }
            Err(e) if e.is_permanent() => Err(SendError::Rejected(e.to_string())),
            Err(e) => Err(SendError::Transport(e.to_string())),
        }
    }
}
