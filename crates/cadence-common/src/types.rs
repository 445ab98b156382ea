//! Common types for Cadence

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for send runs
pub type SendRunId = Uuid;

/// Unique identifier for draft items
pub type DraftItemId = Uuid;

/// Unique identifier for send events
pub type SendEventId = Uuid;

/// Unique identifier for contacts
pub type ContactId = Uuid;

/// Unique identifier for background jobs
pub type JobId = Uuid;

/// Email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an email address from a string
    ///
    /// Surrounding whitespace is ignored. Exactly one `@` is required, the
    /// domain must contain a dot and neither part may contain whitespace.
    pub fn parse(s: &str) -> Option<Self> {
        let (local, domain) = s.trim().split_once('@')?;
        if local.is_empty()
            || domain.is_empty()
            || domain.contains('@')
            || !domain.contains('.')
            || domain.starts_with('.')
            || domain.ends_with('.')
            || s.trim().chars().any(char::is_whitespace)
        {
            return None;
        }
        Some(Self::new(local, domain))
    }

    /// Lowercased form used for uniqueness checks
    pub fn normalized(&self) -> String {
        format!("{}@{}", self.local, self.domain).to_lowercase()
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::Validation(format!("Invalid email address: {}", s)))
    }
}

/// Trim and lowercase an address for comparison
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_address_parse() {
        let addr = EmailAddress::parse(" Alice@Example.com ").unwrap();
        assert_eq!(addr.local, "Alice");
        assert_eq!(addr.domain, "Example.com");
        assert_eq!(addr.normalized(), "alice@example.com");
    }

    #[test]
    fn test_email_address_rejects_garbage() {
        assert!(EmailAddress::parse("no-at-sign").is_none());
        assert!(EmailAddress::parse("@example.com").is_none());
        assert!(EmailAddress::parse("user@").is_none());
        assert!(EmailAddress::parse("user@localhost").is_none());
        assert!(EmailAddress::parse("a@b@c.com").is_none());
        assert!(EmailAddress::parse("a b@c.com").is_none());
        assert!("user@example.com".parse::<EmailAddress>().is_ok());
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("  Bob@Example.COM\n"), "bob@example.com");
    }
}
