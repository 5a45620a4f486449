//! Core types for the dispatch engine.
//!
//! This module provides:
//! - The immutable [`Message`] value object with construction-time validation
//! - Address types with structural validation
//! - The caller-visible [`BatchReport`]

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{DispatchError, DispatchResult};

/// Email address with optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Display name (e.g., "Digest Service").
    pub name: Option<String>,
    /// Email address (e.g., "reader@example.com").
    pub email: String,
}

impl Address {
    /// Creates a new address with just an email.
    pub fn new(email: impl Into<String>) -> DispatchResult<Self> {
        let email = email.into();
        Self::validate_email(&email)?;
        Ok(Self { name: None, email })
    }

    /// Creates a new address with display name and email.
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> DispatchResult<Self> {
        let email = email.into();
        Self::validate_email(&email)?;
        Ok(Self {
            name: Some(name.into()),
            email,
        })
    }

    /// Structural validation: non-empty, one `@`, non-empty halves, no
    /// control characters. Anything deeper is the server's call.
    fn validate_email(email: &str) -> DispatchResult<()> {
        if email.is_empty() {
            return Err(DispatchError::validation("Email address cannot be empty"));
        }
        if email.len() > 254 {
            return Err(DispatchError::validation(
                "Email address too long (max 254 characters)",
            ));
        }
        let at_count = email.chars().filter(|c| *c == '@').count();
        if at_count != 1 {
            return Err(DispatchError::validation(
                "Email address must contain exactly one @",
            ));
        }
        let (local, domain) = email.split_once('@').unwrap_or(("", ""));
        if local.is_empty() || domain.is_empty() {
            return Err(DispatchError::validation(
                "Email address must have a local part and a domain",
            ));
        }
        if email.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(DispatchError::validation(
                "Email address cannot contain whitespace or control characters",
            ));
        }
        Ok(())
    }

    /// Formats the address for SMTP MAIL FROM/RCPT TO commands.
    pub fn to_smtp(&self) -> String {
        format!("<{}>", self.email)
    }

    /// Formats the address for message headers.
    pub fn to_header(&self) -> String {
        match &self.name {
            Some(name) => {
                if name.contains(|c: char| !c.is_alphanumeric() && c != ' ') {
                    format!("\"{}\" <{}>", name, self.email)
                } else {
                    format!("{} <{}>", name, self.email)
                }
            }
            None => self.email.clone(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_header())
    }
}

impl TryFrom<&str> for Address {
    type Error = DispatchError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Address::new(s.trim())
    }
}

/// Content type of a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// HTML body.
    #[default]
    Html,
    /// Plain text body.
    Plain,
}

impl ContentKind {
    /// Returns the MIME type for this content.
    pub fn mime_type(&self) -> &'static str {
        match self {
            ContentKind::Html => "text/html; charset=utf-8",
            ContentKind::Plain => "text/plain; charset=utf-8",
        }
    }
}

/// An immutable message to deliver.
///
/// Constructed via [`Message::builder`]; a missing recipient, subject, or
/// body is a construction-time validation failure, never a delivery-time one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    recipient: Address,
    subject: String,
    body: String,
    content: ContentKind,
}

impl Message {
    /// Creates a new message builder.
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    /// Returns the destination address.
    pub fn recipient(&self) -> &Address {
        &self.recipient
    }

    /// Returns the subject line.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Returns the content kind of the body.
    pub fn content(&self) -> ContentKind {
        self.content
    }
}

/// Builder for [`Message`].
#[derive(Debug, Default)]
pub struct MessageBuilder {
    recipient: Option<String>,
    subject: String,
    body: String,
    content: ContentKind,
}

impl MessageBuilder {
    /// Sets the destination address.
    pub fn recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    /// Sets the subject line.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Sets the body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets the content kind (defaults to HTML).
    pub fn content(mut self, content: ContentKind) -> Self {
        self.content = content;
        self
    }

    /// Builds the message, validating structural completeness.
    pub fn build(self) -> DispatchResult<Message> {
        let recipient = self
            .recipient
            .ok_or_else(|| DispatchError::validation("Recipient is required"))?;
        let recipient = Address::new(recipient)?;

        if self.subject.trim().is_empty() {
            return Err(DispatchError::validation("Subject cannot be empty"));
        }
        if self.body.trim().is_empty() {
            return Err(DispatchError::validation("Body cannot be empty"));
        }

        Ok(Message {
            recipient,
            subject: self.subject,
            body: self.body,
            content: self.content,
        })
    }
}

/// Outcome of one batch invocation.
///
/// `unresolved` is the residual failure ledger: messages that exhausted their
/// reconciliation retry budget. The batch itself completes even when it is
/// non-empty.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Messages in the batch.
    pub total: usize,
    /// Messages delivered (first try or any retry).
    pub delivered: usize,
    /// Messages delivered only after landing in the failure ledger.
    pub recovered: usize,
    /// Messages still undelivered after reconciliation.
    pub unresolved: Vec<Message>,
    /// Wall-clock duration of the batch including reconciliation.
    pub duration: Duration,
}

impl BatchReport {
    /// Report for an empty batch.
    pub fn empty() -> Self {
        Self {
            total: 0,
            delivered: 0,
            recovered: 0,
            unresolved: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Returns true if every message was delivered.
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_validation() {
        assert!(Address::new("reader@example.com").is_ok());
        assert!(Address::new("first.last@sub.example.com").is_ok());

        assert!(Address::new("").is_err());
        assert!(Address::new("no-at-sign").is_err());
        assert!(Address::new("two@@signs.com").is_err());
        assert!(Address::new("@no-local.com").is_err());
        assert!(Address::new("no-domain@").is_err());
        assert!(Address::new("has space@example.com").is_err());
    }

    #[test]
    fn test_address_header_quoting() {
        let plain = Address::with_name("Digest Service", "d@example.com").unwrap();
        assert_eq!(plain.to_header(), "Digest Service <d@example.com>");

        let quoted = Address::with_name("Digest, Daily", "d@example.com").unwrap();
        assert_eq!(quoted.to_header(), "\"Digest, Daily\" <d@example.com>");
    }

    #[test]
    fn test_message_builder() {
        let message = Message::builder()
            .recipient("reader@example.com")
            .subject("Daily digest")
            .body("<p>hello</p>")
            .build()
            .unwrap();

        assert_eq!(message.recipient().email, "reader@example.com");
        assert_eq!(message.subject(), "Daily digest");
        assert_eq!(message.content(), ContentKind::Html);
    }

    #[test]
    fn test_message_builder_validation() {
        // Missing recipient
        assert!(Message::builder().subject("s").body("b").build().is_err());

        // Empty subject
        assert!(Message::builder()
            .recipient("r@example.com")
            .subject("  ")
            .body("b")
            .build()
            .is_err());

        // Empty body
        assert!(Message::builder()
            .recipient("r@example.com")
            .subject("s")
            .build()
            .is_err());
    }

    #[test]
    fn test_batch_report_empty() {
        let report = BatchReport::empty();
        assert_eq!(report.total, 0);
        assert!(report.is_complete());
    }
}
