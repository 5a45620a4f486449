//! Error types for the dispatch engine.
//!
//! Failure classification drives the retry policy: disconnect-class errors
//! are repaired by reconnecting the session, per-item errors isolate a single
//! message, and connection-class errors abort a batch before any delivery.

use std::fmt;
use thiserror::Error;

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Dispatch error kinds categorizing different failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchErrorKind {
    // Connection establishment
    /// Connection was refused by the endpoint.
    ConnectionRefused,
    /// Connection attempt timed out.
    ConnectTimeout,
    /// TLS handshake or upgrade failed.
    TlsHandshake,
    /// Authentication was rejected.
    Authentication,

    // Session loss (recoverable by reconnect)
    /// The peer or network dropped the session.
    Disconnected,
    /// Connection was reset mid-operation.
    ConnectionReset,
    /// Server announced shutdown (421).
    ServerShutdown,

    // Per-item failures
    /// Recipient was rejected by the server.
    RecipientRejected,
    /// Message content was rejected by the server.
    MessageRejected,
    /// Message failed structural validation.
    Validation,
    /// Read from the transport timed out.
    ReadTimeout,
    /// Write to the transport timed out.
    WriteTimeout,

    // Protocol and environment
    /// Malformed or unexpected server response.
    Protocol,
    /// Configuration is invalid.
    Configuration,
    /// Feed could not be fetched.
    FeedFetch,
    /// Feed document could not be parsed.
    FeedParse,

    /// Unknown or internal error.
    Unknown,
}

impl DispatchErrorKind {
    /// Returns true for session-loss failures that a reconnect can repair.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            DispatchErrorKind::Disconnected
                | DispatchErrorKind::ConnectionReset
                | DispatchErrorKind::ServerShutdown
        )
    }

    /// Returns true for failures establishing the session in the first place.
    ///
    /// These are fatal to a batch: no delivery is attempted.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            DispatchErrorKind::ConnectionRefused
                | DispatchErrorKind::ConnectTimeout
                | DispatchErrorKind::TlsHandshake
                | DispatchErrorKind::Authentication
        )
    }
}

impl fmt::Display for DispatchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchErrorKind::ConnectionRefused => write!(f, "Connection refused"),
            DispatchErrorKind::ConnectTimeout => write!(f, "Connect timed out"),
            DispatchErrorKind::TlsHandshake => write!(f, "TLS handshake failed"),
            DispatchErrorKind::Authentication => write!(f, "Authentication failed"),
            DispatchErrorKind::Disconnected => write!(f, "Session disconnected"),
            DispatchErrorKind::ConnectionReset => write!(f, "Connection reset"),
            DispatchErrorKind::ServerShutdown => write!(f, "Server shutting down"),
            DispatchErrorKind::RecipientRejected => write!(f, "Recipient rejected"),
            DispatchErrorKind::MessageRejected => write!(f, "Message rejected"),
            DispatchErrorKind::Validation => write!(f, "Validation failed"),
            DispatchErrorKind::ReadTimeout => write!(f, "Read timed out"),
            DispatchErrorKind::WriteTimeout => write!(f, "Write timed out"),
            DispatchErrorKind::Protocol => write!(f, "Protocol error"),
            DispatchErrorKind::Configuration => write!(f, "Invalid configuration"),
            DispatchErrorKind::FeedFetch => write!(f, "Feed fetch failed"),
            DispatchErrorKind::FeedParse => write!(f, "Feed parse failed"),
            DispatchErrorKind::Unknown => write!(f, "Unknown error"),
        }
    }
}

/// Dispatch error with detailed information.
#[derive(Error, Debug)]
pub struct DispatchError {
    /// Error kind.
    kind: DispatchErrorKind,
    /// Human-readable message.
    message: String,
    /// SMTP reply code if available.
    smtp_code: Option<u16>,
    /// Underlying cause.
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DispatchError {
    /// Creates a new dispatch error.
    pub fn new(kind: DispatchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            cause: None,
        }
    }

    /// Sets the SMTP reply code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> DispatchErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP reply code if available.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Returns true if a reconnect can repair this failure.
    pub fn is_disconnect(&self) -> bool {
        self.kind.is_disconnect()
    }

    /// Returns true if this failure aborts a batch before delivery.
    pub fn is_connection_failure(&self) -> bool {
        self.kind.is_connection_failure()
    }

    // Convenience constructors

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(DispatchErrorKind::ConnectionRefused, message)
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(DispatchErrorKind::TlsHandshake, message)
    }

    /// Creates an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(DispatchErrorKind::Authentication, message)
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(DispatchErrorKind::Protocol, message)
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(DispatchErrorKind::Validation, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(DispatchErrorKind::Configuration, message)
    }

    /// Creates a session-loss error.
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(DispatchErrorKind::Disconnected, message)
    }

    /// Creates an error from an SMTP reply.
    pub fn from_smtp_reply(code: u16, message: impl Into<String>) -> Self {
        let msg = message.into();
        let kind = match code {
            421 => DispatchErrorKind::ServerShutdown,
            530 => DispatchErrorKind::Authentication,
            535 => DispatchErrorKind::Authentication,
            550 | 551 | 553 => DispatchErrorKind::RecipientRejected,
            552 | 554 => DispatchErrorKind::MessageRejected,
            _ if (400..500).contains(&code) => DispatchErrorKind::MessageRejected,
            _ if code >= 500 => DispatchErrorKind::MessageRejected,
            _ => DispatchErrorKind::Unknown,
        };
        Self::new(kind, msg).with_smtp_code(code)
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_classification() {
        assert!(DispatchErrorKind::Disconnected.is_disconnect());
        assert!(DispatchErrorKind::ServerShutdown.is_disconnect());
        assert!(!DispatchErrorKind::RecipientRejected.is_disconnect());
        assert!(!DispatchErrorKind::ReadTimeout.is_disconnect());
    }

    #[test]
    fn test_connection_failure_classification() {
        assert!(DispatchErrorKind::Authentication.is_connection_failure());
        assert!(DispatchErrorKind::ConnectionRefused.is_connection_failure());
        assert!(!DispatchErrorKind::Disconnected.is_connection_failure());
        assert!(!DispatchErrorKind::MessageRejected.is_connection_failure());
    }

    #[test]
    fn test_error_from_smtp_reply() {
        let err = DispatchError::from_smtp_reply(535, "Authentication failed");
        assert_eq!(err.kind(), DispatchErrorKind::Authentication);
        assert_eq!(err.smtp_code(), Some(535));

        let err = DispatchError::from_smtp_reply(421, "Service unavailable");
        assert_eq!(err.kind(), DispatchErrorKind::ServerShutdown);
        assert!(err.is_disconnect());

        let err = DispatchError::from_smtp_reply(550, "No such user");
        assert_eq!(err.kind(), DispatchErrorKind::RecipientRejected);
        assert!(!err.is_disconnect());
    }

    #[test]
    fn test_display_includes_code() {
        let err = DispatchError::from_smtp_reply(550, "No such user");
        let shown = err.to_string();
        assert!(shown.contains("550"));
        assert!(shown.contains("No such user"));
    }
}
