//! Authentication for the outbound session.
//!
//! Supports the two mechanisms submission providers universally accept:
//! - PLAIN (RFC 4616), single base64 initial response
//! - LOGIN, base64 username/password exchange

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};

/// Authentication mechanisms supported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// PLAIN authentication (RFC 4616).
    Plain,
    /// LOGIN authentication.
    Login,
}

impl Mechanism {
    /// Returns the SMTP AUTH mechanism name.
    pub fn name(&self) -> &'static str {
        match self {
            Mechanism::Plain => "PLAIN",
            Mechanism::Login => "LOGIN",
        }
    }

    /// Parses from an EHLO capability token.
    pub fn from_capability(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(Mechanism::Plain),
            "LOGIN" => Some(Mechanism::Login),
            _ => None,
        }
    }

    /// Picks the preferred mechanism among those the server announced.
    ///
    /// PLAIN wins when available; LOGIN is the fallback. Returns `None`
    /// when the server announced neither.
    pub fn select(announced: &[Mechanism]) -> Option<Mechanism> {
        if announced.contains(&Mechanism::Plain) {
            Some(Mechanism::Plain)
        } else if announced.contains(&Mechanism::Login) {
            Some(Mechanism::Login)
        } else {
            None
        }
    }
}

/// Authentication credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Authentication identity.
    pub username: String,
    /// Authentication secret.
    pub secret: SecretString,
}

impl Credentials {
    /// Creates new credentials.
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: SecretString::new(secret.into()),
        }
    }

    /// Builds the PLAIN initial response: base64("\0user\0secret").
    pub fn plain_initial_response(&self) -> String {
        let raw = format!("\0{}\0{}", self.username, self.secret.expose_secret());
        BASE64.encode(raw.as_bytes())
    }

    /// Builds the base64 username for the LOGIN exchange.
    pub fn login_username(&self) -> String {
        BASE64.encode(self.username.as_bytes())
    }

    /// Builds the base64 secret for the LOGIN exchange.
    pub fn login_secret(&self) -> String {
        BASE64.encode(self.secret.expose_secret().as_bytes())
    }
}
