//! SMTP wire protocol model.
//!
//! A condensed RFC 5321 command/response layer: just the commands a
//! submission client needs, multiline reply parsing, and the EHLO
//! capability scan.

use std::fmt;

use crate::auth::Mechanism;
use crate::errors::{DispatchError, DispatchResult};

/// Well-known reply codes.
pub mod codes {
    /// Service ready greeting.
    pub const SERVICE_READY: u16 = 220;
    /// Requested action completed.
    pub const OK: u16 = 250;
    /// Authentication succeeded.
    pub const AUTH_SUCCESS: u16 = 235;
    /// Server expects more authentication data.
    pub const AUTH_CONTINUE: u16 = 334;
    /// Start mail input.
    pub const START_MAIL_INPUT: u16 = 354;
    /// Service closing transmission channel.
    pub const CLOSING: u16 = 221;
    /// Service not available, closing.
    pub const SHUTTING_DOWN: u16 = 421;
}

/// SMTP commands issued by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Extended HELLO with client identity.
    Ehlo(String),
    /// Basic HELLO fallback.
    Helo(String),
    /// Start TLS negotiation.
    StartTls,
    /// Authenticate.
    Auth {
        /// Authentication mechanism name.
        mechanism: String,
        /// Initial response (optional).
        initial_response: Option<String>,
    },
    /// MAIL FROM command.
    MailFrom {
        /// Sender address in angle brackets.
        address: String,
    },
    /// RCPT TO command.
    RcptTo {
        /// Recipient address in angle brackets.
        address: String,
    },
    /// DATA command.
    Data,
    /// Reset the current transaction.
    Rset,
    /// No operation (keepalive).
    Noop,
    /// Quit the session.
    Quit,
}

impl Command {
    /// Formats the command for the wire, without the trailing CRLF.
    pub fn to_wire(&self) -> String {
        match self {
            Command::Ehlo(domain) => format!("EHLO {}", domain),
            Command::Helo(domain) => format!("HELO {}", domain),
            Command::StartTls => "STARTTLS".to_string(),
            Command::Auth {
                mechanism,
                initial_response,
            } => match initial_response {
                Some(response) => format!("AUTH {} {}", mechanism, response),
                None => format!("AUTH {}", mechanism),
            },
            Command::MailFrom { address } => format!("MAIL FROM:{}", address),
            Command::RcptTo { address } => format!("RCPT TO:{}", address),
            Command::Data => "DATA".to_string(),
            Command::Rset => "RSET".to_string(),
            Command::Noop => "NOOP".to_string(),
            Command::Quit => "QUIT".to_string(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}

/// SMTP reply from the server.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Status code (e.g., 250, 354, 550).
    pub code: u16,
    /// Reply message lines.
    pub lines: Vec<String>,
}

impl Reply {
    /// Creates a single-line reply.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![message.into()],
        }
    }

    /// Parses a reply from raw lines as read off the wire.
    pub fn parse(raw: &[String]) -> DispatchResult<Self> {
        if raw.is_empty() {
            return Err(DispatchError::protocol("Empty reply"));
        }

        let mut code = 0u16;
        let mut lines = Vec::with_capacity(raw.len());

        for (i, line) in raw.iter().enumerate() {
            if line.len() < 3 {
                return Err(DispatchError::protocol(format!("Reply too short: {}", line)));
            }
            let parsed: u16 = line[..3]
                .parse()
                .map_err(|_| DispatchError::protocol(format!("Invalid status code: {}", line)))?;
            if i == 0 {
                code = parsed;
            } else if parsed != code {
                return Err(DispatchError::protocol(
                    "Inconsistent status codes in multiline reply",
                ));
            }
            lines.push(line.get(4..).unwrap_or("").to_string());
        }

        Ok(Self { code, lines })
    }

    /// Returns true if this is a success reply (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Returns true if this is a positive intermediate reply (3xx).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Returns the first message line.
    pub fn first_line(&self) -> &str {
        self.lines.first().map(String::as_str).unwrap_or("")
    }

    /// Returns all message lines joined.
    pub fn full_message(&self) -> String {
        self.lines.join("\n")
    }

    /// Converts to an error for a non-success reply.
    pub fn to_error(&self) -> DispatchError {
        DispatchError::from_smtp_reply(self.code, self.full_message())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.first_line())
    }
}

/// Capabilities announced in the EHLO reply.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// STARTTLS supported.
    pub starttls: bool,
    /// Announced AUTH mechanisms.
    pub auth_mechanisms: Vec<Mechanism>,
    /// Raw capability lines.
    pub raw: Vec<String>,
}

impl Capabilities {
    /// Parses capabilities from an EHLO reply.
    pub fn from_ehlo(reply: &Reply) -> Self {
        let mut caps = Self::default();

        for line in &reply.lines {
            let line = line.trim().to_uppercase();
            if line.is_empty() {
                continue;
            }
            caps.raw.push(line.clone());

            let (keyword, params) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            match keyword {
                "STARTTLS" => caps.starttls = true,
                "AUTH" => {
                    for mech in params.split_whitespace() {
                        if let Some(mechanism) = Mechanism::from_capability(mech) {
                            caps.auth_mechanisms.push(mechanism);
                        }
                    }
                }
                _ => {}
            }
        }

        caps
    }

    /// Returns true if authentication is available.
    pub fn has_auth(&self) -> bool {
        !self.auth_mechanisms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        assert_eq!(Command::Ehlo("client".into()).to_wire(), "EHLO client");
        assert_eq!(
            Command::MailFrom {
                address: "<d@example.com>".into()
            }
            .to_wire(),
            "MAIL FROM:<d@example.com>"
        );
        assert_eq!(
            Command::RcptTo {
                address: "<r@example.com>".into()
            }
            .to_wire(),
            "RCPT TO:<r@example.com>"
        );
        assert_eq!(Command::Data.to_wire(), "DATA");
        assert_eq!(Command::Quit.to_wire(), "QUIT");
    }

    #[test]
    fn test_reply_parse_single() {
        let reply = Reply::parse(&["250 OK".to_string()]).unwrap();
        assert_eq!(reply.code, 250);
        assert!(reply.is_success());
        assert_eq!(reply.first_line(), "OK");
    }

    #[test]
    fn test_reply_parse_multiline() {
        let raw = vec![
            "250-smtp.example.com".to_string(),
            "250-STARTTLS".to_string(),
            "250 AUTH PLAIN LOGIN".to_string(),
        ];
        let reply = Reply::parse(&raw).unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.lines.len(), 3);
    }

    #[test]
    fn test_reply_parse_rejects_mixed_codes() {
        let raw = vec!["250-ok".to_string(), "354 nope".to_string()];
        assert!(Reply::parse(&raw).is_err());
    }

    #[test]
    fn test_capabilities_from_ehlo() {
        let raw = vec![
            "250-smtp.example.com Hello".to_string(),
            "250-STARTTLS".to_string(),
            "250 AUTH PLAIN LOGIN".to_string(),
        ];
        let reply = Reply::parse(&raw).unwrap();
        let caps = Capabilities::from_ehlo(&reply);

        assert!(caps.starttls);
        assert!(caps.has_auth());
        assert!(caps.auth_mechanisms.contains(&Mechanism::Plain));
        assert!(caps.auth_mechanisms.contains(&Mechanism::Login));
    }
}
