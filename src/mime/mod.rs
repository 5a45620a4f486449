//! RFC 5322 message rendering.
//!
//! Turns a [`Message`](crate::types::Message) into the byte stream sent
//! after DATA: headers, a base64-encoded single-part body, dot-stuffing,
//! and the end-of-data marker.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use uuid::Uuid;

use crate::types::{Address, Message};

/// Maximum line length for encoded body content.
const BODY_LINE_LENGTH: usize = 76;

/// Renders messages into wire-ready form.
#[derive(Debug, Clone)]
pub struct MessageRenderer {
    /// Domain used in generated Message-IDs.
    domain: String,
}

impl MessageRenderer {
    /// Creates a renderer generating Message-IDs under the given domain.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
        }
    }

    /// Generates a fresh Message-ID.
    pub fn generate_message_id(&self) -> String {
        format!("<{}@{}>", Uuid::new_v4(), self.domain)
    }

    /// Renders the full message: headers, blank line, encoded body.
    ///
    /// The output uses CRLF line endings and is already dot-stuffed and
    /// terminated with the `CRLF . CRLF` end-of-data marker.
    pub fn render(&self, message: &Message, sender: &Address) -> Vec<u8> {
        let mut out = String::new();

        out.push_str(&format!("Date: {}\r\n", Utc::now().to_rfc2822()));
        out.push_str(&format!("From: {}\r\n", sender.to_header()));
        out.push_str(&format!("To: {}\r\n", message.recipient().to_header()));
        out.push_str(&format!("Subject: {}\r\n", encode_header_value(message.subject())));
        out.push_str(&format!("Message-ID: {}\r\n", self.generate_message_id()));
        out.push_str("MIME-Version: 1.0\r\n");
        out.push_str(&format!("Content-Type: {}\r\n", message.content().mime_type()));
        out.push_str("Content-Transfer-Encoding: base64\r\n");
        out.push_str("\r\n");
        out.push_str(&encode_body(message.body()));

        prepare_data(out.as_bytes())
    }
}

/// Encodes a header value as an RFC 2047 encoded-word when it contains
/// non-ASCII characters, passing plain ASCII through untouched.
pub fn encode_header_value(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?utf-8?B?{}?=", BASE64.encode(value.as_bytes()))
    }
}

/// Base64-encodes a body, wrapped to wire-safe line lengths.
fn encode_body(body: &str) -> String {
    let encoded = BASE64.encode(body.as_bytes());
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / BODY_LINE_LENGTH * 2);
    for chunk in encoded.as_bytes().chunks(BODY_LINE_LENGTH) {
        wrapped.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        wrapped.push_str("\r\n");
    }
    wrapped
}

/// Prepares content for the DATA phase: normalizes line endings to CRLF,
/// dot-stuffs leading periods, and appends the end-of-data marker.
pub fn prepare_data(content: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(content);
    let mut out = Vec::with_capacity(content.len() + 8);

    for line in text.split("\r\n") {
        if line.starts_with('.') {
            out.push(b'.');
        }
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    // Strip the artificial final blank line introduced by a trailing CRLF.
    if text.ends_with("\r\n") {
        out.truncate(out.len() - 2);
    }

    out.extend_from_slice(b".\r\n");
    out
}
