//! Mock implementations for testing.
//!
//! [`MockWire`] scripts per-recipient faults and records everything the
//! engine puts on the wire; [`MockConnector`] and [`MockTransport`] stand in
//! for the TCP transport so dispatch behavior can be exercised hermetically.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::DispatchConfig;
use crate::errors::{DispatchError, DispatchErrorKind, DispatchResult};
use crate::protocol::{Command, Reply};
use crate::transport::{Connector, Transport};
use crate::types::Message;

/// A scripted fault for one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The peer drops the session mid-transaction.
    Disconnect,
    /// The server rejects the recipient with this reply code.
    Reject(u16),
}

#[derive(Debug, Default)]
struct WireState {
    /// One-shot faults per recipient, consumed in order.
    queued_faults: Mutex<HashMap<String, VecDeque<Fault>>>,
    /// Faults applied on every attempt for a recipient.
    persistent_faults: Mutex<HashMap<String, Fault>>,
    /// Scripted connect failures, consumed in order.
    connect_faults: Mutex<VecDeque<DispatchErrorKind>>,
    /// Recipients of completed deliveries, in completion order.
    transmitted: Mutex<Vec<String>>,
    /// RCPT TO attempts per recipient.
    attempts: Mutex<HashMap<String, u32>>,
    /// Successful connector dials.
    connects: AtomicU32,
    /// MAIL FROM commands seen (delivery attempts overall).
    transmit_attempts: AtomicU32,
    /// QUIT commands seen (graceful session closes).
    quits: AtomicU32,
}

/// Shared scripting and recording handle for mock transports.
#[derive(Debug, Clone, Default)]
pub struct MockWire(Arc<WireState>);

impl MockWire {
    /// Creates a wire that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a one-shot fault for the next attempt to this recipient.
    pub fn fail_recipient_once(&self, recipient: &str, fault: Fault) {
        self.0
            .queued_faults
            .lock()
            .unwrap()
            .entry(recipient.to_string())
            .or_default()
            .push_back(fault);
    }

    /// Scripts a fault applied to every attempt for this recipient.
    pub fn fail_recipient_always(&self, recipient: &str, fault: Fault) {
        self.0
            .persistent_faults
            .lock()
            .unwrap()
            .insert(recipient.to_string(), fault);
    }

    /// Scripts the next connect to fail with this kind.
    pub fn fail_next_connect(&self, kind: DispatchErrorKind) {
        self.0.connect_faults.lock().unwrap().push_back(kind);
    }

    /// Recipients of completed deliveries, in completion order.
    pub fn transmitted(&self) -> Vec<String> {
        self.0.transmitted.lock().unwrap().clone()
    }

    /// Number of successful dials.
    pub fn connect_count(&self) -> u32 {
        self.0.connects.load(Ordering::SeqCst)
    }

    /// Number of delivery attempts started (MAIL FROM commands).
    pub fn transmit_attempts(&self) -> u32 {
        self.0.transmit_attempts.load(Ordering::SeqCst)
    }

    /// Number of graceful session closes (QUIT commands).
    pub fn quit_count(&self) -> u32 {
        self.0.quits.load(Ordering::SeqCst)
    }

    /// RCPT TO attempts recorded for one recipient.
    pub fn attempts_for(&self, recipient: &str) -> u32 {
        self.0
            .attempts
            .lock()
            .unwrap()
            .get(recipient)
            .copied()
            .unwrap_or(0)
    }

    fn next_fault(&self, recipient: &str) -> Option<Fault> {
        if let Some(queue) = self.0.queued_faults.lock().unwrap().get_mut(recipient) {
            if let Some(fault) = queue.pop_front() {
                return Some(fault);
            }
        }
        self.0
            .persistent_faults
            .lock()
            .unwrap()
            .get(recipient)
            .copied()
    }
}

/// Mock connector producing [`MockTransport`] instances.
#[derive(Debug)]
pub struct MockConnector {
    wire: MockWire,
}

impl MockConnector {
    /// Creates a connector backed by the given wire.
    pub fn new(wire: MockWire) -> Self {
        Self { wire }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _config: &DispatchConfig) -> DispatchResult<Box<dyn Transport>> {
        if let Some(kind) = self.wire.0.connect_faults.lock().unwrap().pop_front() {
            return Err(DispatchError::new(kind, "scripted connect failure"));
        }
        self.wire.0.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockTransport {
            wire: self.wire.clone(),
            pending: None,
        }))
    }
}

/// Mock transport applying scripted faults at the RCPT TO step.
#[derive(Debug)]
pub struct MockTransport {
    wire: MockWire,
    /// Recipient of the in-flight transaction, recorded on completion.
    pending: Option<String>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_command(&mut self, command: &Command) -> DispatchResult<Reply> {
        match command {
            Command::Ehlo(_) => Ok(Reply {
                code: 250,
                lines: vec!["mock server".to_string(), "AUTH PLAIN".to_string()],
            }),
            Command::Helo(_) => Ok(Reply::new(250, "mock server")),
            Command::StartTls => Ok(Reply::new(220, "ready")),
            Command::Auth { .. } => Ok(Reply::new(235, "accepted")),
            Command::MailFrom { .. } => {
                self.wire.0.transmit_attempts.fetch_add(1, Ordering::SeqCst);
                self.pending = None;
                Ok(Reply::new(250, "sender ok"))
            }
            Command::RcptTo { address } => {
                let recipient = address.trim_matches(|c| c == '<' || c == '>').to_string();
                *self
                    .wire
                    .0
                    .attempts
                    .lock()
                    .unwrap()
                    .entry(recipient.clone())
                    .or_insert(0) += 1;

                match self.wire.next_fault(&recipient) {
                    Some(Fault::Disconnect) => {
                        Err(DispatchError::disconnected("connection dropped by peer"))
                    }
                    Some(Fault::Reject(code)) => Ok(Reply::new(code, "rejected")),
                    None => {
                        self.pending = Some(recipient);
                        Ok(Reply::new(250, "recipient ok"))
                    }
                }
            }
            Command::Data => Ok(Reply::new(354, "start mail input")),
            Command::Rset => {
                self.pending = None;
                Ok(Reply::new(250, "ok"))
            }
            Command::Noop => Ok(Reply::new(250, "ok")),
            Command::Quit => {
                self.wire.0.quits.fetch_add(1, Ordering::SeqCst);
                Ok(Reply::new(221, "bye"))
            }
        }
    }

    async fn send_data(&mut self, _data: &[u8]) -> DispatchResult<()> {
        Ok(())
    }

    async fn read_reply(&mut self) -> DispatchResult<Reply> {
        if let Some(recipient) = self.pending.take() {
            self.wire.0.transmitted.lock().unwrap().push(recipient);
            return Ok(Reply::new(250, "accepted"));
        }
        Ok(Reply::new(250, "ok"))
    }

    async fn upgrade_tls(&mut self, _host: &str) -> DispatchResult<()> {
        Ok(())
    }

    fn is_tls(&self) -> bool {
        // Mock sessions are born secure so connect() skips STARTTLS.
        true
    }

    async fn close(&mut self) -> DispatchResult<()> {
        Ok(())
    }
}

/// Creates a valid test message for the given recipient.
pub fn test_message(recipient: &str) -> Message {
    Message::builder()
        .recipient(recipient)
        .subject("Daily digest")
        .body("<p>test body</p>")
        .build()
        .expect("test message is valid")
}
