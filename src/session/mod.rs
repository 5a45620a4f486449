//! The outbound session.
//!
//! A [`Session`] owns the single transport connection used for every
//! delivery in a batch. State moves between `Disconnected` and `Connected`
//! only through [`Session::connect`] and [`Session::disconnect`]; a
//! disconnect-class transmit failure drops the transport and parks the
//! session back in `Disconnected` so the dispatcher can repair it.

use std::sync::Arc;

use crate::auth::{Credentials, Mechanism};
use crate::config::{DispatchConfig, TransportMode};
use crate::errors::{DispatchError, DispatchResult};
use crate::mime::MessageRenderer;
use crate::protocol::{codes, Capabilities, Command};
use crate::transport::{Connector, TcpConnector, Transport};
use crate::types::Message;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No live transport handle exists.
    Disconnected,
    /// An established, authenticated transport is ready for transmission.
    Connected,
}

/// The single outbound connection to the delivery endpoint.
pub struct Session {
    config: Arc<DispatchConfig>,
    connector: Arc<dyn Connector>,
    renderer: MessageRenderer,
    transport: Option<Box<dyn Transport>>,
    state: SessionState,
}

impl Session {
    /// Creates a disconnected session using the production TCP connector.
    pub fn new(config: Arc<DispatchConfig>) -> Self {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    /// Creates a disconnected session with a custom connector.
    pub fn with_connector(config: Arc<DispatchConfig>, connector: Arc<dyn Connector>) -> Self {
        let renderer = MessageRenderer::new(config.client_id().to_string());
        Self {
            config,
            connector,
            renderer,
            transport: None,
            state: SessionState::Disconnected,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true when a live transport exists.
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Establishes and authenticates the transport.
    ///
    /// A no-op when already connected. On any network, TLS, or
    /// authentication error the session stays disconnected and the error
    /// carries the underlying cause.
    pub async fn connect(&mut self) -> DispatchResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        match self.establish().await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.state = SessionState::Connected;
                tracing::info!(endpoint = %self.config.address(), "session established");
                Ok(())
            }
            Err(e) => {
                self.transport = None;
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn establish(&mut self) -> DispatchResult<Box<dyn Transport>> {
        let mut transport = self.connector.connect(&self.config).await?;

        let mut caps = self.greet(transport.as_mut()).await?;

        // STARTTLS upgrade, then re-greet: capabilities can change under TLS.
        if self.config.transport_mode == TransportMode::StartTls && !transport.is_tls() {
            if !caps.starttls {
                return Err(DispatchError::tls("Server does not offer STARTTLS"));
            }
            let reply = transport.send_command(&Command::StartTls).await?;
            if reply.code != codes::SERVICE_READY {
                return Err(DispatchError::tls(format!("STARTTLS refused: {}", reply)));
            }
            transport.upgrade_tls(&self.config.host).await?;
            caps = self.greet(transport.as_mut()).await?;
        }

        if self.config.has_auth() {
            self.authenticate(transport.as_mut(), &caps).await?;
        }

        Ok(transport)
    }

    async fn greet(&self, transport: &mut dyn Transport) -> DispatchResult<Capabilities> {
        let client_id = self.config.client_id().to_string();
        let reply = transport.send_command(&Command::Ehlo(client_id.clone())).await?;

        if reply.is_success() {
            return Ok(Capabilities::from_ehlo(&reply));
        }

        // Pre-ESMTP servers want HELO; they have no capabilities to offer.
        let reply = transport.send_command(&Command::Helo(client_id)).await?;
        if reply.is_success() {
            Ok(Capabilities::default())
        } else {
            Err(reply.to_error())
        }
    }

    async fn authenticate(
        &self,
        transport: &mut dyn Transport,
        caps: &Capabilities,
    ) -> DispatchResult<()> {
        let credentials = Credentials {
            username: self.config.username.clone().unwrap_or_default(),
            secret: self
                .config
                .password
                .clone()
                .ok_or_else(|| DispatchError::authentication("Password is not configured"))?,
        };

        let mechanism = Mechanism::select(&caps.auth_mechanisms)
            .ok_or_else(|| DispatchError::authentication("No usable AUTH mechanism announced"))?;

        match mechanism {
            Mechanism::Plain => {
                let reply = transport
                    .send_command(&Command::Auth {
                        mechanism: "PLAIN".to_string(),
                        initial_response: Some(credentials.plain_initial_response()),
                    })
                    .await?;
                if reply.code != codes::AUTH_SUCCESS {
                    return Err(DispatchError::authentication(reply.full_message())
                        .with_smtp_code(reply.code));
                }
            }
            Mechanism::Login => {
                let reply = transport
                    .send_command(&Command::Auth {
                        mechanism: "LOGIN".to_string(),
                        initial_response: None,
                    })
                    .await?;
                if reply.code != codes::AUTH_CONTINUE {
                    return Err(DispatchError::authentication(reply.full_message())
                        .with_smtp_code(reply.code));
                }

                transport
                    .send_data(format!("{}\r\n", credentials.login_username()).as_bytes())
                    .await?;
                let reply = transport.read_reply().await?;
                if reply.code != codes::AUTH_CONTINUE {
                    return Err(DispatchError::authentication(reply.full_message())
                        .with_smtp_code(reply.code));
                }

                transport
                    .send_data(format!("{}\r\n", credentials.login_secret()).as_bytes())
                    .await?;
                let reply = transport.read_reply().await?;
                if reply.code != codes::AUTH_SUCCESS {
                    return Err(DispatchError::authentication(reply.full_message())
                        .with_smtp_code(reply.code));
                }
            }
        }

        Ok(())
    }

    /// Transmits one message over the live transport.
    ///
    /// Requires a connected session; connecting first is the caller's job.
    /// Disconnect-class failures drop the transport and mark the session
    /// disconnected before the error is returned.
    pub async fn transmit(&mut self, message: &Message) -> DispatchResult<()> {
        if !self.is_connected() {
            return Err(DispatchError::disconnected("Session is not connected"));
        }

        let result = self.transmit_inner(message).await;

        if let Err(e) = &result {
            if e.is_disconnect() {
                self.mark_disconnected();
            }
        }

        result
    }

    async fn transmit_inner(&mut self, message: &Message) -> DispatchResult<()> {
        let rendered = self.renderer.render(message, &self.config.sender);
        let sender = self.config.sender.to_smtp();

        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| DispatchError::disconnected("Session has no transport"))?;

        let reply = transport
            .send_command(&Command::MailFrom { address: sender })
            .await?;
        if !reply.is_success() {
            return Err(reply.to_error());
        }

        let reply = transport
            .send_command(&Command::RcptTo {
                address: message.recipient().to_smtp(),
            })
            .await?;
        if !reply.is_success() {
            let err = reply.to_error();
            if !err.is_disconnect() {
                // Clear the aborted transaction so the session stays usable.
                let _ = transport.send_command(&Command::Rset).await;
            }
            return Err(err);
        }

        let reply = transport.send_command(&Command::Data).await?;
        if reply.code != codes::START_MAIL_INPUT {
            return Err(reply.to_error());
        }

        transport.send_data(&rendered).await?;

        let reply = transport.read_reply().await?;
        if !reply.is_success() {
            return Err(reply.to_error());
        }

        Ok(())
    }

    /// Closes the session gracefully.
    ///
    /// Errors during close are logged, never propagated; the session is
    /// always disconnected afterwards.
    pub async fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.send_command(&Command::Quit).await {
                tracing::warn!(error = %e, "QUIT failed during session close");
            }
            if let Err(e) = transport.close().await {
                tracing::warn!(error = %e, "transport close failed");
            }
            tracing::info!("session closed");
        }
        self.state = SessionState::Disconnected;
    }

    /// Drops the transport after a session-loss failure.
    fn mark_disconnected(&mut self) {
        self.transport = None;
        self.state = SessionState::Disconnected;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.config.address())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockConnector, MockWire};

    fn config() -> Arc<DispatchConfig> {
        Arc::new(
            DispatchConfig::builder()
                .host("smtp.example.com")
                .port(465)
                .credentials("digest@example.com", "secret")
                .sender("digest@example.com", "Digest Service")
                .build()
                .unwrap(),
        )
    }

    fn message(recipient: &str) -> Message {
        Message::builder()
            .recipient(recipient)
            .subject("Daily digest")
            .body("<p>hi</p>")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let wire = MockWire::new();
        let mut session = Session::with_connector(config(), Arc::new(MockConnector::new(wire.clone())));

        session.connect().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(wire.connect_count(), 1);

        // Second connect performs no network action.
        session.connect().await.unwrap();
        assert_eq!(wire.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_disconnected() {
        let wire = MockWire::new();
        wire.fail_next_connect(crate::errors::DispatchErrorKind::Authentication);
        let mut session = Session::with_connector(config(), Arc::new(MockConnector::new(wire)));

        let err = session.connect().await.unwrap_err();
        assert!(err.is_connection_failure());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_transmit_requires_connection() {
        let wire = MockWire::new();
        let mut session = Session::with_connector(config(), Arc::new(MockConnector::new(wire)));

        let err = session.transmit(&message("r@example.com")).await.unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_transmit_success_records_delivery() {
        let wire = MockWire::new();
        let mut session = Session::with_connector(config(), Arc::new(MockConnector::new(wire.clone())));

        session.connect().await.unwrap();
        session.transmit(&message("r@example.com")).await.unwrap();

        assert_eq!(wire.transmitted(), vec!["r@example.com".to_string()]);
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_disconnect_class_error_drops_transport() {
        let wire = MockWire::new();
        wire.fail_recipient_once("r@example.com", crate::mocks::Fault::Disconnect);
        let mut session = Session::with_connector(config(), Arc::new(MockConnector::new(wire)));

        session.connect().await.unwrap();
        let err = session.transmit(&message("r@example.com")).await.unwrap_err();
        assert!(err.is_disconnect());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_rejection_keeps_session_connected() {
        let wire = MockWire::new();
        wire.fail_recipient_always("r@example.com", crate::mocks::Fault::Reject(550));
        let mut session = Session::with_connector(config(), Arc::new(MockConnector::new(wire)));

        session.connect().await.unwrap();
        let err = session.transmit(&message("r@example.com")).await.unwrap_err();
        assert!(!err.is_disconnect());
        assert_eq!(err.smtp_code(), Some(550));
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_disconnect_always_ends_disconnected() {
        let wire = MockWire::new();
        let mut session = Session::with_connector(config(), Arc::new(MockConnector::new(wire)));

        session.connect().await.unwrap();
        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Disconnected);

        // Safe on an already-disconnected session.
        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
