//! Configuration for the dispatch engine.
//!
//! Provides:
//! - [`DispatchConfig`] with builder pattern for the outbound session
//! - [`DispatchPolicy`] tuning concurrency, pacing, and reconciliation
//! - [`DigestConfig`], the on-disk TOML configuration for a digest run

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::errors::{DispatchError, DispatchResult};
use crate::feed::FeedSource;
use crate::types::Address;

/// Well-known port for implicit TLS submission.
pub const IMPLICIT_TLS_PORT: u16 = 465;

/// Default submission port (STARTTLS upgrade).
pub const DEFAULT_PORT: u16 = 587;

/// Default timeout for connection establishment.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for individual commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Transport security mode for the outbound session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TransportMode {
    /// TLS from the first byte (port 465).
    #[serde(rename = "implicit_tls")]
    ImplicitTls,
    /// Plaintext greeting, then STARTTLS upgrade.
    #[serde(rename = "starttls")]
    StartTls,
}

impl TransportMode {
    /// Selects the mode by well-known-port convention.
    pub fn for_port(port: u16) -> Self {
        if port == IMPLICIT_TLS_PORT {
            TransportMode::ImplicitTls
        } else {
            TransportMode::StartTls
        }
    }
}

/// Policy knobs for batch dispatch.
///
/// The defaults mirror the provider tuning this engine was built against;
/// they are policy, not structure, and every one of them is overridable.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchPolicy {
    /// Maximum units of work admitted concurrently.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Lower bound of the inter-message pacing delay.
    #[serde(default = "default_pacing_min", with = "humantime_serde")]
    pub pacing_min: Duration,
    /// Upper bound of the inter-message pacing delay.
    #[serde(default = "default_pacing_max", with = "humantime_serde")]
    pub pacing_max: Duration,
    /// Redelivery attempts per ledger entry during reconciliation.
    #[serde(default = "default_reconcile_attempts")]
    pub reconcile_attempts: u32,
    /// Fixed backoff between reconciliation attempts.
    #[serde(default = "default_reconcile_backoff", with = "humantime_serde")]
    pub reconcile_backoff: Duration,
}

fn default_max_in_flight() -> usize {
    3
}
fn default_pacing_min() -> Duration {
    Duration::from_millis(1200)
}
fn default_pacing_max() -> Duration {
    Duration::from_millis(1500)
}
fn default_reconcile_attempts() -> u32 {
    3
}
fn default_reconcile_backoff() -> Duration {
    Duration::from_secs(2)
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            pacing_min: default_pacing_min(),
            pacing_max: default_pacing_max(),
            reconcile_attempts: default_reconcile_attempts(),
            reconcile_backoff: default_reconcile_backoff(),
        }
    }
}

impl DispatchPolicy {
    /// Validates the policy.
    pub fn validate(&self) -> DispatchResult<()> {
        if self.max_in_flight == 0 {
            return Err(DispatchError::configuration(
                "max_in_flight must be positive",
            ));
        }
        if self.pacing_min > self.pacing_max {
            return Err(DispatchError::configuration(
                "pacing_min cannot exceed pacing_max",
            ));
        }
        if self.reconcile_attempts == 0 {
            return Err(DispatchError::configuration(
                "reconcile_attempts must be positive",
            ));
        }
        Ok(())
    }
}

/// Configuration for the outbound session and dispatch behavior.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Endpoint hostname.
    pub host: String,
    /// Endpoint port.
    pub port: u16,
    /// Transport security mode.
    pub transport_mode: TransportMode,
    /// Authentication identity.
    pub username: Option<String>,
    /// Authentication secret.
    pub password: Option<SecretString>,
    /// Sender identity placed in the From header and MAIL FROM.
    pub sender: Address,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Per-command timeout.
    pub command_timeout: Duration,
    /// Client identifier for EHLO.
    pub client_id: Option<String>,
    /// Dispatch policy.
    pub policy: DispatchPolicy,
}

impl DispatchConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> DispatchConfigBuilder {
        DispatchConfigBuilder::default()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DispatchResult<()> {
        if self.host.is_empty() {
            return Err(DispatchError::configuration("Host is required"));
        }
        if self.port == 0 {
            return Err(DispatchError::configuration("Port must be non-zero"));
        }
        self.policy.validate()
    }

    /// Returns the full endpoint address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns true if authentication is configured.
    pub fn has_auth(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Returns the client identifier for EHLO.
    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or("localhost")
    }
}

/// Builder for [`DispatchConfig`].
#[derive(Debug, Default)]
pub struct DispatchConfigBuilder {
    host: Option<String>,
    port: u16,
    transport_mode: Option<TransportMode>,
    username: Option<String>,
    password: Option<SecretString>,
    sender_email: Option<String>,
    sender_name: Option<String>,
    sender_address: Option<Address>,
    connect_timeout: Duration,
    command_timeout: Duration,
    client_id: Option<String>,
    policy: DispatchPolicy,
}

impl DispatchConfigBuilder {
    /// Sets the endpoint host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the endpoint port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Overrides the port-derived transport mode.
    pub fn transport_mode(mut self, mode: TransportMode) -> Self {
        self.transport_mode = Some(mode);
        self
    }

    /// Sets authentication credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Sets the sender identity; the address is validated at build time.
    pub fn sender(mut self, email: impl Into<String>, name: impl Into<String>) -> Self {
        self.sender_email = Some(email.into());
        self.sender_name = Some(name.into());
        self
    }

    /// Sets the sender identity from an already-validated address.
    pub fn sender_address(mut self, sender: Address) -> Self {
        self.sender_address = Some(sender);
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per-command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the client identifier for EHLO.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Sets the dispatch policy.
    pub fn policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> DispatchResult<DispatchConfig> {
        let port = if self.port == 0 { DEFAULT_PORT } else { self.port };
        let sender = match (self.sender_address, self.sender_email) {
            (Some(address), _) => address,
            (None, Some(email)) => match self.sender_name {
                Some(name) => Address::with_name(name, email)?,
                None => Address::new(email)?,
            },
            (None, None) => {
                return Err(DispatchError::configuration("Sender identity is required"))
            }
        };

        let config = DispatchConfig {
            host: self
                .host
                .ok_or_else(|| DispatchError::configuration("Host is required"))?,
            port,
            transport_mode: self
                .transport_mode
                .unwrap_or_else(|| TransportMode::for_port(port)),
            username: self.username,
            password: self.password,
            sender,
            connect_timeout: if self.connect_timeout == Duration::ZERO {
                DEFAULT_CONNECT_TIMEOUT
            } else {
                self.connect_timeout
            },
            command_timeout: if self.command_timeout == Duration::ZERO {
                DEFAULT_COMMAND_TIMEOUT
            } else {
                self.command_timeout
            },
            client_id: self.client_id,
            policy: self.policy,
        };

        config.validate()?;
        Ok(config)
    }
}

/// Sender section of the on-disk configuration.
#[derive(Debug, Deserialize)]
pub struct SenderSettings {
    /// Endpoint hostname.
    pub host: String,
    /// Endpoint port. Port 465 selects implicit TLS; anything else STARTTLS.
    #[serde(default = "default_file_port")]
    pub port: u16,
    /// Authentication identity.
    pub username: String,
    /// Authentication secret.
    pub password: SecretString,
    /// From-header address. Defaults to `username`.
    pub from_address: Option<String>,
    /// From-header display name.
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

fn default_file_port() -> u16 {
    DEFAULT_PORT
}
fn default_from_name() -> String {
    "Digest Service".to_string()
}

/// Digest rendering and fallback section of the on-disk configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DigestSettings {
    /// Fixed UTC offset, in hours, for displayed entry timestamps.
    #[serde(default = "default_display_offset")]
    pub display_offset_hours: i32,
    /// Directory for locally saved digest documents when delivery fails.
    #[serde(default = "default_fallback_dir")]
    pub fallback_dir: PathBuf,
    /// User-Agent header for feed requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_display_offset() -> i32 {
    8
}
fn default_fallback_dir() -> PathBuf {
    PathBuf::from("digests")
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (compatible; digest-dispatch)".to_string()
}

impl Default for DigestSettings {
    fn default() -> Self {
        Self {
            display_offset_hours: default_display_offset(),
            fallback_dir: default_fallback_dir(),
            user_agent: default_user_agent(),
        }
    }
}

/// Complete on-disk configuration for a digest run.
#[derive(Debug, Deserialize)]
pub struct DigestConfig {
    /// Outbound session settings.
    pub sender: SenderSettings,
    /// Recipient list; the digest is replicated once per entry.
    pub recipients: Vec<String>,
    /// Feed sources grouped by topic.
    #[serde(default)]
    pub feeds: BTreeMap<String, Vec<FeedSource>>,
    /// Dispatch policy overrides.
    #[serde(default)]
    pub dispatch: DispatchPolicy,
    /// Digest rendering settings.
    #[serde(default)]
    pub digest: DigestSettings,
}

impl DigestConfig {
    /// Loads and parses a TOML configuration file.
    pub fn from_path(path: &Path) -> DispatchResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DispatchError::configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| {
            DispatchError::configuration(format!("Cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the loaded configuration.
    pub fn validate(&self) -> DispatchResult<()> {
        if self.recipients.is_empty() {
            return Err(DispatchError::configuration(
                "At least one recipient is required",
            ));
        }
        for recipient in &self.recipients {
            Address::new(recipient.as_str())?;
        }
        self.dispatch.validate()
    }

    /// Builds the session configuration from the sender section.
    pub fn dispatch_config(&self) -> DispatchResult<DispatchConfig> {
        let from = self
            .sender
            .from_address
            .clone()
            .unwrap_or_else(|| self.sender.username.clone());

        DispatchConfig::builder()
            .host(self.sender.host.clone())
            .port(self.sender.port)
            .credentials(
                self.sender.username.clone(),
                self.sender.password.expose_secret().clone(),
            )
            .sender(from, self.sender.from_name.clone())
            .policy(self.dispatch.clone())
            .build()
    }
}

// Humantime serde support
mod humantime_serde {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_mode_for_port() {
        assert_eq!(TransportMode::for_port(465), TransportMode::ImplicitTls);
        assert_eq!(TransportMode::for_port(587), TransportMode::StartTls);
        assert_eq!(TransportMode::for_port(25), TransportMode::StartTls);
    }

    #[test]
    fn test_config_builder() {
        let config = DispatchConfig::builder()
            .host("smtp.example.com")
            .port(465)
            .credentials("user", "pass")
            .sender("digest@example.com", "Digest Service")
            .build()
            .unwrap();

        assert_eq!(config.host, "smtp.example.com");
        assert_eq!(config.transport_mode, TransportMode::ImplicitTls);
        assert!(config.has_auth());
    }

    #[test]
    fn test_config_defaults() {
        let config = DispatchConfig::builder()
            .host("smtp.example.com")
            .sender("digest@example.com", "Digest Service")
            .build()
            .unwrap();

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.transport_mode, TransportMode::StartTls);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.policy.max_in_flight, 3);
        assert_eq!(config.policy.reconcile_attempts, 3);
    }

    #[test]
    fn test_config_validation() {
        // Missing host
        assert!(DispatchConfig::builder()
            .sender("digest@example.com", "Digest Service")
            .build()
            .is_err());

        // Missing sender
        assert!(DispatchConfig::builder().host("smtp.example.com").build().is_err());

        // Broken policy
        let result = DispatchConfig::builder()
            .host("smtp.example.com")
            .sender("digest@example.com", "Digest Service")
            .policy(DispatchPolicy {
                max_in_flight: 0,
                ..Default::default()
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_digest_config_parse() {
        let raw = r#"
            recipients = ["a@example.com", "b@example.com"]

            [sender]
            host = "smtp.example.com"
            port = 465
            username = "digest@example.com"
            password = "app-password"

            [dispatch]
            max_in_flight = 2
            pacing_min = "100ms"
            pacing_max = "200ms"

            [[feeds.technology]]
            name = "Example Blog"
            url = "https://example.com/feed.xml"
            limit = 5
        "#;

        let config: DigestConfig = toml::from_str(raw).unwrap();
        config.validate().unwrap();

        assert_eq!(config.recipients.len(), 2);
        assert_eq!(config.dispatch.max_in_flight, 2);
        assert_eq!(config.dispatch.pacing_min, Duration::from_millis(100));
        assert_eq!(config.feeds["technology"][0].limit, 5);
        assert_eq!(config.digest.display_offset_hours, 8);

        let dispatch = config.dispatch_config().unwrap();
        assert_eq!(dispatch.transport_mode, TransportMode::ImplicitTls);
        assert_eq!(dispatch.sender.email, "digest@example.com");
    }

    #[test]
    fn test_digest_config_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
                recipients = ["a@example.com"]

                [sender]
                host = "smtp.example.com"
                username = "digest@example.com"
                password = "app-password"
            "#,
        )
        .unwrap();

        let config = DigestConfig::from_path(&path).unwrap();
        assert_eq!(config.sender.port, DEFAULT_PORT);
        assert!(config.feeds.is_empty());

        assert!(DigestConfig::from_path(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_digest_config_rejects_bad_recipient() {
        let raw = r#"
            recipients = ["not-an-address"]

            [sender]
            host = "smtp.example.com"
            username = "digest@example.com"
            password = "app-password"
        "#;

        let config: DigestConfig = toml::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }
}
