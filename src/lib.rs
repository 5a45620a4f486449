//! # Digest Dispatch
//!
//! A batch notification dispatch engine for periodic digest delivery:
//! - Single authenticated SMTP session (implicit TLS or STARTTLS) reused
//!   across a whole batch
//! - Bounded-concurrency fan-out with serialized wire access
//! - Automatic reconnect and inline retry on session loss
//! - Per-message failure isolation with a reconciliation retry pass
//! - Feed collection (RSS/Atom) and digest rendering collaborators
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use digest_dispatch::{Dispatcher, DispatchConfig, Message, ContentKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DispatchConfig::builder()
//!         .host("smtp.example.com")
//!         .port(587)
//!         .credentials("digest@example.com", "password")
//!         .sender("digest@example.com", "Digest Service")
//!         .build()?;
//!
//!     let messages = vec![Message::builder()
//!         .recipient("reader@example.com")
//!         .subject("Daily digest")
//!         .body("<h1>Hello</h1>")
//!         .content(ContentKind::Html)
//!         .build()?];
//!
//!     let dispatcher = Dispatcher::new(config);
//!     let report = dispatcher.send_batch(messages).await?;
//!     println!("delivered {}/{}", report.delivered, report.total);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Protocol layer
pub mod protocol;

// Transport layer
pub mod transport;

// Authentication
pub mod auth;

// Message rendering
pub mod mime;

// Session and dispatch
pub mod dispatch;
pub mod session;

// Observability
pub mod observability;

// Content collaborators
pub mod digest;
pub mod feed;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use config::{DigestConfig, DispatchConfig, DispatchConfigBuilder, DispatchPolicy, TransportMode};
pub use dispatch::{Dispatcher, FailureLedger};
pub use errors::{DispatchError, DispatchErrorKind, DispatchResult};
pub use feed::{FeedCollector, FeedEntry, FeedSource, SourceDigest, TopicDigest};
pub use session::{Session, SessionState};
pub use types::{Address, BatchReport, ContentKind, Message, MessageBuilder};
