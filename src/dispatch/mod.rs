//! Batch dispatch orchestration.
//!
//! The [`Dispatcher`] delivers a batch of messages over one session: a
//! semaphore bounds how many units of work are admitted at once, a mutex
//! around the session serializes actual wire access, and a separate
//! reconnect gate keeps concurrent units from racing to repair a lost
//! session. Failures are isolated per message and collected in the
//! [`FailureLedger`]; a reconciliation pass retries them before the session
//! is torn down.

mod ledger;

pub use ledger::FailureLedger;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::sleep;

use crate::config::{DispatchConfig, DispatchPolicy};
use crate::errors::DispatchResult;
use crate::observability::DispatchMetrics;
use crate::session::Session;
use crate::transport::Connector;
use crate::types::{BatchReport, Message};

/// Delivers batches of messages over a single owned session.
pub struct Dispatcher {
    /// Transmission guard: exclusive access to the session.
    session: Mutex<Session>,
    /// Serializes reconnect attempts so units never race to repair.
    reconnect_gate: Mutex<()>,
    /// Admission slots for concurrent units of work.
    slots: Semaphore,
    /// Messages that failed during the current batch.
    ledger: FailureLedger,
    policy: DispatchPolicy,
    metrics: Arc<DispatchMetrics>,
}

impl Dispatcher {
    /// Creates a dispatcher with the production TCP connector.
    pub fn new(config: DispatchConfig) -> Self {
        let config = Arc::new(config);
        Self::build(Session::new(config.clone()), config.policy.clone())
    }

    /// Creates a dispatcher with a custom connector.
    pub fn with_connector(config: DispatchConfig, connector: Arc<dyn Connector>) -> Self {
        let config = Arc::new(config);
        Self::build(
            Session::with_connector(config.clone(), connector),
            config.policy.clone(),
        )
    }

    fn build(session: Session, policy: DispatchPolicy) -> Self {
        Self {
            session: Mutex::new(session),
            reconnect_gate: Mutex::new(()),
            slots: Semaphore::new(policy.max_in_flight),
            ledger: FailureLedger::new(),
            policy,
            metrics: Arc::new(DispatchMetrics::new()),
        }
    }

    /// Returns the metrics collector.
    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    /// Returns the messages currently in the failure ledger.
    pub fn unresolved(&self) -> Vec<Message> {
        self.ledger.entries()
    }

    /// Delivers a batch of messages.
    ///
    /// An empty batch is a no-op. A failure to establish the session aborts
    /// the whole batch before any delivery is attempted. Otherwise every
    /// message reaches a terminal success or failure state, failed messages
    /// get a reconciliation retry pass, and the session is disconnected
    /// before this returns, whatever happened in between.
    pub async fn send_batch(&self, messages: Vec<Message>) -> DispatchResult<BatchReport> {
        if messages.is_empty() {
            tracing::warn!("empty batch, nothing to dispatch");
            return Ok(BatchReport::empty());
        }

        let start = Instant::now();
        let total = messages.len();

        // Fatal short-circuit: no session, no deliveries.
        {
            let mut session = self.session.lock().await;
            self.metrics.record_connect();
            if let Err(e) = session.connect().await {
                tracing::error!(error = %e, "batch aborted, session could not be established");
                return Err(e);
            }
        }

        let delivered = self.run_main_pass(&messages).await;
        let (recovered, unresolved) = self.reconcile().await;

        // Teardown is unconditional.
        {
            let mut session = self.session.lock().await;
            session.disconnect().await;
        }

        for message in &unresolved {
            self.metrics.record_failed();
            tracing::error!(
                recipient = %message.recipient().email,
                "delivery still unresolved after reconciliation"
            );
        }

        Ok(BatchReport {
            total,
            delivered: delivered + recovered,
            recovered,
            unresolved,
            duration: start.elapsed(),
        })
    }

    /// Fans the batch out under the admission semaphore. Failures are
    /// recorded in the ledger, never raised; returns the success count.
    async fn run_main_pass(&self, messages: &[Message]) -> usize {
        let delivered = AtomicUsize::new(0);

        let units = messages.iter().map(|message| {
            let delivered = &delivered;
            async move {
                let Ok(_permit) = self.slots.acquire().await else {
                    return;
                };
                self.metrics.slot_acquired();
                let outcome = self.deliver(message).await;
                self.metrics.slot_released();

                match outcome {
                    Ok(()) => {
                        delivered.fetch_add(1, Ordering::SeqCst);
                        self.metrics.record_delivered();
                        tracing::info!(recipient = %message.recipient().email, "message sent");
                    }
                    Err(e) => {
                        tracing::warn!(
                            recipient = %message.recipient().email,
                            error = %e,
                            "delivery failed, recorded for reconciliation"
                        );
                        self.ledger.record(message.clone());
                    }
                }
            }
        });

        futures::future::join_all(units).await;
        delivered.load(Ordering::SeqCst)
    }

    /// Per-message send logic, shared by the main pass and reconciliation.
    ///
    /// Runs entirely under the transmission guard. A disconnect-class
    /// failure triggers exactly one reconnect-and-retry before the failure
    /// is handed back to the caller.
    async fn deliver(&self, message: &Message) -> DispatchResult<()> {
        let mut session = self.session.lock().await;

        if !session.is_connected() {
            self.reconnect(&mut session).await?;
        }

        match session.transmit(message).await {
            Ok(()) => {
                self.pace().await;
                Ok(())
            }
            Err(e) if e.is_disconnect() => {
                tracing::warn!(
                    recipient = %message.recipient().email,
                    error = %e,
                    "session lost mid-delivery, reconnecting"
                );
                self.reconnect(&mut session).await?;
                session.transmit(message).await?;
                self.pace().await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Repairs the session under the reconnect gate.
    async fn reconnect(&self, session: &mut Session) -> DispatchResult<()> {
        let _gate = self.reconnect_gate.lock().await;
        if session.is_connected() {
            return Ok(());
        }
        self.metrics.record_reconnect();
        session.connect().await
    }

    /// Inter-message pacing, applied before the transmission guard is
    /// released. Sampled uniformly from the configured window.
    async fn pace(&self) {
        let min = self.policy.pacing_min;
        let max = self.policy.pacing_max;
        let delay = if min >= max {
            min
        } else {
            let ms = rand::thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64);
            Duration::from_millis(ms)
        };
        if delay > Duration::ZERO {
            sleep(delay).await;
        }
    }

    /// Reconciliation pass: retries every ledger entry in recorded order,
    /// with a fixed backoff between attempts. Entries that succeed drop out;
    /// the rest become the residual ledger.
    async fn reconcile(&self) -> (usize, Vec<Message>) {
        let pending = self.ledger.take();
        if pending.is_empty() {
            return (0, Vec::new());
        }

        tracing::info!(count = pending.len(), "reconciling failed deliveries");

        let mut residual = Vec::new();
        let mut recovered = 0;

        for message in pending {
            let mut delivered = false;

            for attempt in 1..=self.policy.reconcile_attempts {
                self.metrics.record_reconcile_attempt();
                match self.deliver(&message).await {
                    Ok(()) => {
                        recovered += 1;
                        self.metrics.record_delivered();
                        tracing::info!(
                            recipient = %message.recipient().email,
                            attempt,
                            "redelivered during reconciliation"
                        );
                        delivered = true;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            recipient = %message.recipient().email,
                            attempt,
                            error = %e,
                            "reconciliation attempt failed"
                        );
                        if attempt < self.policy.reconcile_attempts {
                            sleep(self.policy.reconcile_backoff).await;
                        }
                    }
                }
            }

            if !delivered {
                residual.push(message);
            }
        }

        self.ledger.replace(residual.clone());
        (recovered, residual)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("max_in_flight", &self.policy.max_in_flight)
            .field("pending_failures", &self.ledger.len())
            .finish()
    }
}
