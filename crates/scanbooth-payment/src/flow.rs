// SPDX-License-Identifier: MIT
//
// Payment flow state machine.
//
// One attempt at a time: link creation, settlement polling at a fixed
// interval, and a single-shot timeout that is terminal for the attempt.
// Completion is reported as events tagged with the attempt id so a
// superseded attempt's notifications can be recognised and dropped.

use std::sync::{Arc, Mutex};

use scanbooth_core::config::PaymentConfig;
use scanbooth_core::error::KioskError;
use scanbooth_core::types::{PaymentAttemptId, PaymentMode, PaymentState};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::provider::{item_name, LinkRequest, LinkStatus, PaymentProvider};
use crate::qr::QrEncoder;

/// Fixed auto-verification delay in simulated mode.
const SIMULATED_DELAY: Duration = Duration::from_secs(3);

/// Notifications emitted by the flow, tagged with the attempt they belong
/// to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    /// The checkout link exists and can be shown to the buyer.
    LinkReady {
        attempt: PaymentAttemptId,
        checkout_url: String,
        qr_data_url: String,
    },
    Verified {
        attempt: PaymentAttemptId,
        order_id: String,
    },
    Failed {
        attempt: PaymentAttemptId,
        reason: String,
    },
    TimedOut { attempt: PaymentAttemptId },
}

impl PaymentEvent {
    pub fn attempt(&self) -> PaymentAttemptId {
        match self {
            PaymentEvent::LinkReady { attempt, .. }
            | PaymentEvent::Verified { attempt, .. }
            | PaymentEvent::Failed { attempt, .. }
            | PaymentEvent::TimedOut { attempt } => *attempt,
        }
    }
}

struct ActiveAttempt {
    id: PaymentAttemptId,
    task: JoinHandle<()>,
}

/// Payment-link lifecycle driver.
///
/// `Idle → LinkRequested → AwaitingPayment → {Verified | TimedOut |
/// Failed} → Idle`. Creating a new link implicitly cancels any prior
/// unresolved attempt, so at most one attempt's poll/timeout timers are
/// ever live.
pub struct PaymentFlow {
    provider: Arc<dyn PaymentProvider>,
    qr: Arc<dyn QrEncoder>,
    config: PaymentConfig,
    events: mpsc::Sender<PaymentEvent>,
    state: Arc<Mutex<PaymentState>>,
    active: Option<ActiveAttempt>,
}

impl PaymentFlow {
    pub fn new(
        provider: Arc<dyn PaymentProvider>,
        qr: Arc<dyn QrEncoder>,
        config: PaymentConfig,
        events: mpsc::Sender<PaymentEvent>,
    ) -> Self {
        Self {
            provider,
            qr,
            config,
            events,
            state: Arc::new(Mutex::new(PaymentState::Idle)),
            active: None,
        }
    }

    /// Current state of the active (or last) attempt.
    pub fn state(&self) -> PaymentState {
        *self.state.lock().expect("payment state lock poisoned")
    }

    /// Attempt id currently live, if any.
    pub fn active_attempt(&self) -> Option<PaymentAttemptId> {
        self.active.as_ref().map(|a| a.id)
    }

    /// Begin a payment attempt for `quantity` credits.
    ///
    /// An unknown quantity fails immediately with no side effects. Any
    /// prior unresolved attempt is cancelled first.
    #[instrument(skip(self, buyer_contact))]
    pub fn create_link(&mut self, quantity: u32, buyer_contact: &str) -> PaymentAttemptId {
        // One attempt's timers at a time.
        self.reset();

        let attempt = PaymentAttemptId::new();
        set_state(&self.state, PaymentState::LinkRequested);

        let price_cents = match self.config.prices.price_cents(quantity) {
            Some(cents) => cents,
            None => {
                warn!(quantity, "no price configured for quantity");
                set_state(&self.state, PaymentState::Failed);
                let events = self.events.clone();
                let err = KioskError::InvalidQuantity(quantity);
                let task = tokio::spawn(async move {
                    let _ = events
                        .send(PaymentEvent::Failed {
                            attempt,
                            reason: err.to_string(),
                        })
                        .await;
                });
                self.active = Some(ActiveAttempt { id: attempt, task });
                return attempt;
            }
        };

        let task = match self.config.mode {
            PaymentMode::Simulated => self.spawn_simulated(attempt, quantity),
            PaymentMode::PassThrough => self.spawn_pass_through(attempt),
            PaymentMode::Live => self.spawn_live(attempt, quantity, price_cents, buyer_contact),
        };
        self.active = Some(ActiveAttempt { id: attempt, task });
        attempt
    }

    /// Cancel any in-flight polling/timeout and discard the attempt.
    /// Safe to call from any state; idempotent.
    pub fn reset(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(attempt = %active.id, "cancelling payment attempt");
            active.task.abort();
        }
        set_state(&self.state, PaymentState::Idle);
    }

    fn spawn_simulated(&self, attempt: PaymentAttemptId, quantity: u32) -> JoinHandle<()> {
        info!(quantity, "simulated payment: auto-verifying after fixed delay");
        let events = self.events.clone();
        let state = Arc::clone(&self.state);
        let qr = Arc::clone(&self.qr);
        tokio::spawn(async move {
            let checkout_url = format!("https://square.link/demo/{quantity}credits");
            let qr_data_url = qr.encode(&checkout_url).await.unwrap_or_default();
            set_state(&state, PaymentState::AwaitingPayment);
            let _ = events
                .send(PaymentEvent::LinkReady {
                    attempt,
                    checkout_url,
                    qr_data_url,
                })
                .await;

            sleep(SIMULATED_DELAY).await;
            set_state(&state, PaymentState::Verified);
            let _ = events
                .send(PaymentEvent::Verified {
                    attempt,
                    order_id: "demo-order-123".into(),
                })
                .await;
        })
    }

    fn spawn_pass_through(&self, attempt: PaymentAttemptId) -> JoinHandle<()> {
        info!("pass-through payment: verifying immediately");
        let events = self.events.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            set_state(&state, PaymentState::Verified);
            let _ = events
                .send(PaymentEvent::Verified {
                    attempt,
                    order_id: "bypass-order".into(),
                })
                .await;
        })
    }

    fn spawn_live(
        &self,
        attempt: PaymentAttemptId,
        quantity: u32,
        price_cents: u32,
        buyer_contact: &str,
    ) -> JoinHandle<()> {
        let provider = Arc::clone(&self.provider);
        let qr = Arc::clone(&self.qr);
        let events = self.events.clone();
        let state = Arc::clone(&self.state);
        let request = LinkRequest {
            amount_cents: price_cents,
            currency: self.config.currency.clone(),
            item_name: item_name(quantity),
            buyer_contact: buyer_contact.to_string(),
        };
        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);
        let timeout = Duration::from_secs(self.config.payment_timeout_secs);

        tokio::spawn(async move {
            let link = match provider.create_link(&request).await {
                Ok(link) => link,
                Err(err) => {
                    warn!(%err, "payment link creation failed");
                    set_state(&state, PaymentState::Failed);
                    let _ = events
                        .send(PaymentEvent::Failed {
                            attempt,
                            reason: err.to_string(),
                        })
                        .await;
                    return;
                }
            };
            info!(link_id = %link.id, "payment link created");

            // A QR failure is not fatal; the checkout URL still works.
            let qr_data_url = match qr.encode(&link.checkout_url).await {
                Ok(data_url) => data_url,
                Err(err) => {
                    warn!(%err, "QR encoding failed, continuing without QR");
                    String::new()
                }
            };

            set_state(&state, PaymentState::AwaitingPayment);
            let _ = events
                .send(PaymentEvent::LinkReady {
                    attempt,
                    checkout_url: link.checkout_url.clone(),
                    qr_data_url,
                })
                .await;

            // Settlement polling, bounded by the single-shot timeout. Only
            // the timeout ends the wait on persistent transport errors.
            let deadline = sleep(timeout);
            tokio::pin!(deadline);
            let mut poll = interval_at(Instant::now() + poll_interval, poll_interval);

            loop {
                tokio::select! {
                    _ = &mut deadline => {
                        warn!(link_id = %link.id, "payment timed out");
                        set_state(&state, PaymentState::TimedOut);
                        let _ = events.send(PaymentEvent::TimedOut { attempt }).await;
                        break;
                    }
                    _ = poll.tick() => {
                        match provider.link_status(&link.id).await {
                            Ok(LinkStatus::Settled { order_id }) => {
                                info!(link_id = %link.id, %order_id, "payment verified");
                                set_state(&state, PaymentState::Verified);
                                let _ = events
                                    .send(PaymentEvent::Verified { attempt, order_id })
                                    .await;
                                break;
                            }
                            Ok(LinkStatus::Pending) => {
                                debug!(link_id = %link.id, "payment still pending");
                            }
                            Err(err) => {
                                // Single-poll hiccups are ignored; polling
                                // continues until settled or timed out.
                                warn!(%err, "status poll failed, will retry");
                            }
                        }
                    }
                }
            }
        })
    }
}

impl Drop for PaymentFlow {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.task.abort();
        }
    }
}

fn set_state(state: &Arc<Mutex<PaymentState>>, value: PaymentState) {
    *state.lock().expect("payment state lock poisoned") = value;
}
