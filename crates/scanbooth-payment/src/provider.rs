// SPDX-License-Identifier: MIT
//
// Payment-provider collaborator: a narrow interface over the Square
// payment-links REST API, plus a deterministic fake for exercising the
// flow without a live provider.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use scanbooth_core::config::PaymentConfig;
use scanbooth_core::error::{KioskError, Result};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// A created payment link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentLink {
    pub id: String,
    pub checkout_url: String,
}

/// Settlement state of a payment link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    /// The order settled; carries the provider order id.
    Settled { order_id: String },
    Pending,
}

/// Inputs for a payment-link creation request.
#[derive(Debug, Clone)]
pub struct LinkRequest {
    pub amount_cents: u32,
    pub currency: String,
    pub item_name: String,
    /// Buyer phone digits; composed into the pre-populated buyer email.
    pub buyer_contact: String,
}

/// Narrow collaborator contract for the payment provider.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_link(&self, request: &LinkRequest) -> Result<PaymentLink>;
    async fn link_status(&self, link_id: &str) -> Result<LinkStatus>;
}

// ---------------------------------------------------------------------------
// Square REST implementation
// ---------------------------------------------------------------------------

/// Square payment-links client.
pub struct SquareProvider {
    http: reqwest::Client,
    api_base: String,
    access_token: String,
    location_id: String,
    api_version: String,
}

impl SquareProvider {
    pub fn from_config(config: &PaymentConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.api_base.clone(),
            access_token: config.access_token.clone(),
            location_id: config.location_id.clone(),
            api_version: config.api_version.clone(),
        }
    }

    fn request(&self, method: reqwest::Method, endpoint: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_base, endpoint))
            .header("Square-Version", &self.api_version)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Content-Type", "application/json")
    }
}

#[async_trait]
impl PaymentProvider for SquareProvider {
    #[instrument(skip(self, request), fields(amount_cents = request.amount_cents))]
    async fn create_link(&self, request: &LinkRequest) -> Result<PaymentLink> {
        let payload = link_payload(request, &self.location_id, &Uuid::new_v4().to_string());

        let response = self
            .request(reqwest::Method::POST, "/v2/online-checkout/payment-links")
            .json(&payload)
            .send()
            .await
            .map_err(|err| KioskError::Payment(format!("link creation request failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, %body, "payment link creation rejected");
            return Err(KioskError::Payment(format!(
                "link creation rejected: {status}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| KioskError::Payment(format!("malformed link response: {err}")))?;
        parse_link_response(&body)
    }

    #[instrument(skip(self))]
    async fn link_status(&self, link_id: &str) -> Result<LinkStatus> {
        let endpoint = format!("/v2/online-checkout/payment-links/{link_id}");
        let response = self
            .request(reqwest::Method::GET, &endpoint)
            .send()
            .await
            .map_err(|err| KioskError::Payment(format!("status request failed: {err}")))?;

        if !response.status().is_success() {
            return Err(KioskError::Payment(format!(
                "status request rejected: {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| KioskError::Payment(format!("malformed status response: {err}")))?;
        let status = parse_status_response(&body);
        debug!(?status, "link status polled");
        status
    }
}

/// Build the payment-link creation payload.
///
/// The buyer's phone is not sent to the provider directly; payment links
/// take an email, so the phone is composed into a kiosk-local address.
fn link_payload(request: &LinkRequest, location_id: &str, idempotency_key: &str) -> Value {
    json!({
        "idempotency_key": idempotency_key,
        "quick_pay": {
            "name": request.item_name,
            "price_money": {
                "amount": request.amount_cents,
                "currency": request.currency,
            },
            "location_id": location_id,
        },
        "checkout_options": {
            "allow_tipping": false,
        },
        "pre_populated_data": {
            "buyer_email": format!("{}@kiosk.local", request.buyer_contact),
        },
    })
}

/// Extract the link id and checkout URL, preferring `long_url`.
fn parse_link_response(body: &Value) -> Result<PaymentLink> {
    let link = body
        .get("payment_link")
        .ok_or_else(|| KioskError::Payment("response has no payment_link".into()))?;
    let id = link
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| KioskError::Payment("payment_link has no id".into()))?
        .to_string();
    let checkout_url = link
        .get("long_url")
        .or_else(|| link.get("url"))
        .and_then(Value::as_str)
        .ok_or_else(|| KioskError::Payment("payment_link has no checkout URL".into()))?
        .to_string();
    Ok(PaymentLink { id, checkout_url })
}

/// A settled link carries an `order_id`; its absence means still pending.
fn parse_status_response(body: &Value) -> Result<LinkStatus> {
    let link = body
        .get("payment_link")
        .ok_or_else(|| KioskError::Payment("status response has no payment_link".into()))?;
    match link.get("order_id").and_then(Value::as_str) {
        Some(order_id) => Ok(LinkStatus::Settled {
            order_id: order_id.to_string(),
        }),
        None => Ok(LinkStatus::Pending),
    }
}

/// Item name shown on the checkout page for a credit quantity.
pub fn item_name(quantity: u32) -> String {
    format!(
        "Digitize {} Photo {}",
        quantity,
        if quantity > 1 { "Strips" } else { "Strip" }
    )
}

// ---------------------------------------------------------------------------
// Deterministic fake
// ---------------------------------------------------------------------------

/// Scriptable in-memory provider for tests and bench setups.
///
/// `link_status` settles on the `settle_after`-th poll (never, if `None`)
/// and returns transport errors for the first `error_first` polls.
pub struct FakeProvider {
    link: PaymentLink,
    settle_after: Option<u32>,
    error_first: u32,
    polls: AtomicU32,
    fail_creation: bool,
}

impl FakeProvider {
    pub fn settling_after(polls: u32) -> Self {
        Self {
            link: Self::default_link(),
            settle_after: Some(polls),
            error_first: 0,
            polls: AtomicU32::new(0),
            fail_creation: false,
        }
    }

    pub fn never_settling() -> Self {
        Self {
            link: Self::default_link(),
            settle_after: None,
            error_first: 0,
            polls: AtomicU32::new(0),
            fail_creation: false,
        }
    }

    pub fn failing_creation() -> Self {
        Self {
            link: Self::default_link(),
            settle_after: None,
            error_first: 0,
            polls: AtomicU32::new(0),
            fail_creation: true,
        }
    }

    /// Make the first `n` status polls fail with a transport error.
    pub fn with_transient_errors(mut self, n: u32) -> Self {
        self.error_first = n;
        self
    }

    pub fn poll_count(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    fn default_link() -> PaymentLink {
        PaymentLink {
            id: "fake-link".into(),
            checkout_url: "https://pay.example/fake-link".into(),
        }
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    async fn create_link(&self, _request: &LinkRequest) -> Result<PaymentLink> {
        if self.fail_creation {
            return Err(KioskError::Payment("provider unavailable".into()));
        }
        Ok(self.link.clone())
    }

    async fn link_status(&self, _link_id: &str) -> Result<LinkStatus> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.error_first {
            return Err(KioskError::Payment("transient transport error".into()));
        }
        match self.settle_after {
            Some(k) if n >= k => Ok(LinkStatus::Settled {
                order_id: "fake-order-1".into(),
            }),
            _ => Ok(LinkStatus::Pending),
        }
    }
}
