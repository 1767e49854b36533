// SPDX-License-Identifier: MIT
//
// Core domain types for the Scanbooth kiosk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for one customer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one payment attempt.
///
/// A fresh id is allocated per `create_link` call so that completion
/// notifications from a superseded attempt can be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentAttemptId(pub Uuid);

impl PaymentAttemptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PaymentAttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PaymentAttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states of a customer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Welcome screen; no session data held.
    Idle,
    /// Phone number captured, waiting for a package selection.
    PhoneCaptured,
    /// Package chosen; payment link being prepared.
    PurchaseSelected,
    /// Waiting for the customer to pay.
    AwaitingPayment,
    /// Ready for (or performing) scan `current_scan + 1`.
    Scanning,
    /// A captured scan is being cropped and encoded.
    Processing,
    /// All scans captured; delivery in flight.
    Delivering,
    /// Delivery resolved; confirmation shown until acknowledged.
    Confirmed,
}

/// Lifecycle states of a payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentState {
    Idle,
    /// Link creation request in flight.
    LinkRequested,
    /// Link created; polling for settlement.
    AwaitingPayment,
    /// Settled — the order id was observed.
    Verified,
    /// The timeout fired before settlement. Terminal for the attempt.
    TimedOut,
    /// Provider or input error. Terminal for the attempt.
    Failed,
}

/// Operating mode for the payment subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMode {
    /// Real provider integration.
    Live,
    /// Auto-verifies after a short fixed delay — exercises the orchestrator
    /// without payment hardware.
    Simulated,
    /// Verifies immediately — scanner-only bench testing.
    PassThrough,
}

/// One captured scan: the transient raw capture and its processed
/// counterpart.
///
/// The raw file is deleted as soon as the processed file exists; processed
/// files accumulate until delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanArtifact {
    pub raw_path: PathBuf,
    pub processed_path: PathBuf,
}

/// Quantity → price (in cents) table for credit packages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTable {
    entries: Vec<(u32, u32)>,
}

impl PriceTable {
    pub fn new(entries: Vec<(u32, u32)>) -> Self {
        Self { entries }
    }

    /// Price in cents for a quantity, or `None` if the quantity is not
    /// offered.
    pub fn price_cents(&self, quantity: u32) -> Option<u32> {
        self.entries
            .iter()
            .find(|(q, _)| *q == quantity)
            .map(|(_, cents)| *cents)
    }

    pub fn price_dollars(&self, quantity: u32) -> Option<f64> {
        self.price_cents(quantity).map(|c| c as f64 / 100.0)
    }
}

impl Default for PriceTable {
    fn default() -> Self {
        // 1 strip = $3.00, 4 strips = $10.00.
        Self::new(vec![(1, 300), (4, 1000)])
    }
}

/// One customer's end-to-end kiosk interaction.
///
/// Owned exclusively by the session orchestrator and cleared on return to
/// idle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// Buyer phone digits; validated by the UI before submission.
    pub phone: String,
    /// Purchased credit count (number of scans).
    pub credits: u32,
    /// Price paid, in cents.
    pub price_cents: u32,
    /// Processed delivery artifacts, in capture order.
    pub artifacts: Vec<ScanArtifact>,
    /// Completed scan count; never exceeds `credits`.
    pub current_scan: u32,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            phone: String::new(),
            credits: 0,
            price_cents: 0,
            artifacts: Vec::new(),
            current_scan: 0,
            state: SessionState::Idle,
            started_at: Utc::now(),
        }
    }

    /// Whether every purchased scan has been captured and processed.
    pub fn scans_complete(&self) -> bool {
        self.credits > 0 && self.current_scan >= self.credits
    }

    /// File name for raw capture `n` (1-based), e.g.
    /// `<sid>_scan_2.tiff`.
    pub fn raw_scan_filename(&self, n: u32, ext: &str) -> String {
        format!("{}_scan_{}.{}", self.id, n, ext)
    }

    /// File name for processed artifact `n` (1-based), e.g.
    /// `<sid>_strip_2.jpg`.
    pub fn strip_filename(&self, n: u32) -> String {
        format!("{}_strip_{}.jpg", self.id, n)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_price_table_matches_offering() {
        let table = PriceTable::default();
        assert_eq!(table.price_cents(1), Some(300));
        assert_eq!(table.price_cents(4), Some(1000));
        assert_eq!(table.price_cents(2), None);
        assert_eq!(table.price_dollars(4), Some(10.0));
    }

    #[test]
    fn artifact_filenames_are_session_keyed() {
        let session = Session::new();
        let raw = session.raw_scan_filename(1, "tiff");
        let strip = session.strip_filename(1);
        assert!(raw.starts_with(&session.id.to_string()));
        assert!(raw.ends_with("_scan_1.tiff"));
        assert!(strip.ends_with("_strip_1.jpg"));
    }

    #[test]
    fn scans_complete_requires_purchase() {
        let mut session = Session::new();
        assert!(!session.scans_complete());
        session.credits = 2;
        session.current_scan = 1;
        assert!(!session.scans_complete());
        session.current_scan = 2;
        assert!(session.scans_complete());
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
