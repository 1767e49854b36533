// SPDX-License-Identifier: MIT
//
// Scanbooth — payment-link lifecycle: provider integration, QR payload
// encoding, and the poll/timeout state machine the orchestrator drives.

pub mod flow;
pub mod provider;
pub mod qr;

pub use flow::{PaymentEvent, PaymentFlow};
pub use provider::{FakeProvider, LinkRequest, LinkStatus, PaymentLink, PaymentProvider, SquareProvider};
pub use qr::{FakeQrEncoder, ProcessQrEncoder, QrEncoder};
