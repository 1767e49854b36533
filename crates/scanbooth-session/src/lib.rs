// SPDX-License-Identifier: MIT
//
// Scanbooth — session orchestration: scanner driver, mail delivery, and the
// event loop that sequences one customer's interaction from phone entry to
// delivered artifacts.

pub mod delivery;
pub mod mailer;
pub mod orchestrator;
pub mod scanner;

pub use delivery::{deliver, delivery_address, DeliveryOutcome};
pub use mailer::{Mailer, MailMessage, ProcessMailer, RecordingMailer};
pub use orchestrator::{KioskEvent, SessionOrchestrator, UiNotice, UiSink};
pub use scanner::{SaneScanner, ScannerDriver, SyntheticScanner};
