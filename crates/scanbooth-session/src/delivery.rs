// SPDX-License-Identifier: MIT
//
// Delivery and archival.
//
// Processed artifacts are mailed to the buyer, then moved out of the
// working directory: into `archive/<sid>/` on success, into
// `failed_deliveries/<sid>/` when the relay refuses the message. Either
// way the session completes; delivery failure is not terminal.

use std::path::{Path, PathBuf};

use scanbooth_core::config::KioskConfig;
use scanbooth_core::types::Session;
use tracing::{info, instrument, warn};

use crate::mailer::{MailMessage, Mailer};

const DELIVERY_SUBJECT: &str = "Your Scanned Photos";
const DELIVERY_BODY: &str = "Thank you for using our photo scanning kiosk!";

/// Where the artifacts ended up after delivery resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Whether the relay accepted the message.
    pub delivered: bool,
    /// Directory now holding the session's artifacts.
    pub final_dir: PathBuf,
}

/// Compose the buyer's delivery address from their phone digits.
pub fn delivery_address(phone: &str, domain: &str) -> String {
    format!("{phone}@{domain}")
}

/// Mail the session's artifacts and move them to their final directory.
///
/// Never fails the session: a refused message lands the artifacts under
/// the failed-deliveries directory and reports `delivered: false`.
#[instrument(skip(mailer, config, session), fields(session = %session.id, artifacts = session.artifacts.len()))]
pub async fn deliver(
    mailer: &dyn Mailer,
    config: &KioskConfig,
    session: &Session,
) -> DeliveryOutcome {
    let to = delivery_address(&session.phone, &config.mail.delivery_domain);

    let mut attachments = Vec::with_capacity(session.artifacts.len());
    for artifact in &session.artifacts {
        match tokio::fs::read(&artifact.processed_path).await {
            Ok(bytes) => {
                let filename = artifact
                    .processed_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "strip.jpg".into());
                attachments.push((filename, bytes));
            }
            Err(err) => {
                warn!(path = %artifact.processed_path.display(), %err, "artifact unreadable, skipping attachment");
            }
        }
    }

    let message = MailMessage {
        from: config.mail.sender.clone(),
        to,
        subject: DELIVERY_SUBJECT.into(),
        body: DELIVERY_BODY.into(),
        attachments,
    };

    let delivered = match mailer.send(&message).await {
        Ok(()) => {
            info!(session = %session.id, "delivery accepted");
            true
        }
        Err(err) => {
            warn!(session = %session.id, %err, "delivery failed, saving locally");
            false
        }
    };

    let final_dir = if delivered {
        config.archive_dir().join(session.id.to_string())
    } else {
        config
            .failed_deliveries_dir()
            .join(session.id.to_string())
    };
    move_artifacts(session, &final_dir).await;

    DeliveryOutcome {
        delivered,
        final_dir,
    }
}

/// Move every processed artifact into `dest`, falling back to copy+remove
/// when rename crosses a filesystem boundary.
async fn move_artifacts(session: &Session, dest: &Path) {
    if let Err(err) = tokio::fs::create_dir_all(dest).await {
        warn!(dir = %dest.display(), %err, "could not create artifact directory");
        return;
    }
    for artifact in &session.artifacts {
        let source = &artifact.processed_path;
        let Some(name) = source.file_name() else {
            continue;
        };
        let target = dest.join(name);
        if tokio::fs::rename(source, &target).await.is_ok() {
            continue;
        }
        match tokio::fs::copy(source, &target).await {
            Ok(_) => {
                let _ = tokio::fs::remove_file(source).await;
            }
            Err(err) => {
                warn!(path = %source.display(), %err, "artifact could not be moved");
            }
        }
    }
}
