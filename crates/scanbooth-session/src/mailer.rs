// SPDX-License-Identifier: MIT
//
// Outbound mail capability.
//
// The message is rendered as a complete MIME multipart document and piped
// to a relay command (`sendmail` by default) on stdin. A recording fake
// stands in for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use scanbooth_core::error::{KioskError, Result};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

/// One outbound message with binary attachments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    /// `(filename, bytes)` pairs, attached as JPEG images.
    pub attachments: Vec<(String, Vec<u8>)>,
}

/// Capability interface for sending a message.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<()>;
}

/// Render a message as a complete `multipart/mixed` MIME document.
///
/// Attachment bytes are base64-encoded and wrapped at 76 columns.
pub fn render_mime(message: &MailMessage, boundary: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("From: {}\r\n", message.from));
    out.push_str(&format!("To: {}\r\n", message.to));
    out.push_str(&format!("Subject: {}\r\n", message.subject));
    out.push_str("MIME-Version: 1.0\r\n");
    out.push_str(&format!(
        "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
    ));

    out.push_str(&format!("--{boundary}\r\n"));
    out.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\n");
    out.push_str(&message.body);
    out.push_str("\r\n");

    for (filename, data) in &message.attachments {
        out.push_str(&format!("--{boundary}\r\n"));
        out.push_str(&format!(
            "Content-Type: image/jpeg; name=\"{filename}\"\r\n"
        ));
        out.push_str("Content-Transfer-Encoding: base64\r\n");
        out.push_str(&format!(
            "Content-Disposition: attachment; filename=\"{filename}\"\r\n\r\n"
        ));
        let encoded = BASE64.encode(data);
        for chunk in encoded.as_bytes().chunks(76) {
            // base64 output is always ASCII.
            out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
            out.push_str("\r\n");
        }
    }
    out.push_str(&format!("--{boundary}--\r\n"));
    out
}

/// Real implementation: pipes the rendered MIME document to a relay
/// command's stdin.
pub struct ProcessMailer {
    command: String,
}

impl ProcessMailer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Mailer for ProcessMailer {
    #[instrument(skip(self, message), fields(to = %message.to, attachments = message.attachments.len()))]
    async fn send(&self, message: &MailMessage) -> Result<()> {
        let boundary = format!("scanbooth-{}", uuid::Uuid::new_v4());
        let document = render_mime(message, &boundary);
        debug!(bytes = document.len(), "MIME document rendered");

        let mut child = tokio::process::Command::new(&self.command)
            .arg("-t")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|err| KioskError::Delivery(format!("relay spawn failed: {err}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(document.as_bytes())
                .await
                .map_err(|err| KioskError::Delivery(format!("relay write failed: {err}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|err| KioskError::Delivery(format!("relay wait failed: {err}")))?;
        if !output.status.success() {
            return Err(KioskError::Delivery(format!(
                "relay exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        info!(to = %message.to, "message handed to relay");
        Ok(())
    }
}

/// Fake: records every message and succeeds or fails on command.
pub struct RecordingMailer {
    sent: Mutex<Vec<MailMessage>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn succeeding() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Messages observed so far, including rejected ones.
    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().expect("mailer lock poisoned").clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        self.sent
            .lock()
            .expect("mailer lock poisoned")
            .push(message.clone());
        if self.fail {
            return Err(KioskError::Delivery("relay refused message".into()));
        }
        Ok(())
    }
}
