// SPDX-License-Identifier: MIT
//
// QR encoding capability.
//
// The checkout URL is rendered as a QR code for the kiosk screen. The real
// implementation shells out to `qrencode`; a deterministic fake stands in
// for tests. An encoder failure is not fatal — the checkout URL is still
// usable without the QR image.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use scanbooth_core::error::{KioskError, Result};
use tracing::{debug, warn};

/// Capability interface for turning a payload into a displayable QR image.
#[async_trait]
pub trait QrEncoder: Send + Sync {
    /// Encode `payload` and return a `data:image/png;base64,…` URL.
    async fn encode(&self, payload: &str) -> Result<String>;
}

/// Real implementation: invokes the `qrencode` command-line tool.
pub struct ProcessQrEncoder {
    command: String,
}

impl ProcessQrEncoder {
    pub fn new() -> Self {
        Self {
            command: "qrencode".into(),
        }
    }

    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Default for ProcessQrEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QrEncoder for ProcessQrEncoder {
    async fn encode(&self, payload: &str) -> Result<String> {
        let output = tokio::process::Command::new(&self.command)
            .args(["-s", "10", "-l", "L", "-o", "-"])
            .arg(payload)
            .output()
            .await
            .map_err(|err| KioskError::Payment(format!("qrencode spawn failed: {err}")))?;

        if !output.status.success() {
            warn!(status = ?output.status, "qrencode exited with failure");
            return Err(KioskError::Payment(format!(
                "qrencode failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        debug!(bytes = output.stdout.len(), "QR code generated");
        Ok(format!(
            "data:image/png;base64,{}",
            BASE64.encode(&output.stdout)
        ))
    }
}

/// Deterministic fake: returns a stable marker string for the payload.
pub struct FakeQrEncoder;

#[async_trait]
impl QrEncoder for FakeQrEncoder {
    async fn encode(&self, payload: &str) -> Result<String> {
        Ok(format!("qr:{payload}"))
    }
}
