// SPDX-License-Identifier: MIT
//
// Kiosk configuration.
//
// One `KioskConfig` value is constructed at startup and passed by
// reference to the components that need it; no component reads the process
// environment directly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::geometry::CropRect;
use crate::types::{PaymentMode, PriceTable};

/// Scanner hardware settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// SANE device name; empty means auto-detect.
    pub device: String,
    /// Scan resolution in DPI.
    pub dpi: u32,
    /// Scan mode passed to the backend (e.g. "Color").
    pub mode: String,
    /// Raw capture format and file extension (e.g. "tiff").
    pub format: String,
    /// Seconds to wait for a capture before giving up.
    pub scan_timeout_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            dpi: 600,
            mode: "Color".into(),
            format: "tiff".into(),
            scan_timeout_secs: 180,
        }
    }
}

/// Crop pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CropConfig {
    /// Edge-sensitivity threshold for boundary detection (1–255).
    pub detection_threshold: i32,
    /// Statically configured fallback region used when detection fails.
    pub manual_rect: CropRect,
    /// JPEG quality for processed artifacts (0–100).
    pub jpeg_quality: u8,
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            detection_threshold: 240,
            // Matches the scanner bed at 600 DPI.
            manual_rect: CropRect::new(0, 0, 1725, 1988),
            jpeg_quality: 92,
        }
    }
}

/// Payment provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    pub mode: PaymentMode,
    pub prices: PriceTable,
    /// Provider API base URL.
    pub api_base: String,
    pub access_token: String,
    pub location_id: String,
    /// Provider API version header value.
    pub api_version: String,
    pub currency: String,
    /// Seconds before an unpaid link times out.
    pub payment_timeout_secs: u64,
    /// Seconds between settlement polls.
    pub poll_interval_secs: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            mode: PaymentMode::Live,
            prices: PriceTable::default(),
            api_base: "https://connect.squareupsandbox.com".into(),
            access_token: String::new(),
            location_id: String::new(),
            api_version: "2024-11-13".into(),
            currency: "USD".into(),
            payment_timeout_secs: 300,
            poll_interval_secs: 2,
        }
    }
}

/// Outbound mail settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub sender: String,
    pub password: String,
    /// Domain suffix composed with the buyer phone number to form the
    /// delivery address.
    pub delivery_domain: String,
    /// Command the relay message is piped to; receives the full MIME
    /// message on stdin.
    pub relay_command: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_server: "smtp.gmail.com".into(),
            smtp_port: 587,
            sender: String::new(),
            password: String::new(),
            delivery_domain: "sms.kiosk.local".into(),
            relay_command: "sendmail".into(),
        }
    }
}

/// Top-level kiosk configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KioskConfig {
    /// Root directory for captures, processed artifacts, and archives.
    pub scans_root: PathBuf,
    pub scanner: ScannerConfig,
    pub crop: CropConfig,
    pub payment: PaymentConfig,
    pub mail: MailConfig,
    /// Seconds without UI interaction (off the welcome screen) before the
    /// session is cancelled.
    pub idle_timeout_secs: u64,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            scans_root: PathBuf::from("scans"),
            scanner: ScannerConfig::default(),
            crop: CropConfig::default(),
            payment: PaymentConfig::default(),
            mail: MailConfig::default(),
            idle_timeout_secs: 60,
        }
    }
}

impl KioskConfig {
    /// Create the scans root plus the archive and failed-delivery
    /// subdirectories.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.scans_root)?;
        std::fs::create_dir_all(self.archive_dir())?;
        std::fs::create_dir_all(self.failed_deliveries_dir())?;
        Ok(())
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.scans_root.join("archive")
    }

    pub fn failed_deliveries_dir(&self) -> PathBuf {
        self.scans_root.join("failed_deliveries")
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scanner.scan_timeout_secs)
    }

    pub fn payment_timeout(&self) -> Duration {
        Duration::from_secs(self.payment.payment_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.payment.poll_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// A config rooted at the given directory (used by tests and embedders).
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        Self {
            scans_root: root.as_ref().to_path_buf(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shipping_constants() {
        let config = KioskConfig::default();
        assert_eq!(config.crop.detection_threshold, 240);
        assert_eq!(config.crop.jpeg_quality, 92);
        assert_eq!(config.crop.manual_rect, CropRect::new(0, 0, 1725, 1988));
        assert_eq!(config.scanner.dpi, 600);
        assert_eq!(config.payment.poll_interval_secs, 2);
        assert_eq!(config.idle_timeout_secs, 60);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = KioskConfig::default();
        let json = serde_json::to_string(&config).expect("serialize");
        let back: KioskConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.crop.manual_rect, config.crop.manual_rect);
        assert_eq!(back.payment.api_version, config.payment.api_version);
    }

    #[test]
    fn derived_directories_hang_off_scans_root() {
        let config = KioskConfig::rooted_at("/tmp/booth");
        assert_eq!(config.archive_dir(), PathBuf::from("/tmp/booth/archive"));
        assert_eq!(
            config.failed_deliveries_dir(),
            PathBuf::from("/tmp/booth/failed_deliveries")
        );
    }
}
