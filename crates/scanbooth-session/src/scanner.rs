// SPDX-License-Identifier: MIT
//
// Scanner driver capability.
//
// The real driver shells out to SANE's `scanimage`: `-L` for device
// discovery and a per-capture invocation bounded by the configured scan
// timeout. A synthetic driver produces a deterministic capture for bench
// setups and tests with no hardware attached.

use std::path::Path;

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use scanbooth_core::config::ScannerConfig;
use scanbooth_core::error::{KioskError, Result};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Capability interface over the scanning hardware.
#[async_trait]
pub trait ScannerDriver: Send + Sync {
    /// Names of the attached scanner devices, best first.
    async fn list_devices(&self) -> Result<Vec<String>>;

    /// Capture one page to `output`. The file exists and is non-empty on
    /// success.
    async fn capture(&self, output: &Path) -> Result<()>;
}

/// Real driver: invokes `scanimage`.
pub struct SaneScanner {
    config: ScannerConfig,
    command: String,
}

impl SaneScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self {
            config,
            command: "scanimage".into(),
        }
    }

    /// Override the binary name (used by tests).
    pub fn with_command(config: ScannerConfig, command: impl Into<String>) -> Self {
        Self {
            config,
            command: command.into(),
        }
    }

    /// The device to scan with: the configured name, or the best device
    /// found by discovery when none is configured.
    async fn resolve_device(&self) -> Result<String> {
        if !self.config.device.is_empty() {
            return Ok(self.config.device.clone());
        }
        let devices = self.list_devices().await?;
        pick_preferred(&devices)
            .map(String::from)
            .ok_or(KioskError::NoScanner)
    }
}

#[async_trait]
impl ScannerDriver for SaneScanner {
    #[instrument(skip(self))]
    async fn list_devices(&self) -> Result<Vec<String>> {
        let output = tokio::process::Command::new(&self.command)
            .arg("-L")
            .output()
            .await
            .map_err(|err| KioskError::Scanner(format!("device listing failed: {err}")))?;

        if !output.status.success() {
            return Err(KioskError::Scanner(format!(
                "device listing exited with {}",
                output.status
            )));
        }

        let devices = parse_device_list(&String::from_utf8_lossy(&output.stdout));
        debug!(count = devices.len(), "scanner devices discovered");
        Ok(devices)
    }

    #[instrument(skip(self), fields(output = %output.display()))]
    async fn capture(&self, output: &Path) -> Result<()> {
        let device = self.resolve_device().await?;
        info!(%device, dpi = self.config.dpi, "starting capture");

        let child = tokio::process::Command::new(&self.command)
            .arg("-d")
            .arg(&device)
            .arg("--resolution")
            .arg(self.config.dpi.to_string())
            .arg("--mode")
            .arg(&self.config.mode)
            .arg(format!("--format={}", self.config.format))
            .arg("-o")
            .arg(output)
            .kill_on_drop(true)
            .output();

        let result = timeout(
            std::time::Duration::from_secs(self.config.scan_timeout_secs),
            child,
        )
        .await;

        let completed = match result {
            Ok(done) => done.map_err(|err| KioskError::Scanner(format!("spawn failed: {err}")))?,
            Err(_elapsed) => {
                warn!(%device, "capture timed out");
                return Err(KioskError::ScanTimeout(self.config.scan_timeout_secs));
            }
        };

        if !completed.status.success() {
            return Err(KioskError::Scanner(format!(
                "scanimage exited with {}: {}",
                completed.status,
                String::from_utf8_lossy(&completed.stderr).trim()
            )));
        }

        let meta = tokio::fs::metadata(output)
            .await
            .map_err(|_| KioskError::Scanner("capture produced no output file".into()))?;
        if meta.len() == 0 {
            return Err(KioskError::Scanner("capture produced an empty file".into()));
        }
        Ok(())
    }
}

/// Parse `scanimage -L` output.
///
/// Each device line reads `device `name' is a …`; the name sits between
/// the backtick and the closing apostrophe.
fn parse_device_list(listing: &str) -> Vec<String> {
    let mut devices = Vec::new();
    for line in listing.lines() {
        let Some(start) = line.find('`') else { continue };
        let rest = &line[start + 1..];
        let Some(end) = rest.find('\'') else { continue };
        let name = &rest[..end];
        if !name.is_empty() {
            devices.push(name.to_string());
        }
    }
    devices
}

/// The flatbed this kiosk ships with is preferred over incidental devices
/// such as webcams exposed through SANE.
fn pick_preferred(devices: &[String]) -> Option<&str> {
    devices
        .iter()
        .find(|name| {
            let lower = name.to_ascii_lowercase();
            lower.contains("fujitsu") || lower.contains("fi-800")
        })
        .or_else(|| devices.first())
        .map(String::as_str)
}

/// Hardware-free driver: writes a fixed capture with three photo-like
/// regions on a white background, sized to the real scanner bed.
pub struct SyntheticScanner;

/// Bed size at 600 DPI.
const SYNTHETIC_WIDTH: u32 = 1725;
const SYNTHETIC_HEIGHT: u32 = 1988;

#[async_trait]
impl ScannerDriver for SyntheticScanner {
    async fn list_devices(&self) -> Result<Vec<String>> {
        Ok(vec!["synthetic:demo".into()])
    }

    async fn capture(&self, output: &Path) -> Result<()> {
        let mut img = RgbImage::from_pixel(SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT, Rgb([255, 255, 255]));
        for (i, top) in [200u32, 700, 1200].into_iter().enumerate() {
            let tint = Rgb([180, 160 + 20 * i as u8, 140]);
            for y in top..top + 400 {
                for x in 300..300 + 1125 {
                    img.put_pixel(x, y, tint);
                }
            }
        }
        let path = output.to_path_buf();
        tokio::task::spawn_blocking(move || {
            img.save(&path)
                .map_err(|err| KioskError::ImageError(format!("synthetic capture save: {err}")))
        })
        .await
        .map_err(|err| KioskError::Scanner(format!("synthetic capture task: {err}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_LISTING: &str = "\
device `v4l:/dev/video0' is a Noname Integrated Camera virtual device\n\
device `fujitsu:fi-800R:39907' is a FUJITSU fi-800R scanner\n";

    #[test]
    fn device_listing_parses_names_between_quotes() {
        let devices = parse_device_list(SAMPLE_LISTING);
        assert_eq!(
            devices,
            vec!["v4l:/dev/video0", "fujitsu:fi-800R:39907"]
        );
    }

    #[test]
    fn preferred_device_is_the_flatbed_not_the_webcam() {
        let devices = parse_device_list(SAMPLE_LISTING);
        assert_eq!(pick_preferred(&devices), Some("fujitsu:fi-800R:39907"));
    }

    #[test]
    fn first_device_wins_without_a_flatbed() {
        let devices = vec!["epson:net".to_string(), "v4l:/dev/video0".to_string()];
        assert_eq!(pick_preferred(&devices), Some("epson:net"));
    }

    #[test]
    fn empty_listing_yields_no_devices() {
        assert!(parse_device_list("\nno scanners were identified\n").is_empty());
        assert_eq!(pick_preferred(&[]), None);
    }

    #[tokio::test]
    async fn synthetic_capture_writes_a_decodable_bed_sized_image() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("capture.png");

        SyntheticScanner.capture(&path).await.expect("capture");

        let img = image::open(&path).expect("decodable capture");
        assert_eq!(img.width(), SYNTHETIC_WIDTH);
        assert_eq!(img.height(), SYNTHETIC_HEIGHT);
    }

    #[tokio::test]
    async fn missing_binary_surfaces_as_scanner_error() {
        let scanner =
            SaneScanner::with_command(ScannerConfig::default(), "scanimage-not-installed");
        let err = scanner.list_devices().await.expect_err("no binary");
        assert!(matches!(err, KioskError::Scanner(_)));
    }
}
