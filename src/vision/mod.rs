//! Screen Capture
//!
//! The default capture provider: grab the primary monitor with xcap,
//! downscale to the requested size, and encode a small lossy payload for
//! the model. Image work runs on a blocking thread to keep the runtime
//! responsive. Also the best-effort frame archive used for diagnostics.

pub mod similarity;

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::debug;
use xcap::Monitor;

use crate::types::{CaptureFormat, CaptureOptions, CaptureProvider};

/// JPEG quality for model payloads. PNG frames are several times larger
/// and slower to encode for no decision-quality gain.
const JPEG_QUALITY: u8 = 80;

#[derive(Default)]
pub struct ScreenCapturer;

impl ScreenCapturer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CaptureProvider for ScreenCapturer {
    async fn capture(&self, options: &CaptureOptions) -> Result<Option<Vec<u8>>> {
        let options = options.clone();
        tokio::task::spawn_blocking(move || capture_primary(&options))
            .await
            .context("Capture task join failed")?
    }
}

/// Grab the primary monitor (or the first one when none is marked
/// primary) and encode it at the requested size.
fn capture_primary(options: &CaptureOptions) -> Result<Option<Vec<u8>>> {
    let monitors = Monitor::all().map_err(|e| anyhow!("Failed to enumerate monitors: {}", e))?;

    let primary = monitors
        .into_iter()
        .find(|m| m.is_primary().unwrap_or(false))
        .or_else(|| Monitor::all().ok()?.into_iter().next());

    let Some(monitor) = primary else {
        return Ok(None);
    };

    let buffer = monitor
        .capture_image()
        .map_err(|e| anyhow!("Failed to capture screen: {}", e))?;

    let scaled = DynamicImage::ImageRgba8(buffer).resize_exact(
        options.width,
        options.height,
        FilterType::Triangle,
    );

    let mut out = Vec::new();
    match options.format {
        CaptureFormat::Jpeg => {
            let rgb = scaled.to_rgb8();
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))
                .context("JPEG encoding failed")?;
        }
        CaptureFormat::Png => {
            scaled
                .write_with_encoder(PngEncoder::new(&mut out))
                .context("PNG encoding failed")?;
        }
    }

    Ok(Some(out))
}

/// Archive a captured frame for diagnostics. Best effort: any failure is
/// logged at debug level and must never abort the perception cycle.
pub fn archive_frame(dir: &str, frame: &[u8]) {
    let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%S%.3f");
    let path = Path::new(dir).join(format!("vision-{}.jpg", timestamp));

    let result = fs::create_dir_all(dir).and_then(|_| fs::write(&path, frame));
    if let Err(e) = result {
        debug!("Frame archive failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_frame_writes_and_never_panics() {
        let dir = std::env::temp_dir().join(format!("glitch-vision-{}", uuid::Uuid::new_v4()));
        let dir_str = dir.to_string_lossy().to_string();

        archive_frame(&dir_str, b"frame-bytes");

        let written: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert_eq!(written.len(), 1);

        // Unwritable target degrades silently
        archive_frame("/proc/no-such-dir/vision", b"frame-bytes");

        let _ = fs::remove_dir_all(&dir);
    }
}
