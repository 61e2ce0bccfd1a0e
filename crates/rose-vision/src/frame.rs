use thiserror::Error;
use tracing::debug;

use crate::{Detection, Detector};

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("frame could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
    #[error("no detector configured for encoded frames")]
    NoDetector,
    #[error("detector failed: {0:#}")]
    Detector(anyhow::Error),
}

/// Decode an encoded (JPEG/PNG) frame and run the detector on its RGB pixels.
pub fn detect_encoded(detector: &dyn Detector, encoded: &[u8]) -> Result<Vec<Detection>, DetectError> {
    let img = image::load_from_memory(encoded)?;
    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    debug!("frame: decoded {}x{} ({} bytes)", w, h, encoded.len());
    detector.detect_rgb(rgb.as_raw(), w, h).map_err(DetectError::Detector)
}
