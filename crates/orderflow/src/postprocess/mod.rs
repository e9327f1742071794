//! Post-processing gate: mosaic and watermark steps for generated images.
//!
//! Each step runs at most once per image. The `*_done` flags on the image are
//! the only record of that; a failed step leaves its flag unset so the next
//! pass retries it.

pub mod detector;
pub mod imaging;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::AppConfig;
use crate::error::PostProcessError;
use crate::order::Order;

pub use detector::{DetectorChain, HttpDetector, RegionDetector};

/// Axis-aligned box in pixels; `x`/`y` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

impl Region {
    /// `(x, y, w, h)` clipped to a `width` x `height` image, or `None` when
    /// nothing of the box is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0);
        let y0 = self.y.max(0);
        let x1 = self.x.saturating_add(self.w).min(i64::from(width));
        let y1 = self.y.saturating_add(self.h).min(i64::from(height));
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// Content-safety and watermark capability used by the gate.
pub trait SafetyProcessor {
    fn detect_unsafe_regions(&mut self, path: &Path) -> Result<Vec<Region>, PostProcessError>;
    fn apply_blur(&mut self, path: &Path, regions: &[Region]) -> Result<(), PostProcessError>;
    fn apply_watermark(&mut self, path: &Path) -> Result<(), PostProcessError>;
}

/// Detects through a [`DetectorChain`] and edits the files in place.
pub struct ImageSafetyProcessor {
    detectors: DetectorChain,
    watermark_path: PathBuf,
    mosaic_factor: u32,
}

impl ImageSafetyProcessor {
    pub fn new(detectors: DetectorChain, watermark_path: PathBuf, mosaic_factor: u32) -> Self {
        Self {
            detectors,
            watermark_path,
            mosaic_factor,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, PostProcessError> {
        Ok(Self::new(
            DetectorChain::from_config(&config.post_process.detectors)?,
            config.watermark_path(),
            config.post_process.mosaic_factor,
        ))
    }
}

impl SafetyProcessor for ImageSafetyProcessor {
    fn detect_unsafe_regions(&mut self, path: &Path) -> Result<Vec<Region>, PostProcessError> {
        self.detectors.detect(path)
    }

    fn apply_blur(&mut self, path: &Path, regions: &[Region]) -> Result<(), PostProcessError> {
        if regions.is_empty() {
            info!("No regions to censor in {}", crate::sanitize::redact_path(path));
            return Ok(());
        }

        let mut img = imaging::open_rgb(path)?;
        let applied = imaging::pixelate(&mut img, regions, self.mosaic_factor);
        if applied > 0 {
            imaging::save_rgb(path, &img)?;
        }
        Ok(())
    }

    fn apply_watermark(&mut self, path: &Path) -> Result<(), PostProcessError> {
        let base = imaging::open_rgb(path)?;
        let layer = imaging::open_rgba(&self.watermark_path)?;
        imaging::save_rgb(path, &imaging::overlay_bottom_right(&base, &layer))
    }
}

/// What one gate pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateReport {
    pub mosaics: usize,
    pub watermarks: usize,
    pub failures: usize,
}

/// Runs the pending mosaic and watermark steps of every active, generated
/// image. Failures are logged per image and never abort the pass.
pub fn run_gate(order: &mut Order, processor: &mut dyn SafetyProcessor) -> GateReport {
    let upload_index = order.upload_index();
    let mut report = GateReport::default();

    for index in order.active_indices() {
        let Some(image) = order.image_mut(index) else {
            continue;
        };
        let Some(path) = image.output_path.clone().filter(|_| image.is_generated()) else {
            continue;
        };

        if image.needs_mosaic() {
            let result = processor
                .detect_unsafe_regions(&path)
                .and_then(|regions| processor.apply_blur(&path, &regions));
            match result {
                Ok(()) => {
                    image.mosaic_done = true;
                    report.mosaics += 1;
                }
                Err(e) => {
                    error!(upload_index, image = index, "Mosaic step failed: {}", e);
                    report.failures += 1;
                }
            }
        }

        if image.needs_watermark() {
            match processor.apply_watermark(&path) {
                Ok(()) => {
                    image.watermark_done = true;
                    report.watermarks += 1;
                }
                Err(e) => {
                    error!(upload_index, image = index, "Watermark step failed: {}", e);
                    report.failures += 1;
                }
            }
        }
    }

    debug!(upload_index, ?report, "Post-processing pass finished");
    report
}
