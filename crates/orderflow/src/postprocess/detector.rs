use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::{debug, warn};

use crate::config::DetectorConfig;
use crate::error::PostProcessError;

use super::Region;

/// Finds regions of an image that must be censored.
pub trait RegionDetector {
    fn name(&self) -> &str;
    fn detect(&self, path: &Path) -> Result<Vec<Region>, PostProcessError>;
}

/// Detector service reached over HTTP: the image bytes are posted and a JSON
/// array of `{x, y, w, h}` boxes comes back.
pub struct HttpDetector {
    name: String,
    endpoint: String,
    client: Client,
}

impl HttpDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self, PostProcessError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| PostProcessError::Detector {
                name: config.name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            name: config.name.clone(),
            endpoint: config.endpoint.clone(),
            client,
        })
    }
}

impl RegionDetector for HttpDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn detect(&self, path: &Path) -> Result<Vec<Region>, PostProcessError> {
        let failed = |reason: String| PostProcessError::Detector {
            name: self.name.clone(),
            reason,
        };

        let bytes = std::fs::read(path).map_err(|e| failed(e.to_string()))?;
        self.client
            .post(&self.endpoint)
            .header("Content-Type", "application/octet-stream")
            .body(bytes)
            .send()
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| failed(e.to_string()))?
            .json::<Vec<Region>>()
            .map_err(|e| failed(format!("bad response: {}", e)))
    }
}

/// Ordered detectors. A later one is consulted when the earlier ones fail or
/// find nothing.
#[derive(Default)]
pub struct DetectorChain {
    detectors: Vec<Box<dyn RegionDetector>>,
}

impl DetectorChain {
    pub fn new(detectors: Vec<Box<dyn RegionDetector>>) -> Self {
        Self { detectors }
    }

    pub fn from_config(configs: &[DetectorConfig]) -> Result<Self, PostProcessError> {
        let detectors = configs
            .iter()
            .map(|c| HttpDetector::new(c).map(|d| Box::new(d) as Box<dyn RegionDetector>))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(detectors))
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Regions from the first detector that finds any. Succeeds with an empty
    /// list if at least one detector ran cleanly; fails only if all failed.
    pub fn detect(&self, path: &Path) -> Result<Vec<Region>, PostProcessError> {
        let mut last_error = None;
        let mut any_succeeded = false;

        for detector in &self.detectors {
            match detector.detect(path) {
                Ok(regions) if !regions.is_empty() => {
                    debug!(detector = detector.name(), "Found {} regions", regions.len());
                    return Ok(regions);
                }
                Ok(_) => {
                    debug!(detector = detector.name(), "No regions found");
                    any_succeeded = true;
                }
                Err(e) => {
                    warn!(detector = detector.name(), "Detection failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        if any_succeeded {
            return Ok(Vec::new());
        }
        Err(last_error.unwrap_or(PostProcessError::NoDetector))
    }
}
