use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::BackendConfig;
use crate::error::GenerationError;
use crate::postprocess::imaging::write_jpeg;
use crate::sanitize::redact_path;
use crate::workflow::WorkflowTemplate;

use super::{GenerationBackend, Submission};

/// ComfyUI-compatible HTTP backend.
pub struct ComfyBackend {
    client: Client,
    base_url: String,
    client_id: String,
    poll_interval: Duration,
    timeout: Duration,
    log_dir: Option<PathBuf>,
}

/// One entry of `history.outputs[node].images`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_folder_type")]
    pub folder_type: String,
}

fn default_folder_type() -> String {
    "output".to_string()
}

#[derive(Debug, Deserialize)]
struct QueueResponse {
    prompt_id: String,
}

impl ComfyBackend {
    /// Builds the client and probes the backend. An unreachable backend is an
    /// error here, before any order is touched.
    pub fn connect(
        config: &BackendConfig,
        log_dir: Option<PathBuf>,
    ) -> Result<Self, GenerationError> {
        let base_url = base_url(&config.address);
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| GenerationError::Connect {
                address: config.address.clone(),
                reason: e.to_string(),
            })?;

        client
            .get(format!("{}/system_stats", base_url))
            .send()
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| GenerationError::Connect {
                address: config.address.clone(),
                reason: e.to_string(),
            })?;

        info!("Connected to generation backend at {}", config.address);

        Ok(Self {
            client,
            base_url,
            client_id: uuid::Uuid::new_v4().to_string(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            timeout: Duration::from_secs(config.timeout_secs),
            log_dir,
        })
    }

    fn queue_prompt(&self, workflow: &Value) -> Result<String, GenerationError> {
        let body = json!({ "prompt": workflow, "client_id": self.client_id });
        let response: QueueResponse = self
            .client
            .post(format!("{}/prompt", self.base_url))
            .json(&body)
            .send()
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| GenerationError::Request(e.to_string()))?
            .json()
            .map_err(|e| GenerationError::Protocol(format!("queue response: {}", e)))?;

        Ok(response.prompt_id)
    }

    /// Polls `/history/{id}` until the prompt shows up there, which the
    /// backend only does once execution has finished.
    fn wait_for_history(&self, prompt_id: &str) -> Result<Value, GenerationError> {
        let started = Instant::now();
        let url = format!("{}/history/{}", self.base_url, prompt_id);

        loop {
            let history: Value = self
                .client
                .get(&url)
                .send()
                .and_then(|resp| resp.error_for_status())
                .map_err(|e| GenerationError::Request(e.to_string()))?
                .json()
                .map_err(|e| GenerationError::Protocol(format!("history response: {}", e)))?;

            if let Some(entry) = history.get(prompt_id) {
                debug!(prompt_id, "Prompt finished after {:?}", started.elapsed());
                return Ok(entry.clone());
            }

            if started.elapsed() >= self.timeout {
                return Err(GenerationError::Timeout {
                    prompt_id: prompt_id.to_string(),
                    secs: self.timeout.as_secs(),
                });
            }

            thread::sleep(self.poll_interval);
        }
    }

    fn fetch_image(&self, image: &ImageRef) -> Result<Vec<u8>, GenerationError> {
        let bytes = self
            .client
            .get(format!("{}/view", self.base_url))
            .query(&[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.folder_type.as_str()),
            ])
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.bytes())
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        Ok(bytes.to_vec())
    }

    fn record(&self, file_name: &str, value: &Value) {
        let Some(dir) = &self.log_dir else {
            return;
        };
        let path = dir.join(file_name);
        let written = std::fs::create_dir_all(dir)
            .and_then(|_| std::fs::write(&path, serde_json::to_vec_pretty(value).unwrap_or_default()));
        if let Err(e) = written {
            warn!("Failed to write {}: {}", redact_path(&path), e);
        }
    }
}

impl GenerationBackend for ComfyBackend {
    fn submit(
        &mut self,
        template: &WorkflowTemplate,
        output_dir: &Path,
    ) -> Result<Submission, GenerationError> {
        let workflow = template.graph();
        self.record("last_request.json", workflow);

        let prompt_id = self.queue_prompt(workflow)?;
        debug!(prompt_id = %prompt_id, workflow = template.name(), "Queued prompt");

        let history = self.wait_for_history(&prompt_id)?;
        self.record("last_outputs.json", &history);

        let outputs = history
            .get("outputs")
            .cloned()
            .ok_or_else(|| GenerationError::Protocol("history entry has no outputs".to_string()))?;

        let mut output_paths = Vec::new();
        for image in image_refs(&outputs) {
            let bytes = self.fetch_image(&image)?;
            match save_as_jpeg(&bytes, output_dir) {
                Ok(path) => output_paths.push(path),
                Err(e) => warn!("Skipping output '{}': {}", image.filename, e),
            }
        }

        Ok(Submission {
            output_paths,
            task_info: outputs,
        })
    }
}

fn base_url(address: &str) -> String {
    let trimmed = address.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

/// Images listed under `outputs[*].images`, in node order.
pub fn image_refs(outputs: &Value) -> Vec<ImageRef> {
    let Some(nodes) = outputs.as_object() else {
        return Vec::new();
    };

    nodes
        .values()
        .filter_map(|node| node.get("images").and_then(Value::as_array))
        .flatten()
        .filter_map(|image| match serde_json::from_value::<ImageRef>(image.clone()) {
            Ok(image) => Some(image),
            Err(e) => {
                warn!("Ignoring malformed output image entry: {}", e);
                None
            }
        })
        .collect()
}

/// Saves raw image bytes as an RGB JPEG named `<millis>-<sha256>.jpg`.
pub fn save_as_jpeg(bytes: &[u8], dir: &Path) -> Result<PathBuf, GenerationError> {
    let digest = Sha256::digest(bytes);
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    let millis = chrono::Utc::now().timestamp_millis();
    let path = dir.join(format!("{}-{}.jpg", millis, hex));

    let save_err = |reason: String| GenerationError::SaveImage {
        path: path.clone(),
        reason,
    };

    let decoded = image::load_from_memory(bytes).map_err(|e| save_err(e.to_string()))?;
    write_jpeg(&path, &decoded.to_rgb8()).map_err(save_err)?;

    Ok(path)
}
