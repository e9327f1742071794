//! Generation backend seam.
//!
//! The planner only sees the blocking [`GenerationBackend::submit`] contract;
//! [`comfy::ComfyBackend`] is the HTTP implementation.

pub mod comfy;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Local};
use serde_json::Value;

use crate::error::GenerationError;
use crate::workflow::WorkflowTemplate;

pub use comfy::ComfyBackend;

/// Result of one backend round trip.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    /// One saved file per generated image, in backend output order.
    pub output_paths: Vec<PathBuf>,
    /// Opaque per-node output metadata.
    pub task_info: Value,
}

pub trait GenerationBackend {
    /// Submits a prepared template and blocks until its outputs are saved under
    /// `output_dir`. Not cancellable once sent.
    fn submit(
        &mut self,
        template: &WorkflowTemplate,
        output_dir: &Path,
    ) -> Result<Submission, GenerationError>;
}

/// `<outputs>/<Y>_<M>_<D>`, created if needed.
pub fn dated_output_dir(outputs: &Path, now: DateTime<Local>) -> Result<PathBuf, GenerationError> {
    let dir = outputs.join(format!("{}_{}_{}", now.year(), now.month(), now.day()));
    std::fs::create_dir_all(&dir).map_err(|e| GenerationError::CreateOutputDir {
        path: dir.clone(),
        source: e,
    })?;
    Ok(dir)
}
