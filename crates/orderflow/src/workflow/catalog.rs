use std::path::{Path, PathBuf};

use tracing::error;

use crate::config::{AppConfig, WorkflowConfig};
use crate::error::GenerationError;
use crate::order::SfwLevel;

use super::template::WorkflowTemplate;

/// Template files available under the workflow directory, plus the default
/// template chosen for each SFW level.
#[derive(Debug, Clone)]
pub struct WorkflowCatalog {
    dir: PathBuf,
    names: WorkflowConfig,
}

impl WorkflowCatalog {
    pub fn new(dir: impl Into<PathBuf>, names: WorkflowConfig) -> Self {
        Self {
            dir: dir.into(),
            names,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.workflow_dir(), config.workflow.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn default_name(&self, level: SfwLevel) -> &str {
        match level {
            SfwLevel::Nsfw => &self.names.nsfw_name,
            SfwLevel::NsfwCensored => &self.names.nsfw_censored_name,
            SfwLevel::Safe => &self.names.sfw_name,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// Default template for a raw level number. Unmapped levels and missing
    /// files are reported and yield `None`; generation fails on it later.
    pub fn resolve_default(&self, level: i64, upload_index: usize) -> Option<String> {
        let Some(sfw) = SfwLevel::from_num(level) else {
            error!(upload_index, "No default workflow for SFW level {}", level);
            return None;
        };

        let name = self.default_name(sfw);
        if !self.contains(name) {
            error!(
                upload_index,
                "Default workflow '{}' not found in {}",
                name,
                self.dir.display()
            );
            return None;
        }

        Some(name.to_string())
    }

    pub fn load(&self, name: &str) -> Result<WorkflowTemplate, GenerationError> {
        WorkflowTemplate::load(&self.path(name))
    }
}
