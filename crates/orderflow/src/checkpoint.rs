//! Order snapshots for crash recovery.
//!
//! A checkpoint is a JSON object with `ui` (the upload request, flat), `_images`
//! (one flat record per image), `taskInfo` and `dstURL`. The key names are
//! kept stable so older snapshots keep loading; `version`, `_mode`,
//! `delivered` and `extensionFileContextPath` are optional. Without
//! `delivered`, an Order whose images are all finished counts as delivered.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Datelike, Local, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::CheckpointError;
use crate::order::{Image, Order, TargetBlock, UploadBlock, UploadInfo, WorkflowBlock};
use crate::sanitize::redact_path;
use crate::script::Mode;

pub const CHECKPOINT_VERSION: u32 = 1;
const FILE_SUFFIX: &str = "image_order.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UiRecord {
    target_website_name: String,
    target_packer_enable: bool,
    target_packer_start_pos: i64,
    target_caption: String,
    target_extension_file_context: String,
    workflow_fixed_node_seed_names: Vec<Value>,
    workflow_uniform_string: String,
    workflow_name: String,
    rm_default_tags: Vec<String>,
    add_default_tags: Vec<String>,
    number: i64,
    batch: i64,
    #[serde(rename = "safetyCoverSFWLevelNum")]
    safety_cover_sfw_level_num: i64,
    sfw_level_num: i64,
    #[serde(rename = "waterMarkEnable")]
    watermark_enable: bool,
    mosaic_enable: bool,
    #[serde(rename = "_uploadIndex")]
    upload_index: usize,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageRecord {
    #[serde(rename = "_index")]
    index: usize,
    output_path: String,
    sfw_level_num: i64,
    workflow_name: String,
    mosaic_enable: bool,
    mosaic_fin: bool,
    watermark_enable: bool,
    watermark_fin: bool,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointRecord {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(rename = "_mode", default)]
    mode: Option<String>,
    ui: UiRecord,
    #[serde(rename = "_images")]
    images: Vec<ImageRecord>,
    #[serde(rename = "taskInfo", default)]
    task_info: Value,
    #[serde(rename = "dstURL", default)]
    dst_url: String,
    #[serde(rename = "extensionFileContextPath", default)]
    extension_file_path: String,
    /// Absent in snapshots written before the flag existed.
    #[serde(default)]
    delivered: Option<bool>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

fn default_version() -> u32 {
    CHECKPOINT_VERSION
}

impl UiRecord {
    fn from_info(info: &UploadInfo) -> Self {
        Self {
            target_website_name: info.website.as_str().to_string(),
            target_packer_enable: info.packer_enable,
            target_packer_start_pos: info.packer_start_pos as i64,
            target_caption: info.caption.clone(),
            target_extension_file_context: info.extension_file_context.clone(),
            workflow_fixed_node_seed_names: info.fixed_node_seed_names.clone(),
            workflow_uniform_string: info.uniform_string.clone(),
            workflow_name: info.workflow_name.clone().unwrap_or_default(),
            rm_default_tags: info.remove_default_tags.clone(),
            add_default_tags: info.add_default_tags.clone(),
            number: info.number as i64,
            batch: info.batch as i64,
            safety_cover_sfw_level_num: info.cover_sfw_level,
            sfw_level_num: info.sfw_level,
            watermark_enable: info.watermark_enable,
            mosaic_enable: info.mosaic_enable,
            upload_index: info.upload_index,
            extra: BTreeMap::new(),
        }
    }

    fn into_block(self) -> UploadBlock {
        UploadBlock {
            target: Some(TargetBlock {
                website_name: Some(self.target_website_name),
                packer_enable: Some(self.target_packer_enable),
                packer_start_pos: Some(self.target_packer_start_pos),
                caption: Some(self.target_caption),
                extension_file_context: Some(self.target_extension_file_context),
            }),
            workflow: Some(WorkflowBlock {
                workflow_name: Some(self.workflow_name),
                fixed_node_seed_names: Some(self.workflow_fixed_node_seed_names),
                uniform_string: Some(self.workflow_uniform_string),
            }),
            number: Some(self.number),
            batch: Some(self.batch),
            safety_cover_sfw_level_num: Some(self.safety_cover_sfw_level_num),
            sfw_level_num: Some(self.sfw_level_num),
            watermark_enable: Some(self.watermark_enable),
            mosaic_enable: Some(self.mosaic_enable),
            remove_default_tags: Some(self.rm_default_tags),
            add_default_tags: Some(self.add_default_tags),
        }
    }
}

impl ImageRecord {
    fn from_image(image: &Image) -> Self {
        Self {
            index: image.index,
            output_path: image
                .output_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
            sfw_level_num: image.sfw_level,
            workflow_name: image.workflow_name.clone().unwrap_or_default(),
            mosaic_enable: image.mosaic_enable,
            mosaic_fin: image.mosaic_done,
            watermark_enable: image.watermark_enable,
            watermark_fin: image.watermark_done,
            extra: BTreeMap::new(),
        }
    }

    fn into_image(self) -> Image {
        Image {
            index: self.index,
            output_path: Some(self.output_path)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            sfw_level: self.sfw_level_num,
            workflow_name: Some(self.workflow_name).filter(|n| !n.is_empty()),
            mosaic_enable: self.mosaic_enable,
            mosaic_done: self.mosaic_fin,
            watermark_enable: self.watermark_enable,
            watermark_done: self.watermark_fin,
        }
    }
}

/// A checkpoint file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointEntry {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Writes and reads order snapshots under one recovery directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes the order to `<dir>/<Y>-<M>-<D>_<H>-<Min>-image_order.json`,
    /// replacing any snapshot written earlier in the same minute.
    pub fn save(&self, order: &Order) -> Result<PathBuf, CheckpointError> {
        self.save_at(order, Local::now())
    }

    pub fn save_at(&self, order: &Order, now: DateTime<Local>) -> Result<PathBuf, CheckpointError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| CheckpointError::CreateDirectory {
            path: self.dir.clone(),
            source: e,
        })?;

        let record = CheckpointRecord {
            version: CHECKPOINT_VERSION,
            mode: Some(order.mode.as_str().to_string()),
            ui: UiRecord::from_info(order.info()),
            images: order.images().iter().map(ImageRecord::from_image).collect(),
            task_info: order.task_info.clone(),
            dst_url: order.dst_url.clone(),
            extension_file_path: order
                .extension_file_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
            delivered: Some(order.delivered),
            extra: BTreeMap::new(),
        };

        let path = self.dir.join(checkpoint_file_name(now));
        let json = serde_json::to_string_pretty(&record)?;
        std::fs::write(&path, json).map_err(|e| CheckpointError::WriteFile {
            path: path.clone(),
            source: e,
        })?;

        debug!(
            upload_index = order.upload_index(),
            "Checkpoint saved to {}",
            redact_path(&path)
        );
        Ok(path)
    }

    /// Saves and logs a failure instead of returning it. Losing a snapshot only
    /// risks redoing work after a crash.
    pub fn save_logged(&self, order: &Order) -> Option<PathBuf> {
        match self.save(order) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(upload_index = order.upload_index(), "Checkpoint not saved: {}", e);
                None
            }
        }
    }

    /// Checkpoint files, most recently modified first.
    pub fn list(&self) -> Result<Vec<CheckpointEntry>, CheckpointError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| CheckpointError::ReadFile {
                path: self.dir.clone(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push(CheckpointEntry {
                path: entry.into_path(),
                modified,
            });
        }

        entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.path.cmp(&a.path)));
        Ok(entries)
    }

    pub fn latest(&self) -> Result<Option<PathBuf>, CheckpointError> {
        Ok(self.list()?.into_iter().next().map(|entry| entry.path))
    }

    /// Reads one checkpoint back into an order. Any missing or inconsistent
    /// field rejects the whole file.
    pub fn load(path: &Path) -> Result<Order, CheckpointError> {
        let content = std::fs::read_to_string(path).map_err(|e| CheckpointError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        let malformed = |reason: String| CheckpointError::Malformed {
            path: path.to_path_buf(),
            reason,
        };

        let record: CheckpointRecord =
            serde_json::from_str(&content).map_err(|e| malformed(e.to_string()))?;

        if record.version > CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                path: path.to_path_buf(),
                found: record.version,
            });
        }

        log_unknown_keys(path, "", &record.extra);
        log_unknown_keys(path, "ui.", &record.ui.extra);
        for image in &record.images {
            log_unknown_keys(path, "_images.", &image.extra);
        }

        let upload_index = record.ui.upload_index;
        let info = UploadInfo::from_block(upload_index, record.ui.into_block())
            .map_err(|e| malformed(e.to_string()))?;

        let images: Vec<Image> = record.images.into_iter().map(ImageRecord::into_image).collect();
        check_images(&info, &images).map_err(malformed)?;

        let mut order = Order::restore(info, images);
        order.task_info = record.task_info;
        order.dst_url = record.dst_url;
        order.extension_file_path = Some(record.extension_file_path)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        // Older snapshots count as delivered once no image has work left.
        order.delivered = record
            .delivered
            .unwrap_or_else(|| order.sort_by_active().is_empty());
        order.mode = Mode::parse(record.mode.as_deref().unwrap_or(Mode::Flow.as_str()));

        info!(upload_index, "Restored order from {}", redact_path(path));
        Ok(order)
    }
}

fn check_images(info: &UploadInfo, images: &[Image]) -> Result<(), String> {
    if images.len() != info.number {
        return Err(format!(
            "expected {} images, found {}",
            info.number,
            images.len()
        ));
    }

    let mut seen = HashSet::new();
    for image in images {
        if image.index >= info.number {
            return Err(format!(
                "image index {} out of range for {} images",
                image.index, info.number
            ));
        }
        if !seen.insert(image.index) {
            return Err(format!("duplicate image index {}", image.index));
        }
    }
    Ok(())
}

fn log_unknown_keys(path: &Path, prefix: &str, extra: &BTreeMap<String, Value>) {
    for key in extra.keys() {
        debug!("Ignoring unknown checkpoint key '{}{}' in {}", prefix, key, redact_path(path));
    }
}

pub fn checkpoint_file_name(now: DateTime<Local>) -> String {
    format!(
        "{}-{}-{}_{}-{}-{}",
        now.year(),
        now.month(),
        now.day(),
        now.hour(),
        now.minute(),
        FILE_SUFFIX
    )
}
