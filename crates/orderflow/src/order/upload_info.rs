use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ScriptError;

use super::website::Website;

/// One `uploads[]` entry exactly as written in a script.
///
/// Every field is optional here; `UploadInfo::from_block` decides what is
/// required and what the defaults are.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadBlock {
    #[serde(default)]
    pub target: Option<TargetBlock>,
    #[serde(default)]
    pub workflow: Option<WorkflowBlock>,
    #[serde(default)]
    pub number: Option<i64>,
    #[serde(default)]
    pub batch: Option<i64>,
    #[serde(default)]
    pub safety_cover_sfw_level_num: Option<i64>,
    #[serde(default)]
    pub sfw_level_num: Option<i64>,
    #[serde(default)]
    pub watermark_enable: Option<bool>,
    #[serde(default)]
    pub mosaic_enable: Option<bool>,
    #[serde(default)]
    pub remove_default_tags: Option<Vec<String>>,
    #[serde(default)]
    pub add_default_tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetBlock {
    #[serde(default)]
    pub website_name: Option<String>,
    #[serde(default)]
    pub packer_enable: Option<bool>,
    #[serde(default)]
    pub packer_start_pos: Option<i64>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub extension_file_context: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowBlock {
    #[serde(default)]
    pub workflow_name: Option<String>,
    /// Node ids whose seed is pinned to the order's fixed seed. Strings and
    /// integers are accepted; anything else is reported when seeds are assigned.
    #[serde(default)]
    pub fixed_node_seed_names: Option<Vec<Value>>,
    #[serde(default)]
    pub uniform_string: Option<String>,
}

/// Validated request for one upload: how many images, how to batch them and
/// where the result goes.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadInfo {
    /// Position of the block in the script, used to tag diagnostics.
    pub upload_index: usize,
    pub website: Website,
    pub packer_enable: bool,
    pub packer_start_pos: usize,
    pub caption: String,
    pub extension_file_context: String,
    pub workflow_name: Option<String>,
    pub fixed_node_seed_names: Vec<Value>,
    pub uniform_string: String,
    pub number: usize,
    pub batch: usize,
    pub cover_sfw_level: i64,
    pub sfw_level: i64,
    pub watermark_enable: bool,
    pub mosaic_enable: bool,
    pub remove_default_tags: Vec<String>,
    pub add_default_tags: Vec<String>,
}

impl UploadInfo {
    pub fn from_block(index: usize, block: UploadBlock) -> Result<Self, ScriptError> {
        let target = block.target.ok_or_else(|| ScriptError::InvalidBlock {
            index,
            message: "missing 'target' object".to_string(),
        })?;
        let workflow = block.workflow.unwrap_or_default();

        let website_name = target.website_name.unwrap_or_default();
        let website =
            Website::from_name(&website_name).ok_or_else(|| ScriptError::UnsupportedWebsite {
                index,
                name: website_name.clone(),
            })?;

        let packer_enable = target.packer_enable.unwrap_or(false);
        let packer_start_pos = target.packer_start_pos.unwrap_or(0);
        let number = block.number.unwrap_or(0);
        let batch = block.batch.unwrap_or(0);

        if packer_start_pos < 0 {
            return Err(ScriptError::InvalidBlock {
                index,
                message: format!("packer_start_pos must not be negative, got {}", packer_start_pos),
            });
        }
        if packer_enable && number < packer_start_pos {
            return Err(ScriptError::PackerOutOfRange {
                index,
                number,
                start: packer_start_pos,
            });
        }
        if number <= 0 {
            return Err(ScriptError::InvalidNumber { index, number });
        }
        if batch < 0 {
            return Err(ScriptError::InvalidBatch { index, batch });
        }

        Ok(Self {
            upload_index: index,
            website,
            packer_enable,
            packer_start_pos: packer_start_pos as usize,
            caption: target.caption.unwrap_or_default(),
            extension_file_context: target.extension_file_context.unwrap_or_default(),
            workflow_name: workflow.workflow_name.filter(|name| !name.is_empty()),
            fixed_node_seed_names: workflow.fixed_node_seed_names.unwrap_or_default(),
            uniform_string: workflow.uniform_string.unwrap_or_default(),
            number: number as usize,
            batch: batch as usize,
            cover_sfw_level: block.safety_cover_sfw_level_num.unwrap_or(0),
            sfw_level: block.sfw_level_num.unwrap_or(0),
            watermark_enable: block.watermark_enable.unwrap_or(false),
            mosaic_enable: block.mosaic_enable.unwrap_or(false),
            remove_default_tags: block.remove_default_tags.unwrap_or_default(),
            add_default_tags: block.add_default_tags.unwrap_or_default(),
        })
    }

    /// Inverse of `from_block`, used when writing the request back out.
    pub fn to_block(&self) -> UploadBlock {
        UploadBlock {
            target: Some(TargetBlock {
                website_name: Some(self.website.as_str().to_string()),
                packer_enable: Some(self.packer_enable),
                packer_start_pos: Some(self.packer_start_pos as i64),
                caption: Some(self.caption.clone()),
                extension_file_context: Some(self.extension_file_context.clone()),
            }),
            workflow: Some(WorkflowBlock {
                workflow_name: self.workflow_name.clone(),
                fixed_node_seed_names: Some(self.fixed_node_seed_names.clone()),
                uniform_string: Some(self.uniform_string.clone()),
            }),
            number: Some(self.number as i64),
            batch: Some(self.batch as i64),
            safety_cover_sfw_level_num: Some(self.cover_sfw_level),
            sfw_level_num: Some(self.sfw_level),
            watermark_enable: Some(self.watermark_enable),
            mosaic_enable: Some(self.mosaic_enable),
            remove_default_tags: Some(self.remove_default_tags.clone()),
            add_default_tags: Some(self.add_default_tags.clone()),
        }
    }

    /// Uploads are flagged as adult unless every image is safe.
    pub fn is_adult(&self) -> bool {
        self.sfw_level < 2
    }
}
