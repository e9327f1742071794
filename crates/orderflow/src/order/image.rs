use std::path::{Path, PathBuf};

/// Safety tier of a generated image. Drives the default workflow choice and
/// whether the upload is flagged as adult content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SfwLevel {
    Nsfw,
    NsfwCensored,
    Safe,
}

impl SfwLevel {
    pub fn from_num(level: i64) -> Option<Self> {
        match level {
            0 => Some(SfwLevel::Nsfw),
            1 => Some(SfwLevel::NsfwCensored),
            2 => Some(SfwLevel::Safe),
            _ => None,
        }
    }

    pub fn as_num(self) -> i64 {
        match self {
            SfwLevel::Nsfw => 0,
            SfwLevel::NsfwCensored => 1,
            SfwLevel::Safe => 2,
        }
    }
}

/// One planned output of an order.
///
/// `index` is the image's stable position within its order; everything else
/// is progress state that only ever moves towards done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub index: usize,
    pub output_path: Option<PathBuf>,
    /// Raw level number, kept as given so out-of-range values survive a checkpoint.
    pub sfw_level: i64,
    pub workflow_name: Option<String>,
    pub mosaic_enable: bool,
    pub mosaic_done: bool,
    pub watermark_enable: bool,
    pub watermark_done: bool,
}

impl Image {
    pub fn new(index: usize, sfw_level: i64) -> Self {
        Self {
            index,
            output_path: None,
            sfw_level,
            workflow_name: None,
            mosaic_enable: false,
            mosaic_done: false,
            watermark_enable: false,
            watermark_done: false,
        }
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    pub fn is_generated(&self) -> bool {
        self.output_path
            .as_ref()
            .is_some_and(|p| !p.as_os_str().is_empty())
    }

    pub fn needs_mosaic(&self) -> bool {
        self.mosaic_enable && !self.mosaic_done
    }

    pub fn needs_watermark(&self) -> bool {
        self.watermark_enable && !self.watermark_done
    }

    /// True while the image is missing output or a post-processing step
    /// does not match its enable flag.
    pub fn is_active(&self) -> bool {
        !self.is_generated()
            || self.mosaic_enable != self.mosaic_done
            || self.watermark_enable != self.watermark_done
    }

    pub fn sfw(&self) -> Option<SfwLevel> {
        SfwLevel::from_num(self.sfw_level)
    }
}
