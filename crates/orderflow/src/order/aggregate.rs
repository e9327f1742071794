use std::path::PathBuf;

use serde_json::Value;
use tracing::debug;

use crate::script::Mode;
use crate::workflow::WorkflowCatalog;

use super::image::Image;
use super::upload_info::UploadInfo;

/// One upload request's unit of work: the request itself plus the images
/// it plans to produce.
///
/// The image count is fixed at construction. Progress lives on the images, so
/// "what is left" is always recomputed from their flags.
#[derive(Debug, Clone)]
pub struct Order {
    info: UploadInfo,
    images: Vec<Image>,
    /// Metadata of the last generation round trip, opaque to the pipeline.
    pub task_info: Value,
    /// Where the upload ended up; feeds `%url%` in the next order's caption.
    pub dst_url: String,
    pub extension_file_path: Option<PathBuf>,
    pub delivered: bool,
    /// Processing mode the order was loaded under, persisted with it.
    pub mode: Mode,
}

impl Order {
    /// Plans `info.number` images. Image 0 is the cover and takes the cover
    /// safety level; the rest take the regular one.
    pub fn new(info: UploadInfo, catalog: &WorkflowCatalog) -> Self {
        let images = (0..info.number)
            .map(|index| {
                let sfw_level = if index == 0 {
                    info.cover_sfw_level
                } else {
                    info.sfw_level
                };
                let mut image = Image::new(index, sfw_level);
                image.mosaic_enable = info.mosaic_enable;
                image.watermark_enable = info.watermark_enable;
                image.workflow_name = match &info.workflow_name {
                    Some(name) => Some(name.clone()),
                    None => catalog.resolve_default(sfw_level, info.upload_index),
                };
                image
            })
            .collect();

        debug!(
            upload_index = info.upload_index,
            "Planned {} images for {}", info.number, info.website
        );

        Self {
            info,
            images,
            task_info: Value::Object(Default::default()),
            dst_url: String::new(),
            extension_file_path: None,
            delivered: false,
            mode: Mode::Flow,
        }
    }

    /// Rebuilds an order from persisted parts without re-planning images.
    pub fn restore(info: UploadInfo, images: Vec<Image>) -> Self {
        Self {
            info,
            images,
            task_info: Value::Object(Default::default()),
            dst_url: String::new(),
            extension_file_path: None,
            delivered: false,
            mode: Mode::Flow,
        }
    }

    pub fn info(&self) -> &UploadInfo {
        &self.info
    }

    pub fn upload_index(&self) -> usize {
        self.info.upload_index
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn image(&self, index: usize) -> Option<&Image> {
        self.images.iter().find(|image| image.index == index)
    }

    pub fn image_mut(&mut self, index: usize) -> Option<&mut Image> {
        self.images.iter_mut().find(|image| image.index == index)
    }

    /// Positional view: slot `i` holds the image whose `index` is `i`, if any.
    /// The collection may be in any order after a restore.
    pub fn sort(&self) -> Vec<Option<&Image>> {
        let slots = self
            .images
            .iter()
            .map(|image| image.index + 1)
            .max()
            .unwrap_or(0)
            .max(self.info.number);
        let mut sorted = vec![None; slots];
        for image in &self.images {
            sorted[image.index] = Some(image);
        }
        sorted
    }

    /// Images that still need generation or post-processing, in ascending
    /// index order. Recomputed from image state on every call.
    pub fn sort_by_active(&self) -> Vec<&Image> {
        self.sort()
            .into_iter()
            .flatten()
            .filter(|image| image.is_active())
            .collect()
    }

    pub fn active_indices(&self) -> Vec<usize> {
        self.sort_by_active().iter().map(|image| image.index).collect()
    }

    /// Active images that have not been generated yet.
    pub fn pending_generation(&self) -> Vec<usize> {
        self.sort_by_active()
            .into_iter()
            .filter(|image| !image.is_generated())
            .map(|image| image.index)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.images.iter().all(|image| !image.is_active())
    }

    /// Output files in index order; images without output are skipped.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.sort()
            .into_iter()
            .flatten()
            .filter_map(|image| image.output_path.clone())
            .filter(|path| !path.as_os_str().is_empty())
            .collect()
    }
}
