//! Delivery of finished Orders to their target website.

pub mod caption;
pub mod dispatch;
pub mod registry;

use std::path::PathBuf;

use serde::Serialize;

use crate::error::UploadError;
use crate::order::Website;

pub use caption::{substitute_keywords, CaptionContext};
pub use dispatch::{DeliveredOrder, UploadDispatcher};
pub use registry::{TestUploader, UploaderRegistry, WebhookUploader};

/// Everything a site adapter needs to publish one Order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadPayload {
    pub website: Website,
    pub title: String,
    pub caption: String,
    pub tags: Vec<String>,
    pub files: Vec<PathBuf>,
    pub adult: bool,
}

/// Per-site upload capability. Returns the URL of the published post, or an
/// empty string when the site has none.
pub trait Uploader {
    fn start_upload(&mut self, payload: &UploadPayload) -> Result<String, UploadError>;
}
