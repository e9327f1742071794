//! Entity model: an `Order` owns one validated `UploadInfo` and the `Image`s
//! planned from it.

pub mod aggregate;
pub mod image;
pub mod upload_info;
pub mod website;

pub use aggregate::Order;
pub use image::{Image, SfwLevel};
pub use upload_info::{TargetBlock, UploadBlock, UploadInfo, WorkflowBlock};
pub use website::Website;
