pub mod catalog;
pub mod template;

pub use catalog::WorkflowCatalog;
pub use template::{collect_string_lists, WorkflowTemplate};
