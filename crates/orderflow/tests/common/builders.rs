//! Builders for upload blocks and scripts.

#![allow(dead_code)]

use serde_json::{json, Map, Value};

use orderflow::order::{Order, UploadBlock, UploadInfo};
use orderflow::workflow::WorkflowCatalog;

/// Builds one `uploads[]` entry. Starts from a valid `test` block of one
/// image in batches of one.
#[derive(Clone)]
pub struct UploadInfoBuilder {
    block: Map<String, Value>,
    target: Map<String, Value>,
    workflow: Map<String, Value>,
}

impl UploadInfoBuilder {
    pub fn new() -> Self {
        let mut builder = Self {
            block: Map::new(),
            target: Map::new(),
            workflow: Map::new(),
        };
        builder.target.insert("website_name".into(), json!("test"));
        builder.block.insert("number".into(), json!(1));
        builder.block.insert("batch".into(), json!(1));
        builder
    }

    pub fn website(mut self, name: &str) -> Self {
        self.target.insert("website_name".into(), json!(name));
        self
    }

    pub fn number(mut self, number: i64) -> Self {
        self.block.insert("number".into(), json!(number));
        self
    }

    pub fn batch(mut self, batch: i64) -> Self {
        self.block.insert("batch".into(), json!(batch));
        self
    }

    pub fn sfw_levels(mut self, cover: i64, rest: i64) -> Self {
        self.block.insert("safety_cover_sfw_level_num".into(), json!(cover));
        self.block.insert("sfw_level_num".into(), json!(rest));
        self
    }

    pub fn mosaic(mut self, enable: bool) -> Self {
        self.block.insert("mosaic_enable".into(), json!(enable));
        self
    }

    pub fn watermark(mut self, enable: bool) -> Self {
        self.block.insert("watermark_enable".into(), json!(enable));
        self
    }

    pub fn packer(mut self, start: i64) -> Self {
        self.target.insert("packer_enable".into(), json!(true));
        self.target.insert("packer_start_pos".into(), json!(start));
        self
    }

    pub fn caption(mut self, caption: &str) -> Self {
        self.target.insert("caption".into(), json!(caption));
        self
    }

    pub fn workflow_name(mut self, name: &str) -> Self {
        self.workflow.insert("workflow_name".into(), json!(name));
        self
    }

    pub fn uniform_string(mut self, value: &str) -> Self {
        self.workflow.insert("uniform_string".into(), json!(value));
        self
    }

    pub fn pin_seed_nodes(mut self, nodes: Value) -> Self {
        self.workflow.insert("fixed_node_seed_names".into(), nodes);
        self
    }

    pub fn to_json(&self) -> Value {
        let mut block = self.block.clone();
        block.insert("target".into(), Value::Object(self.target.clone()));
        if !self.workflow.is_empty() {
            block.insert("workflow".into(), Value::Object(self.workflow.clone()));
        }
        Value::Object(block)
    }

    pub fn build(&self, index: usize) -> UploadInfo {
        let block: UploadBlock =
            serde_json::from_value(self.to_json()).expect("builder produced an invalid block");
        UploadInfo::from_block(index, block).expect("builder produced a rejected block")
    }

    pub fn order(&self, index: usize, catalog: &WorkflowCatalog) -> Order {
        Order::new(self.build(index), catalog)
    }
}

/// Builds a script document.
pub struct ScriptBuilder {
    mode: Option<String>,
    uploads: Vec<Value>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self {
            mode: Some("flow".to_string()),
            uploads: Vec::new(),
        }
    }

    pub fn mode(mut self, mode: &str) -> Self {
        self.mode = Some(mode.to_string());
        self
    }

    pub fn upload(mut self, upload: UploadInfoBuilder) -> Self {
        self.uploads.push(upload.to_json());
        self
    }

    /// Adds an entry as-is, for blocks the typed builder cannot express.
    pub fn raw_upload(mut self, upload: Value) -> Self {
        self.uploads.push(upload);
        self
    }

    pub fn build(&self) -> String {
        let mut script = Map::new();
        if let Some(mode) = &self.mode {
            script.insert("mode".into(), json!(mode));
        }
        script.insert("uploads".into(), Value::Array(self.uploads.clone()));
        serde_json::to_string_pretty(&Value::Object(script)).expect("script serializes")
    }
}
