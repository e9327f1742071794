use std::fmt;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::ScriptError;
use crate::order::{Order, UploadBlock, UploadInfo};
use crate::workflow::WorkflowCatalog;

const SCHEMA_JSON: &str = include_str!("../schema/script-v1.json");

/// How a work list is driven. Only sequential `flow` exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Flow,
}

impl Mode {
    /// Unknown names fall back to `flow` with a warning.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "flow" => Mode::Flow,
            other => {
                warn!("Unknown processing mode '{}', using flow", other);
                Mode::Flow
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Flow => "flow",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An upload block that did not make it into the work list.
#[derive(Debug)]
pub struct RejectedBlock {
    pub index: usize,
    pub error: ScriptError,
}

/// Validated upload requests of a script, before orders are planned.
#[derive(Debug)]
pub struct ParsedScript {
    pub mode: Mode,
    pub infos: Vec<UploadInfo>,
    pub rejected: Vec<RejectedBlock>,
}

#[derive(Debug)]
pub struct LoadedScript {
    pub mode: Mode,
    pub orders: Vec<Order>,
    pub rejected: Vec<RejectedBlock>,
}

pub fn load_script(path: &Path, catalog: &WorkflowCatalog) -> Result<LoadedScript, ScriptError> {
    let parsed = parse_script_file(path)?;

    let orders: Vec<Order> = parsed
        .infos
        .into_iter()
        .map(|info| {
            let mut order = Order::new(info, catalog);
            order.mode = parsed.mode;
            order
        })
        .collect();

    info!(
        "Loaded {} orders from {} ({} rejected)",
        orders.len(),
        path.display(),
        parsed.rejected.len()
    );

    Ok(LoadedScript {
        mode: parsed.mode,
        orders,
        rejected: parsed.rejected,
    })
}

pub fn parse_script_file(path: &Path) -> Result<ParsedScript, ScriptError> {
    let content = std::fs::read_to_string(path).map_err(|e| ScriptError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_script(&content)
}

/// Parses a script. Structural problems with the script as a whole are
/// errors; a bad upload block is logged, recorded in `rejected` and skipped.
pub fn parse_script(content: &str) -> Result<ParsedScript, ScriptError> {
    let script: Value = serde_json::from_str(content)?;
    let schema: Value = serde_json::from_str(SCHEMA_JSON)?;

    validate_against(&schema, &script).map_err(|errors| ScriptError::SchemaValidation { errors })?;

    let mode = Mode::parse(script.get("mode").and_then(Value::as_str).unwrap_or_default());

    let uploads = script
        .get("uploads")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if uploads.is_empty() {
        return Err(ScriptError::NoUploads);
    }

    let block_schema = schema
        .pointer("/$defs/upload")
        .cloned()
        .unwrap_or(Value::Bool(true));

    let mut infos = Vec::new();
    let mut rejected = Vec::new();
    for (index, block) in uploads.into_iter().enumerate() {
        match parse_block(index, &block_schema, block) {
            Ok(info) => {
                debug!(
                    upload_index = index,
                    "Accepted upload block for {} ({} images)", info.website, info.number
                );
                infos.push(info);
            }
            Err(e) => {
                error!(upload_index = index, "Skipping upload block: {}", e);
                rejected.push(RejectedBlock { index, error: e });
            }
        }
    }

    Ok(ParsedScript {
        mode,
        infos,
        rejected,
    })
}

fn parse_block(index: usize, schema: &Value, block: Value) -> Result<UploadInfo, ScriptError> {
    validate_against(schema, &block)
        .map_err(|message| ScriptError::InvalidBlock { index, message })?;

    let block: UploadBlock = serde_json::from_value(block).map_err(|e| ScriptError::InvalidBlock {
        index,
        message: e.to_string(),
    })?;

    UploadInfo::from_block(index, block)
}

fn validate_against(schema: &Value, instance: &Value) -> Result<(), String> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| format!("invalid embedded schema: {}", e))?;

    let messages: Vec<String> = validator
        .iter_errors(instance)
        .map(|e| e.to_string())
        .collect();

    if messages.is_empty() {
        Ok(())
    } else {
        Err(messages.join("; "))
    }
}
