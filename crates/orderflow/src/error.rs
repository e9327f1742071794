use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrderflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Post-processing error: {0}")]
    PostProcess(#[from] PostProcessError),

    #[error("Tagging error: {0}")]
    Tag(#[from] TagError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write default config '{path}': {source}")]
    WriteDefault {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Errors raised while loading the script or validating an upload block.
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Failed to read script '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse script JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Script schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Script contains no upload blocks")]
    NoUploads,

    #[error("uploads[{index}]: {message}")]
    InvalidBlock { index: usize, message: String },

    #[error("uploads[{index}]: unsupported website '{name}'")]
    UnsupportedWebsite { index: usize, name: String },

    #[error("uploads[{index}]: number must be greater than 0, got {number}")]
    InvalidNumber { index: usize, number: i64 },

    #[error("uploads[{index}]: batch must not be negative, got {batch}")]
    InvalidBatch { index: usize, batch: i64 },

    #[error("uploads[{index}]: cannot pack from position {start} with only {number} images")]
    PackerOutOfRange {
        index: usize,
        number: i64,
        start: i64,
    },
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Failed to connect to generation backend at '{address}': {reason}")]
    Connect { address: String, reason: String },

    #[error("Generation backend request failed: {0}")]
    Request(String),

    #[error("Generation backend returned an unexpected response: {0}")]
    Protocol(String),

    #[error("Timed out waiting for prompt '{prompt_id}' after {secs}s")]
    Timeout { prompt_id: String, secs: u64 },

    #[error("uploads[{index}]: invalid batch split of {active} active images by batch {batch}")]
    InvalidBatch {
        index: usize,
        active: usize,
        batch: i64,
    },

    #[error("uploads[{index}]: image {image} has no workflow assigned")]
    NoWorkflow { index: usize, image: usize },

    #[error("Workflow template '{path}' does not exist")]
    WorkflowMissing { path: PathBuf },

    #[error("Invalid workflow template '{name}': {reason}")]
    InvalidWorkflow { name: String, reason: String },

    #[error("uploads[{index}]: batch mixes workflows '{first}' and '{other}'")]
    MixedWorkflow {
        index: usize,
        first: String,
        other: String,
    },

    #[error("uploads[{index}]: backend returned {returned} outputs for {requested} requested images")]
    PartialResult {
        index: usize,
        requested: usize,
        returned: usize,
    },

    #[error("uploads[{index}]: {missing} active images have no output path after generation")]
    MissingOutputs { index: usize, missing: usize },

    #[error("Failed to create output directory '{path}': {source}")]
    CreateOutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to save generated image '{path}': {reason}")]
    SaveImage { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Failed to create checkpoint directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read checkpoint '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write checkpoint '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed checkpoint '{path}': {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("Unsupported checkpoint version {found} in '{path}'")]
    UnsupportedVersion { path: PathBuf, found: u32 },

    #[error("Failed to serialize checkpoint: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum PostProcessError {
    #[error("Failed to open image '{path}': {reason}")]
    OpenImage { path: PathBuf, reason: String },

    #[error("Failed to save image '{path}': {reason}")]
    SaveImage { path: PathBuf, reason: String },

    #[error("Detector '{name}' failed: {reason}")]
    Detector { name: String, reason: String },

    #[error("No detector is configured")]
    NoDetector,
}

#[derive(Error, Debug)]
pub enum TagError {
    #[error("Unsupported tag analyzer provider '{0}'")]
    UnsupportedProvider(String),

    #[error("No prompt tags found in task info")]
    NoTags,

    #[error("Tag analyzer request failed: {0}")]
    Request(String),

    #[error("Tag analyzer returned no usable JSON: {0}")]
    InvalidResponse(String),

    #[error("Tag analysis is missing '{0}'")]
    MissingField(&'static str),

    #[error("Tag analysis aborted by operator")]
    Aborted,
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("uploads[{index}]: no uploader registered for website '{name}'")]
    Unsupported { index: usize, name: String },

    #[error("uploads[{index}]: {active} images still need work, refusing to upload")]
    Incomplete { index: usize, active: usize },

    #[error("Upload file does not exist: {0}")]
    MissingFile(PathBuf),

    #[error("Failed to write '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build archive '{path}': {reason}")]
    Archive { path: PathBuf, reason: String },

    #[error("Upload to '{site}' failed: {reason}")]
    Request { site: String, reason: String },

    #[error("Tagging failed: {0}")]
    Tag(#[from] TagError),
}

pub type Result<T> = std::result::Result<T, OrderflowError>;
