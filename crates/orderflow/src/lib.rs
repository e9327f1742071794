pub mod checkpoint;
pub mod config;
pub mod error;
pub mod generation;
pub mod orchestrator;
pub mod order;
pub mod planner;
pub mod postprocess;
pub mod sanitize;
pub mod script;
pub mod secrets;
pub mod seed;
pub mod tagger;
pub mod upload;
pub mod workflow;

pub use checkpoint::{CheckpointEntry, CheckpointStore};
pub use config::{load_config, AppConfig};
pub use error::{
    CheckpointError, ConfigError, GenerationError, OrderflowError, PostProcessError, Result,
    ScriptError, TagError, UploadError,
};
pub use generation::{ComfyBackend, GenerationBackend, Submission};
pub use orchestrator::{load_work, Orchestrator, RunSummary, Work, WorkSource};
pub use order::{Image, Order, UploadInfo, Website};
pub use planner::{partition, BatchPlanner};
pub use postprocess::{run_gate, GateReport, ImageSafetyProcessor, Region, SafetyProcessor};
pub use script::{load_script, parse_script, Mode};
pub use secrets::{resolve_secret, SecretError, SecretSource};
pub use seed::SeedSalt;
pub use tagger::{TagAnalysis, TagAnalyzer, Tagger};
pub use upload::{UploadDispatcher, UploadPayload, Uploader, UploaderRegistry};
pub use workflow::{WorkflowCatalog, WorkflowTemplate};
