//! Test harness for isolated end-to-end runs.
//!
//! `TestHarness` lays out a data directory (`workflow/`, `orders/`,
//! `outputs/`, `script/`) in a temp dir and wires an `Orchestrator` to fake
//! collaborators whose logs stay inspectable after the run.

#![allow(dead_code)]

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use image::{Rgb, RgbImage};
use serde_json::{json, Value};
use tempfile::TempDir;

use orderflow::checkpoint::CheckpointStore;
use orderflow::config::{AppConfig, TaggerConfig};
use orderflow::error::{GenerationError, PostProcessError, TagError, UploadError};
use orderflow::generation::{GenerationBackend, Submission};
use orderflow::orchestrator::Orchestrator;
use orderflow::order::Website;
use orderflow::postprocess::{Region, SafetyProcessor};
use orderflow::seed::SeedSalt;
use orderflow::tagger::{AutoConfirm, OperatorPrompt, TagAnalysis, TagAnalyzer, Tagger};
use orderflow::upload::{UploadDispatcher, UploadPayload, Uploader, UploaderRegistry};
use orderflow::workflow::WorkflowCatalog;

pub const PROMPT_TAGS: &str = "genshin_impact,furina_(genshin_impact),smile,blue_eyes";

/// Isolated data directory plus the config pointing at it.
pub struct TestHarness {
    temp_dir: TempDir,
    pub config: AppConfig,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut config = AppConfig::default();
        config.base.data_dir = temp_dir.path().to_path_buf();

        let harness = Self { temp_dir, config };
        let workflow_dir = harness.config.workflow_dir();
        std::fs::create_dir_all(&workflow_dir).expect("Failed to create workflow dir");
        for name in [
            "default_sfw.json",
            "default_nsfw_censored.json",
            "default_nsfw.json",
        ] {
            harness.write_workflow(name);
        }
        harness
    }

    pub fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Graph with two seed slots (nodes 3 and 8) and one batch size slot.
    pub fn write_workflow(&self, name: &str) -> PathBuf {
        let graph = json!({
            "3": { "class_type": "KSampler", "inputs": { "seed": 0, "steps": 20 } },
            "5": { "class_type": "EmptyLatentImage", "inputs": { "batch_size": 1, "width": 64 } },
            "8": { "class_type": "KSampler", "inputs": { "seed": 0, "steps": 10 } },
            "9": { "class_type": "SaveImage", "inputs": { "filename_prefix": "out" } }
        });
        let path = self.config.workflow_dir().join(name);
        std::fs::write(&path, graph.to_string()).expect("Failed to write workflow");
        path
    }

    pub fn write_script(&self, content: &str) -> PathBuf {
        let path = self.config.script_path();
        std::fs::create_dir_all(path.parent().unwrap()).expect("Failed to create script dir");
        std::fs::write(&path, content).expect("Failed to write script");
        path
    }

    pub fn catalog(&self) -> WorkflowCatalog {
        WorkflowCatalog::from_config(&self.config)
    }

    pub fn store(&self) -> CheckpointStore {
        CheckpointStore::new(self.config.orders_dir())
    }

    /// Orchestrator wired to the given fakes. Pixiv and booth go to `uploader`;
    /// `test` keeps the built-in no-op uploader.
    pub fn orchestrator(
        &self,
        backend: FakeBackend,
        processor: RecordingProcessor,
        uploader: RecordingUploader,
    ) -> Orchestrator {
        let tagger = Tagger::new(
            Box::new(FixedAnalyzer),
            Box::new(AutoConfirm),
            &TaggerConfig::default(),
        );
        self.orchestrator_with_tagger(backend, processor, uploader, tagger)
    }

    pub fn orchestrator_with_tagger(
        &self,
        backend: FakeBackend,
        processor: RecordingProcessor,
        uploader: RecordingUploader,
        tagger: Tagger,
    ) -> Orchestrator {
        let mut registry = UploaderRegistry::new();
        registry.register(Website::Pixiv, Box::new(uploader.clone()));
        registry.register(Website::Booth, Box::new(uploader));

        Orchestrator::new(
            self.catalog(),
            self.store(),
            SeedSalt::from_value(42),
            Box::new(backend),
            Box::new(processor),
            UploadDispatcher::new(registry, tagger, self.config.outputs_dir()),
            self.config.outputs_dir(),
        )
    }
}

/// First value stored under `key` anywhere in `value`.
pub fn find_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map
            .get(key)
            .or_else(|| map.values().find_map(|v| find_key(v, key))),
        Value::Array(items) => items.iter().find_map(|v| find_key(v, key)),
        _ => None,
    }
}

#[derive(Debug, Default)]
pub struct BackendLog {
    pub requests: Vec<Value>,
    pub batch_sizes: Vec<usize>,
}

/// Writes real JPEGs for every requested image. Can fail on a chosen request
/// or return too few outputs.
#[derive(Clone, Default)]
pub struct FakeBackend {
    pub log: Rc<RefCell<BackendLog>>,
    fail_on_request: Option<usize>,
    shortfall: usize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `n`th request (0-based) fails as if the backend went away.
    pub fn failing_on(n: usize) -> Self {
        Self {
            fail_on_request: Some(n),
            ..Self::default()
        }
    }

    pub fn short_by(shortfall: usize) -> Self {
        Self {
            shortfall,
            ..Self::default()
        }
    }

    pub fn request_count(&self) -> usize {
        self.log.borrow().requests.len()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.log.borrow().batch_sizes.clone()
    }
}

impl GenerationBackend for FakeBackend {
    fn submit(
        &mut self,
        template: &orderflow::workflow::WorkflowTemplate,
        output_dir: &Path,
    ) -> Result<Submission, GenerationError> {
        let mut log = self.log.borrow_mut();
        if self.fail_on_request == Some(log.requests.len()) {
            return Err(GenerationError::Request("connection reset".to_string()));
        }

        let graph = template.to_json();
        let size = find_key(&graph, "batch_size")
            .and_then(Value::as_u64)
            .unwrap_or(1) as usize;
        log.requests.push(graph);
        log.batch_sizes.push(size);

        let mut output_paths = Vec::new();
        for i in 0..size.saturating_sub(self.shortfall) {
            let path = output_dir.join(format!("{}.jpg", uuid::Uuid::new_v4()));
            RgbImage::from_pixel(16, 16, Rgb([(i * 40 % 256) as u8, 120, 200]))
                .save(&path)
                .map_err(|e| GenerationError::SaveImage {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            output_paths.push(path);
        }

        Ok(Submission {
            output_paths,
            task_info: json!({
                "9": { "images": [] },
                "12": { "text": [PROMPT_TAGS] }
            }),
        })
    }
}

#[derive(Debug, Default)]
pub struct ProcessorLog {
    pub detects: Vec<PathBuf>,
    pub blurs: Vec<PathBuf>,
    pub watermarks: Vec<PathBuf>,
}

impl ProcessorLog {
    pub fn calls(&self) -> usize {
        self.detects.len() + self.blurs.len() + self.watermarks.len()
    }
}

#[derive(Clone, Default)]
pub struct RecordingProcessor {
    pub log: Rc<RefCell<ProcessorLog>>,
    fail_detect: bool,
}

impl RecordingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_detection() -> Self {
        Self {
            fail_detect: true,
            ..Self::default()
        }
    }
}

impl SafetyProcessor for RecordingProcessor {
    fn detect_unsafe_regions(&mut self, path: &Path) -> Result<Vec<Region>, PostProcessError> {
        self.log.borrow_mut().detects.push(path.to_path_buf());
        if self.fail_detect {
            return Err(PostProcessError::Detector {
                name: "fake".to_string(),
                reason: "model unavailable".to_string(),
            });
        }
        Ok(vec![Region { x: 0, y: 0, w: 8, h: 8 }])
    }

    fn apply_blur(&mut self, path: &Path, _regions: &[Region]) -> Result<(), PostProcessError> {
        self.log.borrow_mut().blurs.push(path.to_path_buf());
        Ok(())
    }

    fn apply_watermark(&mut self, path: &Path) -> Result<(), PostProcessError> {
        self.log.borrow_mut().watermarks.push(path.to_path_buf());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingUploader {
    pub payloads: Rc<RefCell<Vec<UploadPayload>>>,
}

impl RecordingUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payloads(&self) -> Vec<UploadPayload> {
        self.payloads.borrow().clone()
    }
}

impl Uploader for RecordingUploader {
    fn start_upload(&mut self, payload: &UploadPayload) -> Result<String, UploadError> {
        let mut payloads = self.payloads.borrow_mut();
        payloads.push(payload.clone());
        Ok(format!("https://example.com/posts/{}", payloads.len()))
    }
}

/// Analyzer that always recognises the same work and character.
pub struct FixedAnalyzer;

impl TagAnalyzer for FixedAnalyzer {
    fn analyze(&mut self, tags: &[String]) -> Result<TagAnalysis, TagError> {
        Ok(TagAnalysis {
            source: "原神".to_string(),
            character: "フリーナ".to_string(),
            other: tags.iter().skip(2).cloned().collect(),
        })
    }
}

/// Fails the first `failures` analyses, then behaves like `FixedAnalyzer`.
pub struct FlakyAnalyzer {
    failures: usize,
}

impl FlakyAnalyzer {
    pub fn failing(failures: usize) -> Self {
        Self { failures }
    }
}

impl TagAnalyzer for FlakyAnalyzer {
    fn analyze(&mut self, tags: &[String]) -> Result<TagAnalysis, TagError> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(TagError::InvalidResponse("no JSON in reply".to_string()));
        }
        FixedAnalyzer.analyze(tags)
    }
}

/// Interactive operator who never retries a failed analysis and accepts
/// every result.
pub struct NoRetryOperator;

impl OperatorPrompt for NoRetryOperator {
    fn retry_after(&mut self, _error: &TagError) -> bool {
        false
    }

    fn accept(&mut self, _analysis: &TagAnalysis) -> bool {
        true
    }
}
