//! Flow driver: takes each Order through generation, post-processing and
//! upload before the next one starts.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use tracing::{error, info, info_span, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::AppConfig;
use crate::error::{OrderflowError, ScriptError, TagError, UploadError};
use crate::generation::{dated_output_dir, ComfyBackend, GenerationBackend};
use crate::order::Order;
use crate::planner::BatchPlanner;
use crate::postprocess::{run_gate, ImageSafetyProcessor, SafetyProcessor};
use crate::sanitize::redact_path;
use crate::script::{load_script, Mode, RejectedBlock};
use crate::seed::SeedSalt;
use crate::tagger::Tagger;
use crate::upload::{UploadDispatcher, UploaderRegistry};
use crate::workflow::WorkflowCatalog;

/// Where the work list came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkSource {
    Checkpoint(PathBuf),
    Script(PathBuf),
}

#[derive(Debug)]
pub struct Work {
    pub mode: Mode,
    pub orders: Vec<Order>,
    pub rejected: Vec<RejectedBlock>,
    pub source: WorkSource,
}

/// Resumes the newest undelivered checkpoint, or loads the script when there
/// is none (or `fresh` is set).
pub fn load_work(
    store: &CheckpointStore,
    script_path: &Path,
    fresh: bool,
    catalog: &WorkflowCatalog,
) -> Result<Work, ScriptError> {
    if !fresh {
        if let Some(work) = resume_latest(store) {
            return Ok(work);
        }
    }

    let script = load_script(script_path, catalog)?;
    for rejected in &script.rejected {
        error!(upload_index = rejected.index, "Skipping upload block: {}", rejected.error);
    }

    Ok(Work {
        mode: script.mode,
        orders: script.orders,
        rejected: script.rejected,
        source: WorkSource::Script(script_path.to_path_buf()),
    })
}

fn resume_latest(store: &CheckpointStore) -> Option<Work> {
    let latest = match store.latest() {
        Ok(latest) => latest?,
        Err(e) => {
            warn!("Cannot list checkpoints: {}", e);
            return None;
        }
    };

    match CheckpointStore::load(&latest) {
        Ok(order) if !order.delivered => {
            info!(
                upload_index = order.upload_index(),
                "Resuming from checkpoint {}",
                redact_path(&latest)
            );
            Some(Work {
                mode: order.mode,
                orders: vec![order],
                rejected: Vec::new(),
                source: WorkSource::Checkpoint(latest),
            })
        }
        Ok(_) => {
            info!("Latest checkpoint {} was delivered, loading script", redact_path(&latest));
            None
        }
        Err(e) => {
            warn!("Ignoring checkpoint {}: {}", redact_path(&latest), e);
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub delivered: usize,
    /// Upload indices of Orders left undelivered so the run could go on.
    pub skipped: Vec<usize>,
    pub stopped: bool,
}

pub struct Orchestrator {
    catalog: WorkflowCatalog,
    store: CheckpointStore,
    salt: SeedSalt,
    backend: Box<dyn GenerationBackend>,
    processor: Box<dyn SafetyProcessor>,
    dispatcher: UploadDispatcher,
    outputs_dir: PathBuf,
    stop: Arc<AtomicBool>,
}

impl Orchestrator {
    /// Production constructor. Connects to the generation backend and builds
    /// every collaborator from config; any failure here is fatal.
    pub fn from_config(config: &AppConfig) -> Result<Self, OrderflowError> {
        let backend = ComfyBackend::connect(&config.backend, Some(config.log_dir()))?;
        let processor = ImageSafetyProcessor::from_config(config)?;
        let tagger = Tagger::from_config(&config.tagger, config.uploader.proxy.as_deref())?;
        let registry = UploaderRegistry::from_config(&config.uploader)?;

        Ok(Self::new(
            WorkflowCatalog::from_config(config),
            CheckpointStore::new(config.orders_dir()),
            SeedSalt::generate(),
            Box::new(backend),
            Box::new(processor),
            UploadDispatcher::new(registry, tagger, config.outputs_dir()),
            config.outputs_dir(),
        ))
    }

    pub fn new(
        catalog: WorkflowCatalog,
        store: CheckpointStore,
        salt: SeedSalt,
        backend: Box<dyn GenerationBackend>,
        processor: Box<dyn SafetyProcessor>,
        dispatcher: UploadDispatcher,
        outputs_dir: PathBuf,
    ) -> Self {
        Self {
            catalog,
            store,
            salt,
            backend,
            processor,
            dispatcher,
            outputs_dir,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn catalog(&self) -> &WorkflowCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &UploadDispatcher {
        &self.dispatcher
    }

    /// Setting the flag stops the run before the next Order starts.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn run(&mut self, mode: Mode, orders: Vec<Order>) -> Result<RunSummary, OrderflowError> {
        self.dispatcher.registry().validate(&orders)?;

        match mode {
            Mode::Flow => self.run_flow(orders),
        }
    }

    fn run_flow(&mut self, orders: Vec<Order>) -> Result<RunSummary, OrderflowError> {
        let total = orders.len();
        let mut summary = RunSummary::default();

        for (position, mut order) in orders.into_iter().enumerate() {
            if self.stop.load(Ordering::Relaxed) {
                warn!("Stop requested, {} orders left unprocessed", total - position);
                summary.stopped = true;
                break;
            }

            match self.process(&mut order) {
                Ok(()) => summary.delivered += 1,
                Err(e) if skips_order(&e) => {
                    error!(
                        upload_index = order.upload_index(),
                        "Order not delivered, continuing with the next one: {}", e
                    );
                    summary.skipped.push(order.upload_index());
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            delivered = summary.delivered,
            skipped = summary.skipped.len(),
            "Flow finished"
        );
        Ok(summary)
    }

    /// Generate, post-process and upload one Order. Each stage only does
    /// what the Order's images still need.
    pub fn process(&mut self, order: &mut Order) -> Result<(), OrderflowError> {
        let upload_index = order.upload_index();
        let span = info_span!("order", upload_index);
        let _guard = span.enter();

        if order.pending_generation().is_empty() {
            info!("All images already generated");
        } else {
            let _generate = info_span!("generate").entered();
            let output_dir = dated_output_dir(&self.outputs_dir, Local::now())?;
            let planner = BatchPlanner::new(&self.catalog, &self.store, self.salt);
            planner.run(order, self.backend.as_mut(), &output_dir)?;
        }

        {
            let _post = info_span!("post_process").entered();
            let report = run_gate(order, self.processor.as_mut());
            if report.failures > 0 {
                warn!(failures = report.failures, "Some post-processing steps failed");
            }
            self.store.save_logged(order);
        }

        {
            let _upload = info_span!("upload").entered();
            self.dispatcher.dispatch(order)?;
            order.delivered = true;
            self.store.save_logged(order);
        }

        info!("Order delivered");
        Ok(())
    }
}

/// Failures that only cost the current Order its upload. Its checkpoint stays
/// undelivered.
fn skips_order(err: &OrderflowError) -> bool {
    matches!(
        err,
        OrderflowError::Upload(UploadError::Incomplete { .. })
            | OrderflowError::Upload(UploadError::Tag(TagError::Aborted))
    )
}
